//! Position redemption sweeper.
//!
//! Periodically claims the cash value of settled positions. Runs
//! independently of the quoting loop (and keeps running while quoting
//! is paused); per-position failures are logged and skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::rest::VenueRestClient;

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);
const ERROR_PAUSE: Duration = Duration::from_secs(60);

pub struct PositionRedeemer {
    rest: VenueRestClient,
    address: String,
    enabled: bool,
    threshold_usd: Decimal,
    running: Arc<AtomicBool>,
}

impl PositionRedeemer {
    pub fn new(
        rest: VenueRestClient,
        address: String,
        enabled: bool,
        threshold_usd: Decimal,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rest,
            address,
            enabled,
            threshold_usd,
            running,
        }
    }

    pub async fn run(self) {
        if !self.enabled {
            info!("🧾 auto-redeem disabled");
            return;
        }
        info!(threshold = %self.threshold_usd, "🧾 position redeemer started");

        while self.running.load(Ordering::Relaxed) {
            let pause = match self.sweep().await {
                Ok(()) => SWEEP_INTERVAL,
                Err(e) => {
                    warn!("redemption sweep failed: {e}");
                    ERROR_PAUSE
                }
            };
            self.idle(pause).await;
        }
        info!("🧾 position redeemer shutting down");
    }

    async fn sweep(&self) -> Result<(), crate::error::VenueError> {
        let positions = self.rest.redeemable_positions(&self.address).await?;
        if positions.is_empty() {
            return Ok(());
        }

        let mut redeemed = 0usize;
        for position in &positions {
            if position.value < self.threshold_usd {
                continue;
            }
            match self.rest.redeem(&position.id).await {
                Ok(ack) if ack.success => {
                    info!(position_id = %position.id, value = %position.value, "position redeemed");
                    redeemed += 1;
                }
                Ok(_) => {
                    warn!(position_id = %position.id, "redemption not accepted");
                }
                Err(e) => {
                    warn!(position_id = %position.id, "redemption failed: {e}");
                }
            }
        }
        info!(redeemed, total = positions.len(), "redemption sweep completed");
        Ok(())
    }

    async fn idle(&self, duration: Duration) {
        let deadline = std::time::Instant::now() + duration;
        while self.running.load(Ordering::Relaxed) {
            let left = deadline.saturating_duration_since(std::time::Instant::now());
            if left.is_zero() {
                return;
            }
            sleep(left.min(Duration::from_millis(250))).await;
        }
    }
}
