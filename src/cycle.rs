//! CancelReplaceLoop — the periodic driver.
//!
//! Each iteration: pace against the quote refresh rate, read consistent
//! book and inventory snapshots, drain venue order updates, reconcile
//! with venue truth when due, cancel aged and previous-generation
//! orders, then risk-gate and place this cycle's quotes.
//!
//! Transient errors abandon the iteration and back off linearly
//! (1 s growing to a 5 s cap); anything else propagates to the
//! orchestrator for shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{gauge, histogram};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::error::MakerError;
use crate::executor::OrderExecutor;
use crate::inventory::InventorySnapshot;
use crate::messages::ResyncRequest;
use crate::metrics::{EXPOSURE_USD, QUOTE_CYCLE_DURATION_SECONDS, SPREAD_BPS};
use crate::quote::QuoteEngine;
use crate::rest::VenueRestClient;
use crate::risk::{self, RiskLimits, Verdict};
use crate::types::{BookSnapshot, Market};

const RECONCILE_INTERVAL: Duration = Duration::from_secs(30);
const BACKOFF_STEP: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Flag-aware sleep granularity so shutdown is picked up promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

pub struct CancelReplaceLoop {
    market: Market,
    engine: QuoteEngine,
    executor: OrderExecutor,
    limits: RiskLimits,
    rest: VenueRestClient,
    book_rx: watch::Receiver<BookSnapshot>,
    inv_rx: watch::Receiver<InventorySnapshot>,
    resync_tx: mpsc::Sender<ResyncRequest>,
    running: Arc<AtomicBool>,
    quote_refresh: Duration,
    interval: Duration,
    last_quote_at: Option<Instant>,
    last_reconcile_at: Instant,
    invariant_alerted: bool,
}

impl CancelReplaceLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: &Settings,
        market: Market,
        engine: QuoteEngine,
        executor: OrderExecutor,
        rest: VenueRestClient,
        book_rx: watch::Receiver<BookSnapshot>,
        inv_rx: watch::Receiver<InventorySnapshot>,
        resync_tx: mpsc::Sender<ResyncRequest>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            market,
            engine,
            executor,
            limits: RiskLimits::from_settings(settings),
            rest,
            book_rx,
            inv_rx,
            resync_tx,
            running,
            quote_refresh: Duration::from_millis(settings.quote_refresh_rate_ms),
            interval: Duration::from_millis(settings.cancel_replace_interval_ms),
            last_quote_at: None,
            // Boot reconcile already happened; start the periodic clock now.
            last_reconcile_at: Instant::now(),
            invariant_alerted: false,
        }
    }

    /// Drive cycles until shutdown or a fatal error, then cancel every
    /// resting order before returning.
    pub async fn run(mut self) -> Result<(), MakerError> {
        info!(
            market = %self.market.market_id,
            refresh_ms = self.quote_refresh.as_millis() as u64,
            interval_ms = self.interval.as_millis() as u64,
            "🔁 cancel-replace loop started"
        );
        let result = self.drive().await;

        info!("🔁 cancel-replace loop stopping, flushing orders");
        if let Err(e) = self.executor.cancel_all().await {
            warn!("cancel-all on shutdown failed: {e}");
        }
        result
    }

    async fn drive(&mut self) -> Result<(), MakerError> {
        let mut consecutive_failures: u32 = 0;

        while self.running.load(Ordering::Relaxed) {
            match self.iterate().await {
                Ok(()) => {
                    consecutive_failures = 0;
                    self.idle(self.interval).await;
                }
                Err(e) if e.is_transient() => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let delay = backoff_delay(consecutive_failures);
                    warn!(
                        failures = consecutive_failures,
                        delay_s = delay.as_secs(),
                        "cycle abandoned on transient error: {e}"
                    );
                    self.idle(delay).await;
                }
                Err(e) => {
                    error!("fatal error in cancel-replace loop: {e}");
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    async fn iterate(&mut self) -> Result<(), MakerError> {
        // 1. Pace against the refresh rate.
        if let Some(last) = self.last_quote_at {
            let elapsed = last.elapsed();
            if elapsed < self.quote_refresh {
                self.idle(self.quote_refresh - elapsed).await;
            }
        }
        if !self.running.load(Ordering::Relaxed) {
            return Ok(());
        }
        let cycle_started = Instant::now();
        self.last_quote_at = Some(cycle_started);

        // Venue truth first: drain pending order transitions.
        self.executor.drain_updates();
        if self.last_reconcile_at.elapsed() >= RECONCILE_INTERVAL {
            let venue_orders = self
                .rest
                .open_orders(
                    &self.executor.maker_address(),
                    Some(self.market.market_id.as_str()),
                )
                .await
                .map_err(MakerError::Venue)?;
            self.executor.reconcile(venue_orders);
            self.last_reconcile_at = Instant::now();
        }

        // 2. Consistent snapshots.
        let book = self.book_rx.borrow().clone();
        let inventory = *self.inv_rx.borrow();

        if !book.is_quotable() {
            debug!(
                stale = book.stale,
                sequence = book.sequence,
                "book not quotable, requesting refill and skipping cycle"
            );
            let _ = self.resync_tx.try_send(ResyncRequest);
            return Ok(());
        }
        self.publish_book_gauges(&book, &inventory);

        // Accounting is wrong: stop quoting, keep cancelling.
        if !inventory.invariant_ok {
            if !self.invariant_alerted {
                error!("inventory invariant violated — quoting paused until restart");
                self.invariant_alerted = true;
            }
            let stale = self
                .executor
                .stale_order_ids(Instant::now(), u64::MAX);
            self.executor.batch_cancel(&stale).await?;
            return Ok(());
        }

        // 3. This cycle's target quotes (bumps the generation).
        let quotes = self.engine.generate(&self.market, &book, &inventory);

        // 4. Cancel aged orders and everything from earlier generations.
        let stale = self
            .executor
            .stale_order_ids(Instant::now(), self.engine.generation());
        if !stale.is_empty() {
            debug!(count = stale.len(), "cancelling stale orders");
            self.executor.batch_cancel(&stale).await?;
        }

        // 5. Risk-gate and place.
        let (yes_mark, no_mark) = marks(&book);
        for quote in &quotes {
            match risk::check(quote, &inventory, yes_mark, no_mark, &self.limits) {
                Verdict::Accept => self.executor.place(quote).await?,
                Verdict::Reject(reason) => {
                    info!(
                        outcome = quote.outcome.as_str(),
                        side = quote.side.as_str(),
                        price = %quote.price,
                        size = %quote.size,
                        reason = reason.as_str(),
                        "quote rejected by risk gate"
                    );
                }
            }
        }

        // 6. Cycle accounting.
        histogram!(QUOTE_CYCLE_DURATION_SECONDS).record(cycle_started.elapsed().as_secs_f64());
        Ok(())
    }

    fn publish_book_gauges(&self, book: &BookSnapshot, inventory: &InventorySnapshot) {
        if let (Some(spread), Some(mid)) = (book.spread(), book.mid()) {
            if mid > Decimal::ZERO {
                let bps = (spread / mid * Decimal::from(10_000)).to_f64().unwrap_or(0.0);
                gauge!(SPREAD_BPS).set(bps);
            }
            let (yes_mark, no_mark) = marks(book);
            gauge!(EXPOSURE_USD).set(
                inventory
                    .exposure_usd(yes_mark, no_mark)
                    .to_f64()
                    .unwrap_or(0.0),
            );
        }
    }

    /// Sleep in slices so the shutdown flag is honoured quickly.
    async fn idle(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.running.load(Ordering::Relaxed) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return;
            }
            sleep(left.min(SLEEP_SLICE)).await;
        }
    }
}

/// Mark prices for exposure: the YES mid and its complement.
fn marks(book: &BookSnapshot) -> (Decimal, Decimal) {
    let mid = book.mid().unwrap_or(Decimal::new(5, 1));
    (mid, Decimal::ONE - mid)
}

/// Linear backoff: 1 s per consecutive failure, capped at 5 s.
fn backoff_delay(consecutive_failures: u32) -> Duration {
    BACKOFF_STEP
        .saturating_mul(consecutive_failures.max(1))
        .min(BACKOFF_CAP)
}
