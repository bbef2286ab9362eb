//! InventoryLedger — authoritative position and exposure accounting.
//!
//! Receives fill events from the feed, maintains per-outcome positions
//! with blended average cost, and broadcasts snapshots via a `watch`
//! channel for the risk gate and quote engine to read.
//!
//! Fills are applied in venue `trade_id` order; a replayed `trade_id`
//! (reconnect replay, duplicate frame) is dropped idempotently by a
//! bounded TTL cache. Short selling is unsupported: a SELL past zero is
//! rejected and logged, leaving the position untouched.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use metrics::{counter, gauge};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::messages::FillEvent;
use crate::metrics::{EXPOSURE_USD, FILLS_DEDUPLICATED_TOTAL, INVENTORY, PROFIT_USD};
use crate::types::{Outcome, Position, Side};

/// Tolerance for the running-total invariant re-check.
const COST_TOLERANCE: Decimal = dec!(0.000000001);

/// Division guard for the imbalance ratio.
const IMBALANCE_EPSILON: Decimal = dec!(0.000000001);

// ─────────────────────────────────────────────────────────
// Snapshot
// ─────────────────────────────────────────────────────────

/// Immutable inventory view for risk/quote consumers.
#[derive(Debug, Clone, Copy)]
pub struct InventorySnapshot {
    pub yes: Position,
    pub no: Position,
    pub realized_pnl: Decimal,
    /// False after an accounting invariant violation; quoting pauses
    /// until an operator intervenes, redemption keeps running.
    pub invariant_ok: bool,
}

impl Default for InventorySnapshot {
    fn default() -> Self {
        Self {
            yes: Position::default(),
            no: Position::default(),
            realized_pnl: Decimal::ZERO,
            invariant_ok: true,
        }
    }
}

impl InventorySnapshot {
    pub fn position(&self, outcome: Outcome) -> Position {
        match outcome {
            Outcome::Yes => self.yes,
            Outcome::No => self.no,
        }
    }

    /// `(yes - no) / (yes + no + eps)`, in [-1, 1]. Positive means long YES.
    pub fn imbalance(&self) -> Decimal {
        (self.yes.size - self.no.size) / (self.yes.size + self.no.size + IMBALANCE_EPSILON)
    }

    /// Net USD exposure at the given marks.
    pub fn exposure_usd(&self, yes_mark: Decimal, no_mark: Decimal) -> Decimal {
        self.yes.size * yes_mark + self.no.size * no_mark
    }

    pub fn total_cost(&self) -> Decimal {
        self.yes.cost() + self.no.cost()
    }
}

// ─────────────────────────────────────────────────────────
// Trade-id dedup (bounded TTL cache)
// ─────────────────────────────────────────────────────────

/// Remembers recently applied trade ids so replays after a feed
/// reconnect are not double-counted.
#[derive(Debug)]
struct TradeDedup {
    seen_at: HashMap<String, Instant>,
    ttl: Duration,
    max_entries: usize,
}

impl TradeDedup {
    fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            seen_at: HashMap::with_capacity(max_entries.min(4096)),
            ttl,
            max_entries,
        }
    }

    /// Returns true if the id was new.
    fn remember(&mut self, trade_id: &str) -> bool {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.ttl).unwrap_or(now);
        self.seen_at.retain(|_, ts| *ts >= cutoff);

        if self.seen_at.contains_key(trade_id) {
            return false;
        }
        self.seen_at.insert(trade_id.to_string(), now);

        while self.seen_at.len() > self.max_entries {
            let oldest = self
                .seen_at
                .iter()
                .min_by_key(|(_, ts)| *ts)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => self.seen_at.remove(&key),
                None => break,
            };
        }
        true
    }
}

// ─────────────────────────────────────────────────────────
// Actor
// ─────────────────────────────────────────────────────────

pub struct InventoryLedger {
    yes: Position,
    no: Position,
    realized_pnl: Decimal,
    /// Incrementally maintained Σ size·avg_cost, re-verified after every
    /// mutation against a fresh recomputation.
    cost_total: Decimal,
    invariant_ok: bool,
    dedup: TradeDedup,
    fill_rx: mpsc::Receiver<FillEvent>,
    snapshot_tx: watch::Sender<InventorySnapshot>,
}

impl InventoryLedger {
    pub fn new(
        fill_rx: mpsc::Receiver<FillEvent>,
        snapshot_tx: watch::Sender<InventorySnapshot>,
    ) -> Self {
        Self {
            yes: Position::default(),
            no: Position::default(),
            realized_pnl: Decimal::ZERO,
            cost_total: Decimal::ZERO,
            invariant_ok: true,
            dedup: TradeDedup::new(Duration::from_secs(15 * 60), 50_000),
            fill_rx,
            snapshot_tx,
        }
    }

    /// Actor main loop. Runs until the fill channel is closed.
    pub async fn run(mut self) {
        info!("📦 InventoryLedger started");
        while let Some(fill) = self.fill_rx.recv().await {
            if self.apply_fill(&fill) {
                let snap = self.snapshot();
                let _ = self.snapshot_tx.send(snap);
                self.publish_gauges();
                info!(
                    trade_id = %fill.trade_id,
                    outcome = fill.outcome.as_str(),
                    side = fill.side.as_str(),
                    size = %fill.size,
                    price = %fill.price,
                    yes = %self.yes.size,
                    no = %self.no.size,
                    "fill applied"
                );
            }
        }
        info!("📦 InventoryLedger shutting down (channel closed)");
    }

    pub fn snapshot(&self) -> InventorySnapshot {
        InventorySnapshot {
            yes: self.yes,
            no: self.no,
            realized_pnl: self.realized_pnl,
            invariant_ok: self.invariant_ok,
        }
    }

    /// Apply one fill. Returns false when the fill was a duplicate or
    /// was rejected (short sell).
    fn apply_fill(&mut self, fill: &FillEvent) -> bool {
        if fill.size <= Decimal::ZERO {
            debug!(trade_id = %fill.trade_id, "ignoring zero-size fill");
            return false;
        }
        if !self.dedup.remember(&fill.trade_id) {
            counter!(FILLS_DEDUPLICATED_TOTAL).increment(1);
            debug!(trade_id = %fill.trade_id, "duplicate trade id dropped");
            return false;
        }

        let position = match fill.outcome {
            Outcome::Yes => &mut self.yes,
            Outcome::No => &mut self.no,
        };

        match fill.side {
            Side::Buy => {
                let new_size = position.size + fill.size;
                position.avg_cost =
                    (position.avg_cost * position.size + fill.price * fill.size) / new_size;
                position.size = new_size;
                self.cost_total += fill.price * fill.size;
            }
            Side::Sell => {
                if fill.size > position.size {
                    error!(
                        trade_id = %fill.trade_id,
                        outcome = fill.outcome.as_str(),
                        held = %position.size,
                        sell = %fill.size,
                        "sell exceeds position — short selling unsupported, fill rejected"
                    );
                    return false;
                }
                self.realized_pnl += (fill.price - position.avg_cost) * fill.size;
                self.cost_total -= position.avg_cost * fill.size;
                position.size -= fill.size;
                if position.size.is_zero() {
                    position.avg_cost = Decimal::ZERO;
                }
            }
        }

        self.verify_invariants();
        true
    }

    /// Re-check accounting after every mutation: no negative sizes, and
    /// the running cost total agrees with a fresh recomputation.
    fn verify_invariants(&mut self) {
        if self.yes.size < Decimal::ZERO || self.no.size < Decimal::ZERO {
            error!(
                yes = %self.yes.size,
                no = %self.no.size,
                "negative position — quoting paused, operator intervention required"
            );
            self.invariant_ok = false;
            return;
        }
        let recomputed = self.yes.cost() + self.no.cost();
        let drift = (recomputed - self.cost_total).abs();
        if drift > COST_TOLERANCE {
            error!(
                running = %self.cost_total,
                recomputed = %recomputed,
                %drift,
                "cost accounting drifted — quoting paused, operator intervention required"
            );
            self.invariant_ok = false;
        } else {
            // Fold out the sub-tolerance rounding from avg-cost division.
            self.cost_total = recomputed;
        }
    }

    fn publish_gauges(&self) {
        gauge!(INVENTORY, "type" => "yes").set(self.yes.size.to_f64().unwrap_or(0.0));
        gauge!(INVENTORY, "type" => "no").set(self.no.size.to_f64().unwrap_or(0.0));
        gauge!(PROFIT_USD).set(self.realized_pnl.to_f64().unwrap_or(0.0));
        // Exposure at cost; the cycle re-publishes at mark each iteration.
        gauge!(EXPOSURE_USD).set(self.cost_total.to_f64().unwrap_or(0.0));
        if !self.invariant_ok {
            warn!("inventory invariant violated — snapshot flagged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ledger() -> InventoryLedger {
        let (_fill_tx, fill_rx) = mpsc::channel(16);
        let (snapshot_tx, _snapshot_rx) = watch::channel(InventorySnapshot::default());
        InventoryLedger::new(fill_rx, snapshot_tx)
    }

    fn fill(trade_id: &str, outcome: Outcome, side: Side, size: Decimal, price: Decimal) -> FillEvent {
        FillEvent {
            trade_id: trade_id.to_string(),
            order_id: "order-1".to_string(),
            outcome,
            side,
            price,
            size,
        }
    }

    #[test]
    fn buy_blends_average_cost() {
        let mut ledger = make_ledger();
        assert!(ledger.apply_fill(&fill("t1", Outcome::Yes, Side::Buy, dec!(10), dec!(0.50))));
        assert!(ledger.apply_fill(&fill("t2", Outcome::Yes, Side::Buy, dec!(10), dec!(0.52))));

        let snap = ledger.snapshot();
        assert_eq!(snap.yes.size, dec!(20));
        assert_eq!(snap.yes.avg_cost, dec!(0.51));
        assert!(snap.invariant_ok);
    }

    #[test]
    fn sell_reduces_and_realizes_pnl() {
        let mut ledger = make_ledger();
        ledger.apply_fill(&fill("t1", Outcome::Yes, Side::Buy, dec!(10), dec!(0.50)));
        ledger.apply_fill(&fill("t2", Outcome::Yes, Side::Sell, dec!(4), dec!(0.60)));

        let snap = ledger.snapshot();
        assert_eq!(snap.yes.size, dec!(6));
        assert_eq!(snap.yes.avg_cost, dec!(0.50));
        assert_eq!(snap.realized_pnl, dec!(0.40));
    }

    #[test]
    fn sell_past_zero_rejected() {
        let mut ledger = make_ledger();
        ledger.apply_fill(&fill("t1", Outcome::No, Side::Buy, dec!(5), dec!(0.40)));
        assert!(!ledger.apply_fill(&fill("t2", Outcome::No, Side::Sell, dec!(8), dec!(0.45))));

        let snap = ledger.snapshot();
        assert_eq!(snap.no.size, dec!(5));
        assert!(snap.invariant_ok);
    }

    #[test]
    fn duplicate_trade_id_is_noop() {
        let mut ledger = make_ledger();
        assert!(ledger.apply_fill(&fill("t1", Outcome::Yes, Side::Buy, dec!(10), dec!(0.50))));
        assert!(!ledger.apply_fill(&fill("t1", Outcome::Yes, Side::Buy, dec!(10), dec!(0.50))));

        assert_eq!(ledger.snapshot().yes.size, dec!(10));
    }

    // Replay a fill history and verify the ledger's exposure equals an
    // independent recomputation from the raw fills.
    #[test]
    fn exposure_matches_recomputation() {
        let mut ledger = make_ledger();
        let fills = [
            ("t0", Outcome::Yes, Side::Buy, dec!(7), dec!(0.41)),
            ("t1", Outcome::No, Side::Buy, dec!(12), dec!(0.47)),
            ("t2", Outcome::Yes, Side::Buy, dec!(5), dec!(0.53)),
            ("t3", Outcome::No, Side::Sell, dec!(4), dec!(0.49)),
            ("t4", Outcome::Yes, Side::Sell, dec!(3), dec!(0.55)),
        ];
        let mut yes_size = Decimal::ZERO;
        let mut no_size = Decimal::ZERO;
        for (id, outcome, side, size, price) in fills {
            ledger.apply_fill(&fill(id, outcome, side, size, price));
            let delta = if side == Side::Buy { size } else { -size };
            match outcome {
                Outcome::Yes => yes_size += delta,
                Outcome::No => no_size += delta,
            }
        }

        let snap = ledger.snapshot();
        let yes_mark = dec!(0.52);
        let no_mark = dec!(0.48);
        let expected = yes_size * yes_mark + no_size * no_mark;
        let drift = (snap.exposure_usd(yes_mark, no_mark) - expected).abs();
        assert!(drift <= COST_TOLERANCE, "drift {drift}");
        assert!(snap.invariant_ok);
    }

    #[test]
    fn imbalance_range_and_sign() {
        let mut ledger = make_ledger();
        assert_eq!(ledger.snapshot().imbalance(), Decimal::ZERO);

        ledger.apply_fill(&fill("t1", Outcome::Yes, Side::Buy, dec!(200), dec!(0.50)));
        let imb = ledger.snapshot().imbalance();
        assert!(imb > dec!(0.999) && imb <= Decimal::ONE);

        ledger.apply_fill(&fill("t2", Outcome::No, Side::Buy, dec!(200), dec!(0.50)));
        let imb = ledger.snapshot().imbalance();
        assert!(imb.abs() < dec!(0.001));
    }

    #[test]
    fn dedup_cache_evicts_expired() {
        let mut dedup = TradeDedup::new(Duration::from_millis(1), 16);
        assert!(dedup.remember("a"));
        std::thread::sleep(Duration::from_millis(5));
        // TTL elapsed: the entry expired, so "a" is new again.
        assert!(dedup.remember("a"));
    }

    #[test]
    fn dedup_cache_bounds_entries() {
        let mut dedup = TradeDedup::new(Duration::from_secs(600), 2);
        assert!(dedup.remember("a"));
        assert!(dedup.remember("b"));
        assert!(dedup.remember("c"));
        assert!(dedup.seen_at.len() <= 2);
    }
}
