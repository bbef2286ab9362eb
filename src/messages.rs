//! Channel message types between the bot's tasks.
//!
//! Feed → BookView: `BookEvent`
//! Feed → InventoryLedger: `FillEvent` (single source of truth for positions)
//! Feed → OrderExecutor: `OrderUpdate` (single source of truth for order state)
//! BookView → refill task: `ResyncRequest`

use rust_decimal::Decimal;

use crate::types::{BookSide, Level, OrderState, Outcome, Side};

// ─────────────────────────────────────────────────────────
// Book events (feed / REST refill → BookView)
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub enum BookEvent {
    /// Full replacement of both sides at `sequence`.
    Snapshot {
        sequence: u64,
        bids: Vec<Level>,
        asks: Vec<Level>,
    },
    /// Incremental level change. `size` of zero removes the level.
    Delta {
        sequence: u64,
        side: BookSide,
        price: Decimal,
        size: Decimal,
    },
}

/// Ask the refill task for a fresh REST snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ResyncRequest;

// ─────────────────────────────────────────────────────────
// Fill events (feed → InventoryLedger)
// ─────────────────────────────────────────────────────────

/// A confirmed trade against one of our orders.
///
/// `trade_id` is the venue's unique id; replays of the same id are
/// dropped idempotently by the ledger.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub trade_id: String,
    pub order_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

// ─────────────────────────────────────────────────────────
// Order updates (feed → OrderExecutor)
// ─────────────────────────────────────────────────────────

/// Venue-confirmed order state transition.
#[derive(Debug, Clone)]
pub struct OrderUpdate {
    pub order_id: String,
    pub state: OrderState,
    pub remaining: Option<Decimal>,
}
