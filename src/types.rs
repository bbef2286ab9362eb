use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn from_wire(s: &str) -> Option<Side> {
        if s.eq_ignore_ascii_case("BUY") {
            Some(Side::Buy)
        } else if s.eq_ignore_ascii_case("SELL") {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Yes,
    No,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Yes => "YES",
            Outcome::No => "NO",
        }
    }

    pub fn opposite(&self) -> Outcome {
        match self {
            Outcome::Yes => Outcome::No,
            Outcome::No => Outcome::Yes,
        }
    }
}

/// Which side of the book a delta touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookSide {
    Bid,
    Ask,
}

/// Market descriptor from venue discovery.
#[derive(Debug, Clone)]
pub struct Market {
    pub market_id: String,
    pub question: Option<String>,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub tick_size: Decimal,
    pub min_size: Decimal,
}

impl Market {
    /// Map a venue token id back to an outcome.
    pub fn outcome_of(&self, token_id: &str) -> Option<Outcome> {
        if token_id == self.yes_token_id {
            Some(Outcome::Yes)
        } else if token_id == self.no_token_id {
            Some(Outcome::No)
        } else {
            None
        }
    }

    pub fn token_id(&self, outcome: Outcome) -> &str {
        match outcome {
            Outcome::Yes => &self.yes_token_id,
            Outcome::No => &self.no_token_id,
        }
    }
}

/// One price level of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Immutable view of the orderbook published by the book task.
///
/// Bids are sorted descending, asks ascending. `stale` means the view
/// must not be quoted against until the next clean snapshot arrives.
#[derive(Debug, Clone)]
pub struct BookSnapshot {
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
    pub sequence: u64,
    pub stale: bool,
    pub updated_at: Instant,
}

impl Default for BookSnapshot {
    fn default() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            sequence: 0,
            stale: true,
            updated_at: Instant::now(),
        }
    }
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    pub fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    /// A book with a vanished side or sentinel prices carries no
    /// quotable information (invalid when best_bid <= 0 or best_ask >= 1).
    pub fn is_quotable(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => {
                !self.stale && bid > Decimal::ZERO && ask < Decimal::ONE
            }
            _ => false,
        }
    }
}

/// Order lifecycle states. Transitions are driven by venue events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Cancelled | OrderState::Rejected | OrderState::Expired
        )
    }

    pub fn from_wire(s: &str) -> Option<OrderState> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("OPEN") || s.eq_ignore_ascii_case("LIVE") {
            Some(OrderState::Open)
        } else if s.eq_ignore_ascii_case("PARTIALLY_FILLED") || s.eq_ignore_ascii_case("PARTIAL") {
            Some(OrderState::PartiallyFilled)
        } else if s.eq_ignore_ascii_case("FILLED") || s.eq_ignore_ascii_case("MATCHED") {
            Some(OrderState::Filled)
        } else if s.eq_ignore_ascii_case("CANCELLED") || s.eq_ignore_ascii_case("CANCELED") {
            Some(OrderState::Cancelled)
        } else if s.eq_ignore_ascii_case("REJECTED") {
            Some(OrderState::Rejected)
        } else if s.eq_ignore_ascii_case("EXPIRED") {
            Some(OrderState::Expired)
        } else {
            None
        }
    }
}

/// A resting (or in-flight) order tracked by the executor.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: String,
    pub market_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub remaining: Decimal,
    pub generation: u64,
    pub placed_at: Instant,
    pub state: OrderState,
}

impl Order {
    pub fn is_aged(&self, now: Instant, lifetime: Duration) -> bool {
        now.duration_since(self.placed_at) > lifetime
    }
}

/// A quoting intent produced by the quote engine for one cycle.
#[derive(Debug, Clone)]
pub struct Quote {
    pub market_id: String,
    pub token_id: String,
    pub outcome: Outcome,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
    pub generation: u64,
}

impl Quote {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// One outcome's position: share count and blended average cost.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub size: Decimal,
    pub avg_cost: Decimal,
}

impl Default for Position {
    fn default() -> Self {
        Self {
            size: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
        }
    }
}

impl Position {
    pub fn cost(&self) -> Decimal {
        self.size * self.avg_cost
    }
}

// ─────────────────────────────────────────────────────────
// Tick / lot quantization
// ─────────────────────────────────────────────────────────

/// Round a price down to the nearest tick.
pub fn quantize_down(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).floor() * tick
}

/// Round a price up to the nearest tick.
pub fn quantize_up(value: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return value;
    }
    (value / tick).ceil() * tick
}
