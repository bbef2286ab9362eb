//! QuoteEngine — derives target quotes from the book, current
//! inventory and the configured spread/skew parameters.
//!
//! The venue's CLOB is maker-only from our side: both outcomes are
//! quoted as resting BUY orders, and the YES ask is expressed as the
//! complementary NO bid (price_NO = 1 - price_YES). Each cycle
//! therefore emits at most one intent per outcome.
//!
//! The engine is stateless apart from the generation counter, which is
//! bumped exactly once per cycle so the executor can cancel everything
//! from earlier generations.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::Settings;
use crate::inventory::InventorySnapshot;
use crate::types::{quantize_down, quantize_up, BookSnapshot, Market, Outcome, Quote, Side};

/// Quote-shape parameters, lifted out of [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct QuoteParams {
    pub base_size: Decimal,
    pub min_size: Decimal,
    pub max_size: Decimal,
    pub min_half_spread: Decimal,
    pub widen_factor: Decimal,
    pub skew_coefficient: Decimal,
}

impl QuoteParams {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            base_size: settings.base_size,
            min_size: settings.min_size,
            max_size: settings.max_size,
            min_half_spread: settings.min_half_spread,
            widen_factor: settings.widen_factor,
            skew_coefficient: settings.skew_coefficient,
        }
    }
}

pub struct QuoteEngine {
    params: QuoteParams,
    generation: u64,
}

impl QuoteEngine {
    pub fn new(params: QuoteParams) -> Self {
        Self {
            params,
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Compute this cycle's quote intents. An empty vec means both
    /// sides were suppressed.
    pub fn generate(
        &mut self,
        market: &Market,
        book: &BookSnapshot,
        inventory: &InventorySnapshot,
    ) -> Vec<Quote> {
        self.generation += 1;

        let (best_bid, best_ask) = match (book.best_bid(), book.best_ask()) {
            (Some(bid), Some(ask)) => (bid, ask),
            _ => return Vec::new(),
        };

        let mid = (best_bid + best_ask) / Decimal::TWO;
        let observed_spread = best_ask - best_bid;
        let half_spread = (observed_spread / Decimal::TWO * self.params.widen_factor)
            .max(self.params.min_half_spread);

        let imbalance = inventory.imbalance();
        let skew = imbalance * self.params.skew_coefficient;

        let yes_bid = quantize_down(mid - half_spread - skew, market.tick_size);
        let yes_ask = quantize_up(mid + half_spread - skew, market.tick_size);

        // Size down the side that accumulates the heavy outcome, size up
        // the side that reduces it.
        let lean = imbalance.abs();
        let (yes_factor, no_factor) = if imbalance >= Decimal::ZERO {
            (Decimal::ONE - lean, Decimal::ONE + lean)
        } else {
            (Decimal::ONE + lean, Decimal::ONE - lean)
        };
        let yes_size = self.shape_size(self.params.base_size * yes_factor, market);
        let no_size = self.shape_size(self.params.base_size * no_factor, market);

        let mut quotes = Vec::with_capacity(2);

        // YES intent: a resting bid on the YES token. Suppressed when it
        // leaves (0, 1) or would lift the resting asks.
        if yes_bid > Decimal::ZERO && yes_bid < Decimal::ONE && yes_bid < best_ask {
            quotes.push(self.intent(market, Outcome::Yes, yes_bid, yes_size));
        } else {
            debug!(%yes_bid, %best_ask, "YES side suppressed");
        }

        // NO intent: the YES ask expressed as a NO bid at the complement.
        // Crossing the NO book's asks is equivalent to yes_ask <= best_bid.
        let no_bid = Decimal::ONE - yes_ask;
        if no_bid > Decimal::ZERO && no_bid < Decimal::ONE && yes_ask > best_bid {
            quotes.push(self.intent(market, Outcome::No, no_bid, no_size));
        } else {
            debug!(%yes_ask, %best_bid, "NO side suppressed");
        }

        quotes
    }

    fn intent(&self, market: &Market, outcome: Outcome, price: Decimal, size: Decimal) -> Quote {
        Quote {
            market_id: market.market_id.clone(),
            token_id: market.token_id(outcome).to_string(),
            outcome,
            side: Side::Buy,
            price,
            size,
            generation: self.generation,
        }
    }

    /// Lot-quantize and clamp a raw size into [min_size, max_size].
    fn shape_size(&self, raw: Decimal, market: &Market) -> Decimal {
        let lot = market.min_size;
        let quantized = if lot > Decimal::ZERO {
            (raw / lot).floor() * lot
        } else {
            raw
        };
        quantized.clamp(self.params.min_size, self.params.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Level, Position};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rust_decimal_macros::dec;
    use std::time::Instant;

    fn market() -> Market {
        Market {
            market_id: "0xmkt".to_string(),
            question: None,
            yes_token_id: "yes-token".to_string(),
            no_token_id: "no-token".to_string(),
            tick_size: dec!(0.01),
            min_size: dec!(5),
        }
    }

    fn params() -> QuoteParams {
        QuoteParams {
            base_size: dec!(100),
            min_size: dec!(5),
            max_size: dec!(500),
            min_half_spread: dec!(0.01),
            widen_factor: dec!(1.0),
            skew_coefficient: dec!(0.02),
        }
    }

    fn book(bid: Decimal, ask: Decimal) -> BookSnapshot {
        BookSnapshot {
            bids: vec![Level {
                price: bid,
                size: dec!(100),
            }],
            asks: vec![Level {
                price: ask,
                size: dec!(100),
            }],
            sequence: 1,
            stale: false,
            updated_at: Instant::now(),
        }
    }

    fn flat_inventory() -> InventorySnapshot {
        InventorySnapshot::default()
    }

    fn long_yes(size: Decimal) -> InventorySnapshot {
        InventorySnapshot {
            yes: Position {
                size,
                avg_cost: dec!(0.50),
            },
            ..InventorySnapshot::default()
        }
    }

    fn by_outcome(quotes: &[Quote], outcome: Outcome) -> Option<&Quote> {
        quotes.iter().find(|q| q.outcome == outcome)
    }

    // Symmetric book, zero inventory: quotes straddle the mid at the
    // observed half-spread on both outcomes.
    #[test]
    fn symmetric_book_zero_inventory() {
        let mut engine = QuoteEngine::new(params());
        let quotes = engine.generate(&market(), &book(dec!(0.49), dec!(0.51)), &flat_inventory());

        assert_eq!(quotes.len(), 2);
        let yes = by_outcome(&quotes, Outcome::Yes).unwrap();
        let no = by_outcome(&quotes, Outcome::No).unwrap();

        assert_eq!(yes.price, dec!(0.49));
        assert_eq!(yes.size, dec!(100));
        assert_eq!(yes.side, Side::Buy);
        // NO bid at the complement of the YES ask.
        assert_eq!(no.price, dec!(0.49));
        assert_eq!(no.size, dec!(100));
        assert_eq!(yes.token_id, "yes-token");
        assert_eq!(no.token_id, "no-token");
    }

    // Long YES: both prices shift down by the skew; the reducing side
    // (NO bid, i.e. the YES ask) grows while the accumulating side shrinks.
    #[test]
    fn long_yes_skews_prices_and_sizes() {
        let mut engine = QuoteEngine::new(params());
        let quotes = engine.generate(
            &market(),
            &book(dec!(0.49), dec!(0.51)),
            &long_yes(dec!(200)),
        );

        let yes = by_outcome(&quotes, Outcome::Yes).unwrap();
        let no = by_outcome(&quotes, Outcome::No).unwrap();

        // imbalance ~ 1.0, skew 0.02: both prices shift down by the skew.
        assert_eq!(yes.price, dec!(0.47));
        let implied_ask = Decimal::ONE - no.price;
        assert!(implied_ask < dec!(0.51), "ask did not shift down: {implied_ask}");
        assert!(implied_ask > yes.price);

        // Accumulating side collapses to the minimum, reducing side grows.
        assert_eq!(yes.size, dec!(5));
        assert!(no.size > dec!(100), "reducing side should grow: {}", no.size);
    }

    #[test]
    fn crossed_book_suppresses_both_sides() {
        let mut engine = QuoteEngine::new(params());
        let quotes = engine.generate(&market(), &book(dec!(0.52), dec!(0.50)), &flat_inventory());
        assert!(quotes.is_empty());
    }

    #[test]
    fn empty_book_yields_nothing() {
        let mut engine = QuoteEngine::new(params());
        let quotes = engine.generate(&market(), &BookSnapshot::default(), &flat_inventory());
        assert!(quotes.is_empty());
    }

    #[test]
    fn extreme_book_suppresses_out_of_range_side() {
        let mut engine = QuoteEngine::new(params());
        // Mid so low the YES bid would leave (0, 1).
        let quotes = engine.generate(&market(), &book(dec!(0.01), dec!(0.02)), &flat_inventory());
        assert!(by_outcome(&quotes, Outcome::Yes).is_none());
    }

    #[test]
    fn generation_increments_once_per_cycle() {
        let mut engine = QuoteEngine::new(params());
        assert_eq!(engine.generation(), 0);

        let q1 = engine.generate(&market(), &book(dec!(0.49), dec!(0.51)), &flat_inventory());
        assert_eq!(engine.generation(), 1);
        assert!(q1.iter().all(|q| q.generation == 1));

        let q2 = engine.generate(&market(), &book(dec!(0.49), dec!(0.51)), &flat_inventory());
        assert_eq!(engine.generation(), 2);
        assert!(q2.iter().all(|q| q.generation == 2));
    }

    // For any sane book and inventory, emitted quotes satisfy
    // 0 < bid < ask < 1 (through the complement identity) and sizes
    // stay within [min_size, max_size].
    #[test]
    fn emitted_quotes_stay_in_bounds() {
        let mut engine = QuoteEngine::new(params());
        let mkt = market();
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..200 {
            let bid = Decimal::from(rng.gen_range(1..=97)) / Decimal::ONE_HUNDRED;
            let ask = bid + Decimal::from(rng.gen_range(1..=2)) / Decimal::ONE_HUNDRED;
            let yes_size = Decimal::from(rng.gen_range(0..=300));
            let no_size = Decimal::from(rng.gen_range(0..=300));
            let inv = InventorySnapshot {
                yes: Position {
                    size: yes_size,
                    avg_cost: dec!(0.50),
                },
                no: Position {
                    size: no_size,
                    avg_cost: dec!(0.50),
                },
                ..InventorySnapshot::default()
            };

            let quotes = engine.generate(&mkt, &book(bid, ask), &inv);
            for q in &quotes {
                assert!(q.price > Decimal::ZERO && q.price < Decimal::ONE);
                assert!(q.size >= dec!(5) && q.size <= dec!(500));
            }
            if let (Some(yes), Some(no)) = (
                by_outcome(&quotes, Outcome::Yes),
                by_outcome(&quotes, Outcome::No),
            ) {
                let implied_ask = Decimal::ONE - no.price;
                assert!(
                    yes.price < implied_ask,
                    "bid {} >= implied ask {}",
                    yes.price,
                    implied_ask
                );
            }
        }
    }
}
