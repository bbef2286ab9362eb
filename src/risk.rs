//! RiskGate — pre-trade validation.
//!
//! A pure function over the intended order, the current inventory
//! snapshot and the configured limits. Checks run in a fixed order and
//! the first failure wins; a rejection is a normal outcome (logged by
//! the caller), never an error.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::Settings;
use crate::inventory::InventorySnapshot;
use crate::types::{Outcome, Quote, Side};

/// Fraction of `max_exposure_usd` past which only exposure-reducing
/// orders are accepted.
const WRONG_DIRECTION_THRESHOLD: Decimal = dec!(0.8);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accept,
    Reject(RejectReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ExceedsMaxExposure,
    BelowMinSize,
    InventoryOutsideTargetBand,
    ExposureIncreasesWrongDirection,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ExceedsMaxExposure => "exceeds_max_exposure",
            RejectReason::BelowMinSize => "below_min_size",
            RejectReason::InventoryOutsideTargetBand => "inventory_outside_target_band",
            RejectReason::ExposureIncreasesWrongDirection => "exposure_increases_wrong_direction",
        }
    }
}

/// Limits consulted by the gate, lifted out of [`Settings`].
#[derive(Debug, Clone, Copy)]
pub struct RiskLimits {
    pub max_exposure_usd: Decimal,
    pub min_exposure_usd: Decimal,
    pub target_inventory_balance: Decimal,
    pub min_size: Decimal,
}

impl RiskLimits {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_exposure_usd: settings.max_exposure_usd,
            min_exposure_usd: settings.min_exposure_usd,
            target_inventory_balance: settings.target_inventory_balance,
            min_size: settings.min_size,
        }
    }
}

/// Validate one quote intent against current inventory at the given marks.
pub fn check(
    quote: &Quote,
    inventory: &InventorySnapshot,
    yes_mark: Decimal,
    no_mark: Decimal,
    limits: &RiskLimits,
) -> Verdict {
    if quote.size < limits.min_size {
        return Verdict::Reject(RejectReason::BelowMinSize);
    }

    let exposure = inventory.exposure_usd(yes_mark, no_mark);
    let notional = quote.notional();
    let projected = match quote.side {
        Side::Buy => exposure + notional,
        Side::Sell => exposure - notional,
    };

    if projected.abs() > limits.max_exposure_usd {
        return Verdict::Reject(RejectReason::ExceedsMaxExposure);
    }

    // Near the cap, only orders that shrink absolute exposure pass.
    if exposure.abs() > limits.max_exposure_usd * WRONG_DIRECTION_THRESHOLD
        && projected.abs() >= exposure.abs()
    {
        return Verdict::Reject(RejectReason::ExposureIncreasesWrongDirection);
    }

    // The lower band: a sell must not drain exposure below the floor.
    if quote.side == Side::Sell && projected < limits.min_exposure_usd {
        return Verdict::Reject(RejectReason::ExposureIncreasesWrongDirection);
    }

    // Past the imbalance band, refuse to keep accumulating the heavy side.
    let imbalance = inventory.imbalance();
    if imbalance.abs() > limits.target_inventory_balance && accumulates_heavy_side(quote, imbalance)
    {
        return Verdict::Reject(RejectReason::InventoryOutsideTargetBand);
    }

    Verdict::Accept
}

/// Whether the order pushes the imbalance further in its current
/// direction. Buying YES or selling NO lengthens YES; the mirror
/// lengthens NO.
fn accumulates_heavy_side(quote: &Quote, imbalance: Decimal) -> bool {
    let lengthens_yes = matches!(
        (quote.outcome, quote.side),
        (Outcome::Yes, Side::Buy) | (Outcome::No, Side::Sell)
    );
    if imbalance > Decimal::ZERO {
        lengthens_yes
    } else {
        !lengthens_yes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_exposure_usd: dec!(1000),
            min_exposure_usd: Decimal::ZERO,
            target_inventory_balance: dec!(0.5),
            min_size: dec!(5),
        }
    }

    fn quote(outcome: Outcome, side: Side, price: Decimal, size: Decimal) -> Quote {
        Quote {
            market_id: "mkt".to_string(),
            token_id: "tok".to_string(),
            outcome,
            side,
            price,
            size,
            generation: 1,
        }
    }

    fn inventory(yes_size: Decimal, no_size: Decimal, avg: Decimal) -> InventorySnapshot {
        InventorySnapshot {
            yes: Position {
                size: yes_size,
                avg_cost: avg,
            },
            no: Position {
                size: no_size,
                avg_cost: avg,
            },
            realized_pnl: Decimal::ZERO,
            invariant_ok: true,
        }
    }

    // Exposure cap scenario: $950 held against a $1000 cap.
    #[test]
    fn buy_over_cap_rejected_sell_reducing_accepted() {
        let inv = inventory(dec!(1900), Decimal::ZERO, dec!(0.50));
        let mark = dec!(0.50);
        assert_eq!(inv.exposure_usd(mark, mark), dec!(950));

        let buy = quote(Outcome::Yes, Side::Buy, dec!(0.50), dec!(200)); // $100 notional
        assert_eq!(
            check(&buy, &inv, mark, mark, &limits()),
            Verdict::Reject(RejectReason::ExceedsMaxExposure)
        );

        let sell = quote(Outcome::Yes, Side::Sell, dec!(0.50), dec!(200));
        assert_eq!(check(&sell, &inv, mark, mark, &limits()), Verdict::Accept);
    }

    #[test]
    fn wrong_direction_near_cap() {
        // $850 exposure: over the 80% line but a small buy stays under the cap.
        let inv = inventory(dec!(1700), Decimal::ZERO, dec!(0.50));
        let mark = dec!(0.50);
        let buy = quote(Outcome::Yes, Side::Buy, dec!(0.50), dec!(20)); // $10 notional
        assert_eq!(
            check(&buy, &inv, mark, mark, &limits()),
            Verdict::Reject(RejectReason::ExposureIncreasesWrongDirection)
        );
    }

    #[test]
    fn below_min_size_rejected_first() {
        let inv = inventory(Decimal::ZERO, Decimal::ZERO, Decimal::ZERO);
        let q = quote(Outcome::Yes, Side::Buy, dec!(0.50), dec!(1));
        assert_eq!(
            check(&q, &inv, dec!(0.5), dec!(0.5), &limits()),
            Verdict::Reject(RejectReason::BelowMinSize)
        );
    }

    #[test]
    fn imbalance_band_blocks_heavy_side_only() {
        // All-YES inventory: imbalance ~ 1.0, well past the 0.5 band.
        let inv = inventory(dec!(100), Decimal::ZERO, dec!(0.40));
        let mark = dec!(0.50);

        let buy_yes = quote(Outcome::Yes, Side::Buy, dec!(0.50), dec!(10));
        assert_eq!(
            check(&buy_yes, &inv, mark, mark, &limits()),
            Verdict::Reject(RejectReason::InventoryOutsideTargetBand)
        );

        // Buying NO reduces the imbalance and passes.
        let buy_no = quote(Outcome::No, Side::Buy, dec!(0.50), dec!(10));
        assert_eq!(check(&buy_no, &inv, mark, mark, &limits()), Verdict::Accept);
    }

    #[test]
    fn sell_below_floor_rejected() {
        let mut lim = limits();
        lim.min_exposure_usd = dec!(40);
        let inv = inventory(dec!(100), Decimal::ZERO, dec!(0.50)); // $50 at mark 0.5
        let sell = quote(Outcome::Yes, Side::Sell, dec!(0.50), dec!(40)); // -> $30
        assert_eq!(
            check(&sell, &inv, dec!(0.5), dec!(0.5), &lim),
            Verdict::Reject(RejectReason::ExposureIncreasesWrongDirection)
        );
    }

    // Monotonicity: once a notional is rejected for exceeding the cap,
    // every larger notional on the same side is rejected too.
    #[test]
    fn exposure_rejection_is_monotone_in_notional() {
        let inv = inventory(dec!(1000), Decimal::ZERO, dec!(0.50));
        let mark = dec!(0.50);
        let lim = limits();
        let mut rejected_at: Option<Decimal> = None;

        for steps in 1..=60u32 {
            let size = Decimal::from(steps * 50);
            let q = quote(Outcome::No, Side::Buy, dec!(0.50), size);
            let verdict = check(&q, &inv, mark, mark, &lim);
            match verdict {
                Verdict::Reject(RejectReason::ExceedsMaxExposure) => {
                    if rejected_at.is_none() {
                        rejected_at = Some(q.notional());
                    }
                }
                _ => {
                    if let Some(threshold) = rejected_at {
                        panic!(
                            "notional {} accepted after {} was rejected",
                            q.notional(),
                            threshold
                        );
                    }
                }
            }
        }
        assert!(rejected_at.is_some());
    }
}
