//! OrderExecutor — order lifecycle management.
//!
//! Owns the set of open orders keyed by order id. Placement intent is
//! at-least-once (a failed submission is terminal locally and the next
//! cycle regenerates it); the book of record for state transitions is
//! the venue, delivered as `OrderUpdate`s and drained synchronously at
//! the top of each cycle. Cancels leave an order Open until the venue
//! confirms; double-cancel is idempotent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use metrics::{counter, histogram};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{MakerError, VenueError};
use crate::messages::OrderUpdate;
use crate::metrics::{
    ORDERS_CANCELLED_TOTAL, ORDERS_FILLED_TOTAL, ORDERS_PLACED_TOTAL, ORDERS_REJECTED_TOTAL,
    ORDER_ACK_LATENCY_SECONDS,
};
use crate::rest::{CancelAck, VenueOpenOrder, VenueRestClient};
use crate::signer::{OrderPayload, OrderSigner};
use crate::types::{Market, Order, OrderState, Quote, Side};

/// How long a submitted order stays valid at the venue.
const ORDER_EXPIRATION_SECS: u64 = 24 * 60 * 60;

/// Bounded wait for terminal confirmations during `cancel_all`.
const CANCEL_ALL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OrderExecutor {
    market: Market,
    rest: VenueRestClient,
    signer: Arc<dyn OrderSigner>,
    order_lifetime: Duration,
    open: HashMap<String, Order>,
    cancel_requested: HashSet<String>,
    update_rx: mpsc::Receiver<OrderUpdate>,
}

impl OrderExecutor {
    pub fn new(
        market: Market,
        rest: VenueRestClient,
        signer: Arc<dyn OrderSigner>,
        order_lifetime: Duration,
        update_rx: mpsc::Receiver<OrderUpdate>,
    ) -> Self {
        Self {
            market,
            rest,
            signer,
            order_lifetime,
            open: HashMap::new(),
            cancel_requested: HashSet::new(),
            update_rx,
        }
    }

    pub fn open_order_count(&self) -> usize {
        self.open.len()
    }

    pub fn maker_address(&self) -> String {
        self.signer.address()
    }

    // ─────────────────────────────────────────────────
    // Venue-driven state transitions
    // ─────────────────────────────────────────────────

    /// Drain queued order updates without blocking. Called at the top
    /// of each cycle so the open set is consistent before quoting.
    pub fn drain_updates(&mut self) {
        while let Ok(update) = self.update_rx.try_recv() {
            self.apply_update(update);
        }
    }

    /// Apply one venue-confirmed transition. A terminal state removes
    /// the order from the open set exactly once; updates for unknown
    /// ids are ignored (the first terminal event already cleaned up).
    pub fn apply_update(&mut self, update: OrderUpdate) {
        let Some(order) = self.open.get_mut(&update.order_id) else {
            debug!(order_id = %update.order_id, "update for untracked order ignored");
            return;
        };

        order.state = update.state;
        if let Some(remaining) = update.remaining {
            order.remaining = remaining;
        }

        if update.state.is_terminal() {
            let order = match self.open.remove(&update.order_id) {
                Some(o) => o,
                None => return,
            };
            self.cancel_requested.remove(&update.order_id);
            match update.state {
                OrderState::Filled => {
                    counter!(
                        ORDERS_FILLED_TOTAL,
                        "side" => order.side.as_str(),
                        "outcome" => order.outcome.as_str()
                    )
                    .increment(1);
                }
                OrderState::Cancelled | OrderState::Expired => {
                    counter!(ORDERS_CANCELLED_TOTAL).increment(1);
                }
                OrderState::Rejected => {
                    counter!(ORDERS_REJECTED_TOTAL).increment(1);
                }
                _ => {}
            }
            info!(
                order_id = %order.id,
                state = ?update.state,
                outcome = order.outcome.as_str(),
                open = self.open.len(),
                "order reached terminal state"
            );
        }
    }

    // ─────────────────────────────────────────────────
    // Placement
    // ─────────────────────────────────────────────────

    /// Sign and submit one quote. Venue rejections are terminal for the
    /// intent and not an error; transport failures bubble up transient.
    pub async fn place(&mut self, quote: &Quote) -> Result<(), MakerError> {
        let client_id = Uuid::new_v4().to_string();
        let order = Order {
            id: client_id.clone(),
            market_id: quote.market_id.clone(),
            token_id: quote.token_id.clone(),
            outcome: quote.outcome,
            side: quote.side,
            price: quote.price,
            size: quote.size,
            remaining: quote.size,
            generation: quote.generation,
            placed_at: Instant::now(),
            state: OrderState::Pending,
        };
        self.open.insert(client_id.clone(), order);

        let expiration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            + ORDER_EXPIRATION_SECS;
        let salt: u64 = rand::thread_rng().gen();
        let payload = OrderPayload::from_quote(quote, self.signer.address(), salt, expiration);

        let signed = match self.signer.sign(&payload) {
            Ok(s) => s,
            Err(e) => {
                self.open.remove(&client_id);
                return Err(MakerError::Signer(e));
            }
        };

        let submitted_at = Instant::now();
        match self.rest.post_order(&signed).await {
            Ok(ack) if ack.success => {
                histogram!(ORDER_ACK_LATENCY_SECONDS).record(submitted_at.elapsed().as_secs_f64());
                // Re-key from the client id to the venue order id.
                if let Some(mut order) = self.open.remove(&client_id) {
                    order.id = ack.order_id.clone();
                    order.state = OrderState::Open;
                    self.open.insert(ack.order_id.clone(), order);
                }
                counter!(
                    ORDERS_PLACED_TOTAL,
                    "side" => quote.side.as_str(),
                    "outcome" => quote.outcome.as_str()
                )
                .increment(1);
                info!(
                    order_id = %ack.order_id,
                    outcome = quote.outcome.as_str(),
                    price = %quote.price,
                    size = %quote.size,
                    generation = quote.generation,
                    "order placed"
                );
                Ok(())
            }
            Ok(ack) => {
                self.open.remove(&client_id);
                counter!(ORDERS_REJECTED_TOTAL).increment(1);
                warn!(
                    outcome = quote.outcome.as_str(),
                    price = %quote.price,
                    error = ack.error_msg.as_deref().unwrap_or("unspecified"),
                    "order rejected by venue"
                );
                Ok(())
            }
            Err(VenueError::Rejected { status, body }) => {
                self.open.remove(&client_id);
                counter!(ORDERS_REJECTED_TOTAL).increment(1);
                warn!(
                    outcome = quote.outcome.as_str(),
                    price = %quote.price,
                    status,
                    %body,
                    "order rejected by venue"
                );
                Ok(())
            }
            Err(e) => {
                // Transport failure: the order may or may not exist at the
                // venue; reconcile will adopt it if it does.
                self.open.remove(&client_id);
                Err(MakerError::Venue(e))
            }
        }
    }

    // ─────────────────────────────────────────────────
    // Cancellation
    // ─────────────────────────────────────────────────

    /// Cancel one order. Idempotent: a second request for the same id
    /// is a no-op while the first confirmation is pending.
    pub async fn cancel(&mut self, order_id: &str) -> Result<(), MakerError> {
        if !self.open.contains_key(order_id) || self.cancel_requested.contains(order_id) {
            return Ok(());
        }
        let ids = [order_id.to_string()];
        self.batch_cancel(&ids).await
    }

    /// Best-effort batch cancel: per-id failures are logged and do not
    /// abort the batch.
    pub async fn batch_cancel(&mut self, order_ids: &[String]) -> Result<(), MakerError> {
        let ids: Vec<String> = order_ids
            .iter()
            .filter(|id| self.open.contains_key(*id) && !self.cancel_requested.contains(*id))
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        for id in &ids {
            self.cancel_requested.insert(id.clone());
        }

        let ack = match self.rest.cancel_orders(&ids).await {
            Ok(ack) => ack,
            Err(e) if e.is_transient() => {
                // Allow a retry on the next cycle.
                for id in &ids {
                    self.cancel_requested.remove(id);
                }
                return Err(MakerError::Venue(e));
            }
            Err(e) => {
                warn!("batch cancel rejected: {e}");
                for id in &ids {
                    self.cancel_requested.remove(id);
                }
                return Ok(());
            }
        };

        self.apply_cancel_ack(ack);
        Ok(())
    }

    /// Fold a cancel acknowledgement into the open set. "Already
    /// cancelled" refusals still count as Cancelled, never Rejected.
    fn apply_cancel_ack(&mut self, ack: CancelAck) {
        for id in &ack.cancelled {
            self.apply_update(OrderUpdate {
                order_id: id.clone(),
                state: OrderState::Cancelled,
                remaining: None,
            });
        }
        for (id, reason) in &ack.not_cancelled {
            if is_already_cancelled(reason) {
                self.apply_update(OrderUpdate {
                    order_id: id.clone(),
                    state: OrderState::Cancelled,
                    remaining: None,
                });
            } else {
                warn!(order_id = %id, %reason, "cancel not honoured, keeping order tracked");
                self.cancel_requested.remove(id);
            }
        }
    }

    /// Cancel everything for the market and wait for terminal
    /// confirmations, bounded by a 5 s timeout, then abandon.
    pub async fn cancel_all(&mut self) -> Result<(), MakerError> {
        let ids: Vec<String> = self
            .open
            .values()
            .filter(|o| !matches!(o.state, OrderState::Pending))
            .map(|o| o.id.clone())
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        info!(count = ids.len(), "cancelling all open orders");
        self.batch_cancel(&ids).await?;

        let deadline = Instant::now() + CANCEL_ALL_TIMEOUT;
        while !self.open.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            match tokio::time::timeout(remaining, self.update_rx.recv()).await {
                Ok(Some(update)) => self.apply_update(update),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        if self.open.is_empty() {
            info!("all orders confirmed terminal");
        } else {
            warn!(
                abandoned = self.open.len(),
                "cancel-all timed out waiting for confirmations"
            );
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────
    // Reconciliation & aging
    // ─────────────────────────────────────────────────

    /// Replace the local open set with venue truth. Locally tracked
    /// orders the venue no longer knows become Expired; venue orders we
    /// lost track of are adopted.
    pub fn reconcile(&mut self, venue_orders: Vec<VenueOpenOrder>) {
        let venue_ids: HashSet<&str> = venue_orders.iter().map(|o| o.id.as_str()).collect();

        let missing: Vec<String> = self
            .open
            .keys()
            .filter(|id| !venue_ids.contains(id.as_str()))
            .cloned()
            .collect();
        for id in missing {
            warn!(order_id = %id, "order unknown at venue, marking expired");
            self.apply_update(OrderUpdate {
                order_id: id,
                state: OrderState::Expired,
                remaining: None,
            });
        }

        for vo in venue_orders {
            if self.open.contains_key(&vo.id) {
                continue;
            }
            let Some(outcome) = self.market.outcome_of(&vo.token_id) else {
                continue;
            };
            let side = Side::from_wire(&vo.side).unwrap_or(Side::Buy);
            info!(order_id = %vo.id, "adopting order found at venue");
            self.open.insert(
                vo.id.clone(),
                Order {
                    id: vo.id,
                    market_id: self.market.market_id.clone(),
                    token_id: vo.token_id,
                    outcome,
                    side,
                    price: vo.price,
                    size: vo.size,
                    remaining: vo.remaining.unwrap_or(vo.size),
                    // Adopted orders carry generation 0 so the next
                    // cycle replaces them.
                    generation: 0,
                    placed_at: Instant::now(),
                    state: OrderState::Open,
                },
            );
        }
    }

    /// Orders due for cancellation: aged past the lifetime, or left
    /// over from an earlier quote generation.
    pub fn stale_order_ids(&self, now: Instant, current_generation: u64) -> Vec<String> {
        self.open
            .values()
            .filter(|o| {
                matches!(o.state, OrderState::Open | OrderState::PartiallyFilled)
                    && (o.is_aged(now, self.order_lifetime) || o.generation < current_generation)
            })
            .map(|o| o.id.clone())
            .collect()
    }
}

fn is_already_cancelled(reason: &str) -> bool {
    let reason = reason.to_ascii_lowercase();
    reason.contains("already cancel") || reason.contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SignerError;
    use crate::signer::SignedOrder;
    use crate::types::Outcome;
    use rust_decimal_macros::dec;

    struct StubSigner;

    impl OrderSigner for StubSigner {
        fn sign(&self, payload: &OrderPayload) -> Result<SignedOrder, SignerError> {
            Ok(SignedOrder {
                payload: payload.clone(),
                signature: "0xstub".to_string(),
                owner: self.address(),
            })
        }

        fn address(&self) -> String {
            "0x0000000000000000000000000000000000000001".to_string()
        }
    }

    fn market() -> Market {
        Market {
            market_id: "0xmkt".to_string(),
            question: None,
            yes_token_id: "111".to_string(),
            no_token_id: "222".to_string(),
            tick_size: dec!(0.01),
            min_size: dec!(5),
        }
    }

    fn executor() -> OrderExecutor {
        let (_tx, update_rx) = mpsc::channel(16);
        let rest = VenueRestClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        OrderExecutor::new(
            market(),
            rest,
            Arc::new(StubSigner),
            Duration::from_millis(60_000),
            update_rx,
        )
    }

    fn open_order(executor: &mut OrderExecutor, id: &str, generation: u64, age: Duration) -> Order {
        let order = Order {
            id: id.to_string(),
            market_id: "0xmkt".to_string(),
            token_id: "111".to_string(),
            outcome: Outcome::Yes,
            side: Side::Buy,
            price: dec!(0.49),
            size: dec!(100),
            remaining: dec!(100),
            generation,
            placed_at: Instant::now() - age,
            state: OrderState::Open,
        };
        executor.open.insert(id.to_string(), order.clone());
        order
    }

    #[test]
    fn terminal_update_removes_exactly_once() {
        let mut ex = executor();
        open_order(&mut ex, "o-1", 1, Duration::ZERO);

        ex.apply_update(OrderUpdate {
            order_id: "o-1".to_string(),
            state: OrderState::Filled,
            remaining: Some(rust_decimal::Decimal::ZERO),
        });
        assert_eq!(ex.open_order_count(), 0);

        // A replayed terminal event is a no-op.
        ex.apply_update(OrderUpdate {
            order_id: "o-1".to_string(),
            state: OrderState::Filled,
            remaining: None,
        });
        assert_eq!(ex.open_order_count(), 0);
    }

    #[test]
    fn partial_fill_updates_remaining() {
        let mut ex = executor();
        open_order(&mut ex, "o-1", 1, Duration::ZERO);

        ex.apply_update(OrderUpdate {
            order_id: "o-1".to_string(),
            state: OrderState::PartiallyFilled,
            remaining: Some(dec!(40)),
        });
        assert_eq!(ex.open_order_count(), 1);
        assert_eq!(ex.open["o-1"].remaining, dec!(40));
        assert_eq!(ex.open["o-1"].state, OrderState::PartiallyFilled);
    }

    #[test]
    fn aged_order_collected() {
        let mut ex = executor();
        open_order(&mut ex, "old", 5, Duration::from_secs(61));
        open_order(&mut ex, "fresh", 5, Duration::from_secs(1));

        let stale = ex.stale_order_ids(Instant::now(), 5);
        assert_eq!(stale, vec!["old".to_string()]);
    }

    #[test]
    fn earlier_generation_collected() {
        let mut ex = executor();
        open_order(&mut ex, "gen4", 4, Duration::ZERO);
        open_order(&mut ex, "gen5", 5, Duration::ZERO);

        let stale = ex.stale_order_ids(Instant::now(), 5);
        assert_eq!(stale, vec!["gen4".to_string()]);
    }

    #[test]
    fn reconcile_expires_missing_and_adopts_unknown() {
        let mut ex = executor();
        open_order(&mut ex, "ghost", 3, Duration::ZERO);

        ex.reconcile(vec![VenueOpenOrder {
            id: "venue-1".to_string(),
            token_id: "222".to_string(),
            side: "BUY".to_string(),
            price: dec!(0.48),
            size: dec!(50),
            remaining: Some(dec!(50)),
        }]);

        assert!(!ex.open.contains_key("ghost"));
        let adopted = &ex.open["venue-1"];
        assert_eq!(adopted.outcome, Outcome::No);
        assert_eq!(adopted.generation, 0);
        assert_eq!(adopted.state, OrderState::Open);
    }

    #[test]
    fn already_cancelled_reason_detected() {
        assert!(is_already_cancelled("order already cancelled"));
        assert!(is_already_cancelled("Already Canceled"));
        assert!(is_already_cancelled("order not found"));
        assert!(!is_already_cancelled("insufficient permissions"));
    }

    #[tokio::test]
    async fn double_cancel_is_idempotent_without_venue_roundtrip() {
        let mut ex = executor();
        open_order(&mut ex, "o-1", 1, Duration::ZERO);
        ex.cancel_requested.insert("o-1".to_string());

        // The id is already awaiting confirmation, so no REST call is
        // attempted (the stub endpoint would fail the test otherwise).
        ex.cancel("o-1").await.unwrap();
        assert_eq!(ex.open_order_count(), 1);

        // Venue confirmation lands it in Cancelled, not Rejected.
        ex.apply_update(OrderUpdate {
            order_id: "o-1".to_string(),
            state: OrderState::Cancelled,
            remaining: None,
        });
        assert_eq!(ex.open_order_count(), 0);
        assert!(ex.cancel_requested.is_empty());
    }

    #[tokio::test]
    async fn cancel_unknown_order_is_noop() {
        let mut ex = executor();
        ex.cancel("missing").await.unwrap();
        assert_eq!(ex.open_order_count(), 0);
    }

    #[test]
    fn already_cancelled_ack_lands_in_cancelled_not_rejected() {
        let mut ex = executor();
        open_order(&mut ex, "o-1", 1, Duration::ZERO);
        ex.cancel_requested.insert("o-1".to_string());

        let mut not_cancelled = std::collections::HashMap::new();
        not_cancelled.insert("o-1".to_string(), "order already cancelled".to_string());
        ex.apply_cancel_ack(CancelAck {
            cancelled: Vec::new(),
            not_cancelled,
        });

        // Terminal as Cancelled: removed from the open set and no longer
        // awaiting confirmation.
        assert_eq!(ex.open_order_count(), 0);
        assert!(ex.cancel_requested.is_empty());
    }

    #[test]
    fn unhonoured_cancel_keeps_order_tracked() {
        let mut ex = executor();
        open_order(&mut ex, "o-1", 1, Duration::ZERO);
        ex.cancel_requested.insert("o-1".to_string());

        let mut not_cancelled = std::collections::HashMap::new();
        not_cancelled.insert("o-1".to_string(), "insufficient permissions".to_string());
        ex.apply_cancel_ack(CancelAck {
            cancelled: Vec::new(),
            not_cancelled,
        });

        assert_eq!(ex.open_order_count(), 1);
        // Eligible for another cancel attempt next cycle.
        assert!(!ex.cancel_requested.contains("o-1"));
    }
}
