//! Venue WebSocket consumer.
//!
//! Connects to the market channel, subscribes for the traded market's
//! tokens, and routes inbound messages to their owning tasks:
//! book_snapshot/book_delta → BookView, trade → InventoryLedger,
//! order_update → OrderExecutor. Reconnects with exponential backoff
//! (1 s doubling, capped at 30 s); a read idle for 60 s is treated as a
//! dead connection. After every reconnect a REST resync is requested
//! because sequence continuity is lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::messages::{BookEvent, FillEvent, OrderUpdate, ResyncRequest};
use crate::types::{BookSide, Level, Market, OrderState, Side};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const PING_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub ws_url: String,
    pub market: Market,
}

pub struct MarketFeed {
    cfg: FeedConfig,
    book_tx: mpsc::Sender<BookEvent>,
    fill_tx: mpsc::Sender<FillEvent>,
    order_tx: mpsc::Sender<OrderUpdate>,
    resync_tx: mpsc::Sender<ResyncRequest>,
    running: Arc<AtomicBool>,
}

impl MarketFeed {
    pub fn new(
        cfg: FeedConfig,
        book_tx: mpsc::Sender<BookEvent>,
        fill_tx: mpsc::Sender<FillEvent>,
        order_tx: mpsc::Sender<OrderUpdate>,
        resync_tx: mpsc::Sender<ResyncRequest>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cfg,
            book_tx,
            fill_tx,
            order_tx,
            resync_tx,
            running,
        }
    }

    /// Feed main loop: connect, stream, reconnect until shutdown.
    pub async fn run(self) {
        info!(url = %self.cfg.ws_url, "📡 market feed started");
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        let mut first_connect = true;

        while self.running.load(Ordering::Relaxed) {
            match self.connect_and_stream(first_connect).await {
                Ok(()) => {
                    // Clean close (server hangup or shutdown).
                    backoff.reset();
                }
                Err(e) => {
                    warn!("market feed error: {e:#}");
                }
            }
            first_connect = false;

            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            let delay = backoff.next_delay();
            info!(delay_s = delay.as_secs(), "reconnecting market feed");
            sleep(delay).await;
        }
        info!("📡 market feed shutting down");
    }

    async fn connect_and_stream(&self, first_connect: bool) -> anyhow::Result<()> {
        let (ws, response) = match timeout(CONNECT_TIMEOUT, connect_async(&self.cfg.ws_url)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => anyhow::bail!("connect failed: {e}"),
            Err(_) => anyhow::bail!("connect timed out"),
        };
        info!(status = ?response.status(), "market feed connected");

        let (mut write, mut read) = ws.split();

        let subscribe = json!({
            "type": "subscribe",
            "market": self.cfg.market.market_id,
            "assets_ids": [
                self.cfg.market.yes_token_id,
                self.cfg.market.no_token_id,
            ],
            "initial_dump": true,
        });
        write.send(Message::Text(subscribe.to_string())).await?;

        // Sequence continuity is gone after a reconnect; the initial
        // REST snapshot at boot covers the first connection.
        if !first_connect {
            let _ = self.resync_tx.try_send(ResyncRequest);
        }

        // Keepalive pings until the write half errors out.
        let ping = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            loop {
                ticker.tick().await;
                if write.send(Message::Text("PING".to_string())).await.is_err() {
                    break;
                }
            }
        });

        let result = loop {
            if !self.running.load(Ordering::Relaxed) {
                break Ok(());
            }
            match timeout(IDLE_TIMEOUT, read.next()).await {
                Err(_) => break Err(anyhow::anyhow!("read idle for {IDLE_TIMEOUT:?}")),
                Ok(None) => break Ok(()),
                Ok(Some(Err(e))) => break Err(anyhow::anyhow!("read error: {e}")),
                Ok(Some(Ok(Message::Text(text)))) => self.route_text(&text).await,
                Ok(Some(Ok(Message::Close(_)))) => {
                    warn!("market feed closed by server");
                    break Ok(());
                }
                Ok(Some(Ok(_))) => {}
            }
        };

        ping.abort();
        result
    }

    async fn route_text(&self, text: &str) {
        if text.eq_ignore_ascii_case("pong") {
            return;
        }
        // The venue batches messages into arrays.
        let parsed: Result<serde_json::Value, _> = serde_json::from_str(text);
        let Ok(value) = parsed else {
            debug!("unparsable feed frame dropped");
            return;
        };
        let frames = match value {
            serde_json::Value::Array(items) => items,
            other => vec![other],
        };
        for frame in frames {
            match serde_json::from_value::<WsMessage>(frame) {
                Ok(msg) => self.route(msg).await,
                Err(e) => debug!("unrecognized feed message dropped: {e}"),
            }
        }
    }

    async fn route(&self, msg: WsMessage) {
        match msg {
            WsMessage::BookSnapshot(snap) => {
                if !self.is_our_market(snap.market.as_deref()) {
                    return;
                }
                let _ = self
                    .book_tx
                    .send(BookEvent::Snapshot {
                        sequence: snap.sequence,
                        bids: snap.bids,
                        asks: snap.asks,
                    })
                    .await;
            }
            WsMessage::BookDelta(delta) => {
                if !self.is_our_market(delta.market.as_deref()) {
                    return;
                }
                let Some(side) = book_side(&delta.side) else {
                    debug!(side = %delta.side, "delta with unknown side dropped");
                    return;
                };
                let _ = self
                    .book_tx
                    .send(BookEvent::Delta {
                        sequence: delta.sequence,
                        side,
                        price: delta.price,
                        size: delta.size,
                    })
                    .await;
            }
            WsMessage::OrderUpdate(update) => {
                let Some(state) = OrderState::from_wire(&update.status) else {
                    debug!(status = %update.status, "order update with unknown status dropped");
                    return;
                };
                let _ = self
                    .order_tx
                    .send(OrderUpdate {
                        order_id: update.order_id,
                        state,
                        remaining: update.remaining,
                    })
                    .await;
            }
            WsMessage::Trade(trade) => {
                let Some(outcome) = self.cfg.market.outcome_of(&trade.token_id) else {
                    debug!("trade for foreign token dropped");
                    return;
                };
                let Some(side) = Side::from_wire(&trade.side) else {
                    debug!(side = %trade.side, "trade with unknown side dropped");
                    return;
                };
                let _ = self
                    .fill_tx
                    .send(FillEvent {
                        trade_id: trade.trade_id,
                        order_id: trade.order_id.unwrap_or_default(),
                        outcome,
                        side,
                        price: trade.price,
                        size: trade.size,
                    })
                    .await;
            }
            WsMessage::Unknown => {}
        }
    }

    fn is_our_market(&self, market: Option<&str>) -> bool {
        market.map_or(true, |m| m == self.cfg.market.market_id)
    }
}

fn book_side(raw: &str) -> Option<BookSide> {
    if raw.eq_ignore_ascii_case("bid") || raw.eq_ignore_ascii_case("buy") {
        Some(BookSide::Bid)
    } else if raw.eq_ignore_ascii_case("ask") || raw.eq_ignore_ascii_case("sell") {
        Some(BookSide::Ask)
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────
// Wire messages
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsMessage {
    BookSnapshot(BookSnapshotMsg),
    BookDelta(BookDeltaMsg),
    OrderUpdate(OrderUpdateMsg),
    Trade(TradeMsg),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct BookSnapshotMsg {
    #[serde(default)]
    market: Option<String>,
    sequence: u64,
    bids: Vec<Level>,
    asks: Vec<Level>,
}

#[derive(Debug, Deserialize)]
struct BookDeltaMsg {
    #[serde(default)]
    market: Option<String>,
    sequence: u64,
    side: String,
    price: Decimal,
    #[serde(alias = "new_size")]
    size: Decimal,
}

#[derive(Debug, Deserialize)]
struct OrderUpdateMsg {
    order_id: String,
    status: String,
    #[serde(default, alias = "size_remaining")]
    remaining: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct TradeMsg {
    trade_id: String,
    token_id: String,
    side: String,
    price: Decimal,
    size: Decimal,
    #[serde(default)]
    order_id: Option<String>,
}

// ─────────────────────────────────────────────────────────
// Reconnect backoff
// ─────────────────────────────────────────────────────────

/// Exponential backoff: base, 2·base, 4·base, … capped.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32 << self.attempt.min(16);
        let delay = self.base.saturating_mul(factor).min(self.cap);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

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

    fn feed() -> (
        MarketFeed,
        mpsc::Receiver<BookEvent>,
        mpsc::Receiver<FillEvent>,
        mpsc::Receiver<OrderUpdate>,
    ) {
        let (book_tx, book_rx) = mpsc::channel(16);
        let (fill_tx, fill_rx) = mpsc::channel(16);
        let (order_tx, order_rx) = mpsc::channel(16);
        let (resync_tx, _resync_rx) = mpsc::channel(4);
        let feed = MarketFeed::new(
            FeedConfig {
                ws_url: "wss://example/ws".to_string(),
                market: market(),
            },
            book_tx,
            fill_tx,
            order_tx,
            resync_tx,
            Arc::new(AtomicBool::new(true)),
        );
        (feed, book_rx, fill_rx, order_rx)
    }

    #[tokio::test]
    async fn routes_book_snapshot() {
        let (feed, mut book_rx, _f, _o) = feed();
        let frame = json!({
            "type": "book_snapshot",
            "market": "0xmkt",
            "sequence": 9,
            "bids": [{"price": "0.49", "size": "100"}],
            "asks": [{"price": "0.51", "size": "100"}]
        });
        feed.route_text(&frame.to_string()).await;

        match book_rx.try_recv().unwrap() {
            BookEvent::Snapshot { sequence, bids, .. } => {
                assert_eq!(sequence, 9);
                assert_eq!(bids[0].price, dec!(0.49));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn routes_delta_with_new_size_alias() {
        let (feed, mut book_rx, _f, _o) = feed();
        let frame = json!({
            "type": "book_delta",
            "market": "0xmkt",
            "sequence": 10,
            "side": "bid",
            "price": "0.48",
            "new_size": "0"
        });
        feed.route_text(&frame.to_string()).await;

        match book_rx.try_recv().unwrap() {
            BookEvent::Delta {
                sequence,
                side,
                size,
                ..
            } => {
                assert_eq!(sequence, 10);
                assert_eq!(side, BookSide::Bid);
                assert!(size.is_zero());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn routes_trade_to_fills_and_maps_outcome() {
        let (feed, _b, mut fill_rx, _o) = feed();
        let frame = json!([{
            "type": "trade",
            "trade_id": "t-77",
            "token_id": "222",
            "side": "BUY",
            "price": "0.47",
            "size": "25",
            "order_id": "o-3"
        }]);
        feed.route_text(&frame.to_string()).await;

        let fill = fill_rx.try_recv().unwrap();
        assert_eq!(fill.trade_id, "t-77");
        assert_eq!(fill.outcome, crate::types::Outcome::No);
        assert_eq!(fill.size, dec!(25));
    }

    #[tokio::test]
    async fn routes_order_update_and_ignores_unknown_status() {
        let (feed, _b, _f, mut order_rx) = feed();
        feed.route_text(
            &json!({
                "type": "order_update",
                "order_id": "o-1",
                "status": "CANCELED",
                "size_remaining": "0"
            })
            .to_string(),
        )
        .await;
        let update = order_rx.try_recv().unwrap();
        assert_eq!(update.state, OrderState::Cancelled);

        feed.route_text(
            &json!({
                "type": "order_update",
                "order_id": "o-2",
                "status": "SOMETHING_NEW"
            })
            .to_string(),
        )
        .await;
        assert!(order_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn foreign_market_and_token_dropped() {
        let (feed, mut book_rx, mut fill_rx, _o) = feed();
        feed.route_text(
            &json!({
                "type": "book_snapshot",
                "market": "0xother",
                "sequence": 1,
                "bids": [],
                "asks": []
            })
            .to_string(),
        )
        .await;
        assert!(book_rx.try_recv().is_err());

        feed.route_text(
            &json!({
                "type": "trade",
                "trade_id": "t-1",
                "token_id": "999",
                "side": "SELL",
                "price": "0.50",
                "size": "1"
            })
            .to_string(),
        )
        .await;
        assert!(fill_rx.try_recv().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(8));
        assert_eq!(b.next_delay(), Duration::from_secs(16));
        assert_eq!(b.next_delay(), Duration::from_secs(30));
        assert_eq!(b.next_delay(), Duration::from_secs(30));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }
}
