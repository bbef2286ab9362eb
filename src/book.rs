//! BookView — owns the orderbook for the traded market.
//!
//! Consumes snapshot/delta events from the feed (and the REST refill
//! task), applies them in sequence order, and publishes an immutable
//! `BookSnapshot` on a watch channel after every change. Consumers never
//! touch the mutable maps; they clone the latest published snapshot.
//!
//! Sequence rules:
//!   delta.sequence <= current      → dropped (already applied)
//!   delta.sequence == current + 1  → applied (size 0 removes the level)
//!   delta.sequence >  current + 1  → gap: mark stale, request REST resync
//!
//! A crossed book (best_bid >= best_ask) is also marked stale; quoting
//! stays suspended until the next clean snapshot.

use std::collections::BTreeMap;
use std::time::Instant;

use metrics::counter;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::messages::{BookEvent, ResyncRequest};
use crate::metrics::BOOK_RESYNCS_TOTAL;
use crate::types::{BookSide, BookSnapshot, Level};

pub struct BookView {
    bids: BTreeMap<Decimal, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
    sequence: u64,
    stale: bool,
    synced: bool,
    event_rx: mpsc::Receiver<BookEvent>,
    snapshot_tx: watch::Sender<BookSnapshot>,
    resync_tx: mpsc::Sender<ResyncRequest>,
}

impl BookView {
    pub fn new(
        event_rx: mpsc::Receiver<BookEvent>,
        snapshot_tx: watch::Sender<BookSnapshot>,
        resync_tx: mpsc::Sender<ResyncRequest>,
    ) -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence: 0,
            stale: true,
            synced: false,
            event_rx,
            snapshot_tx,
            resync_tx,
        }
    }

    /// Actor main loop. Runs until the event channel is closed.
    pub async fn run(mut self) {
        info!("📖 BookView started");
        while let Some(event) = self.event_rx.recv().await {
            self.apply(event);
            let _ = self.snapshot_tx.send(self.snapshot());
        }
        info!("📖 BookView shutting down (channel closed)");
    }

    fn apply(&mut self, event: BookEvent) {
        match event {
            BookEvent::Snapshot {
                sequence,
                bids,
                asks,
            } => self.apply_snapshot(sequence, bids, asks),
            BookEvent::Delta {
                sequence,
                side,
                price,
                size,
            } => self.apply_delta(sequence, side, price, size),
        }
    }

    fn apply_snapshot(&mut self, sequence: u64, bids: Vec<Level>, asks: Vec<Level>) {
        self.bids = bids.into_iter().map(|l| (l.price, l.size)).collect();
        self.asks = asks.into_iter().map(|l| (l.price, l.size)).collect();
        self.sequence = sequence;
        self.synced = true;
        self.stale = false;

        if self.is_crossed() {
            warn!(
                sequence,
                best_bid = %fmt_opt(self.best_bid()),
                best_ask = %fmt_opt(self.best_ask()),
                "crossed snapshot — book marked stale"
            );
            self.mark_stale();
        } else {
            debug!(
                sequence,
                bids = self.bids.len(),
                asks = self.asks.len(),
                "book snapshot applied"
            );
        }
    }

    fn apply_delta(&mut self, sequence: u64, side: BookSide, price: Decimal, size: Decimal) {
        if !self.synced || self.stale {
            // Waiting for a clean snapshot; deltas cannot be trusted.
            debug!(sequence, "delta dropped (book not synced)");
            return;
        }
        if sequence <= self.sequence {
            debug!(sequence, current = self.sequence, "stale delta dropped");
            return;
        }
        if sequence > self.sequence + 1 {
            warn!(
                sequence,
                current = self.sequence,
                "sequence gap — book marked stale, requesting snapshot"
            );
            self.mark_stale();
            return;
        }

        let levels = match side {
            BookSide::Bid => &mut self.bids,
            BookSide::Ask => &mut self.asks,
        };
        if size.is_zero() {
            levels.remove(&price);
        } else {
            levels.insert(price, size);
        }
        self.sequence = sequence;

        if self.is_crossed() {
            warn!(
                sequence,
                best_bid = %fmt_opt(self.best_bid()),
                best_ask = %fmt_opt(self.best_ask()),
                "delta crossed the book — marked stale"
            );
            self.mark_stale();
        }
    }

    fn mark_stale(&mut self) {
        self.stale = true;
        counter!(BOOK_RESYNCS_TOTAL).increment(1);
        // A request may already be in flight; a full channel is fine.
        let _ = self.resync_tx.try_send(ResyncRequest);
    }

    fn best_bid(&self) -> Option<Decimal> {
        self.bids.iter().next_back().map(|(p, _)| *p)
    }

    fn best_ask(&self) -> Option<Decimal> {
        self.asks.iter().next().map(|(p, _)| *p)
    }

    fn is_crossed(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid >= ask,
            _ => false,
        }
    }

    fn snapshot(&self) -> BookSnapshot {
        BookSnapshot {
            bids: self
                .bids
                .iter()
                .rev()
                .map(|(p, s)| Level { price: *p, size: *s })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(p, s)| Level { price: *p, size: *s })
                .collect(),
            sequence: self.sequence,
            stale: self.stale || !self.synced,
            updated_at: Instant::now(),
        }
    }
}

fn fmt_opt(v: Option<Decimal>) -> String {
    v.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Refill task: serves resync requests by fetching a REST snapshot and
/// feeding it back into the book channel. Transient fetch errors retry
/// with a short pause; the request is not dropped until served.
pub async fn run_refill(
    rest: crate::rest::VenueRestClient,
    market_id: String,
    mut resync_rx: mpsc::Receiver<ResyncRequest>,
    book_tx: mpsc::Sender<BookEvent>,
    running: std::sync::Arc<std::sync::atomic::AtomicBool>,
) {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    while let Some(ResyncRequest) = resync_rx.recv().await {
        loop {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            match rest.book(&market_id).await {
                Ok(payload) => {
                    debug!(sequence = payload.sequence, "REST book refill fetched");
                    let _ = book_tx
                        .send(BookEvent::Snapshot {
                            sequence: payload.sequence,
                            bids: payload.bids,
                            asks: payload.asks,
                        })
                        .await;
                    break;
                }
                Err(e) if e.is_transient() => {
                    warn!("book refill failed, retrying: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Err(e) => {
                    warn!("book refill rejected by venue: {e}");
                    break;
                }
            }
        }
    }
}
