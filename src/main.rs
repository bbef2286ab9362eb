//! Orchestrator binary.
//!
//! Startup: config → logging → metrics → market discovery → signer →
//! initial book snapshot → spawn the feed, book, inventory, refill and
//! redemption tasks → run the cancel-replace loop in the foreground.
//!
//! Shutdown: SIGINT/SIGTERM clears the shared running flag; every loop
//! exits at its next check, the executor cancels resting orders, and a
//! 10 s grace period bounds the wait before tasks are aborted.
//!
//! Exit codes: 0 clean, 1 configuration, 2 unrecoverable venue error,
//! 3 signer error.

use std::net::ToSocketAddrs;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use polymarket_mm::book::{run_refill, BookView};
use polymarket_mm::config::Settings;
use polymarket_mm::cycle::CancelReplaceLoop;
use polymarket_mm::error::{MakerError, SignerError, VenueError};
use polymarket_mm::executor::OrderExecutor;
use polymarket_mm::feed::{FeedConfig, MarketFeed};
use polymarket_mm::inventory::{InventoryLedger, InventorySnapshot};
use polymarket_mm::messages::BookEvent;
use polymarket_mm::metrics;
use polymarket_mm::quote::{QuoteEngine, QuoteParams};
use polymarket_mm::redeem::PositionRedeemer;
use polymarket_mm::rest::{VenueRestClient, DEFAULT_HTTP_TIMEOUT};
use polymarket_mm::signer::{LocalKeySigner, OrderSigner};
use polymarket_mm::types::{BookSnapshot, Market};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let settings = match Settings::from_env() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let _log_guard = init_tracing(&settings);

    let rest = match VenueRestClient::new(&settings.polymarket_api_url, DEFAULT_HTTP_TIMEOUT) {
        Ok(r) => r,
        Err(e) => {
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let signer: Arc<dyn OrderSigner> = match LocalKeySigner::from_key(&settings.private_key) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            // A key that never parses is a configuration problem, not a
            // runtime signing failure.
            error!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(settings, rest, signer)) {
        Ok(()) => {
            info!("clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal: {e}");
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(e: &MakerError) -> u8 {
    match e {
        MakerError::Venue(_) => 2,
        MakerError::Signer(SignerError::InvalidKey(_)) => 1,
        MakerError::Signer(_) => 3,
    }
}

async fn run(
    settings: Settings,
    rest: VenueRestClient,
    signer: Arc<dyn OrderSigner>,
) -> Result<(), MakerError> {
    let running = Arc::new(AtomicBool::new(true));
    let mut aux_tasks: Vec<JoinHandle<()>> = Vec::new();

    // Metrics endpoint.
    match metrics::install() {
        Ok(handle) => {
            let host_port = format!("{}:{}", settings.metrics_host, settings.metrics_port);
            match host_port.to_socket_addrs().ok().and_then(|mut a| a.next()) {
                Some(addr) => aux_tasks.push(tokio::spawn(metrics::serve(handle, addr))),
                None => warn!(%host_port, "unresolvable metrics address, endpoint disabled"),
            }
        }
        Err(e) => warn!("metrics recorder unavailable: {e}"),
    }

    // Market discovery.
    let market = discover_market(&rest, &settings).await?;
    info!(
        market = %market.market_id,
        question = market.question.as_deref().unwrap_or("-"),
        tick = %market.tick_size,
        "🎯 market discovered"
    );

    // Channel wiring.
    let (book_event_tx, book_event_rx) = mpsc::channel(256);
    let (resync_tx, resync_rx) = mpsc::channel(4);
    let (fill_tx, fill_rx) = mpsc::channel(64);
    let (order_update_tx, order_update_rx) = mpsc::channel(256);
    let (book_watch_tx, book_watch_rx) = watch::channel(BookSnapshot::default());
    let (inv_watch_tx, inv_watch_rx) = watch::channel(InventorySnapshot::default());

    // Book owner + REST refill.
    let book_view = BookView::new(book_event_rx, book_watch_tx, resync_tx.clone());
    aux_tasks.push(tokio::spawn(book_view.run()));
    aux_tasks.push(tokio::spawn(run_refill(
        rest.clone(),
        market.market_id.clone(),
        resync_rx,
        book_event_tx.clone(),
        running.clone(),
    )));

    // Seed the book from REST before quoting starts.
    let initial_book = fetch_initial_book(&rest, &market).await?;
    let _ = book_event_tx
        .send(BookEvent::Snapshot {
            sequence: initial_book.sequence,
            bids: initial_book.bids,
            asks: initial_book.asks,
        })
        .await;

    // Inventory owner.
    let ledger = InventoryLedger::new(fill_rx, inv_watch_tx);
    aux_tasks.push(tokio::spawn(ledger.run()));

    // Live feed.
    let feed = MarketFeed::new(
        FeedConfig {
            ws_url: settings.polymarket_ws_url.clone(),
            market: market.clone(),
        },
        book_event_tx.clone(),
        fill_tx,
        order_update_tx,
        resync_tx.clone(),
        running.clone(),
    );
    aux_tasks.push(tokio::spawn(feed.run()));

    // Redemption sweeper.
    let redeemer = PositionRedeemer::new(
        rest.clone(),
        signer.address(),
        settings.auto_redeem_enabled,
        settings.redeem_threshold_usd,
        running.clone(),
    );
    aux_tasks.push(tokio::spawn(redeemer.run()));

    // Executor with boot reconcile against venue truth.
    let mut executor = OrderExecutor::new(
        market.clone(),
        rest.clone(),
        signer.clone(),
        Duration::from_millis(settings.order_lifetime_ms),
        order_update_rx,
    );
    match rest
        .open_orders(&signer.address(), Some(market.market_id.as_str()))
        .await
    {
        Ok(venue_orders) => executor.reconcile(venue_orders),
        Err(e) if e.is_transient() => {
            warn!("boot reconcile skipped, will retry periodically: {e}")
        }
        Err(e) => return Err(MakerError::Venue(e)),
    }

    let engine = QuoteEngine::new(QuoteParams::from_settings(&settings));
    let cycle = CancelReplaceLoop::new(
        &settings,
        market,
        engine,
        executor,
        rest,
        book_watch_rx,
        inv_watch_rx,
        resync_tx,
        running.clone(),
    );

    info!("🚀 tasks spawned, entering cancel-replace loop");
    let mut cycle_task = tokio::spawn(cycle.run());

    let outcome = tokio::select! {
        res = &mut cycle_task => join_outcome(res),
        _ = shutdown_signal() => {
            info!("shutdown signal received");
            running.store(false, Ordering::Relaxed);
            match timeout(SHUTDOWN_GRACE, &mut cycle_task).await {
                Ok(res) => join_outcome(res),
                Err(_) => {
                    warn!("grace period elapsed, aborting trading loop");
                    cycle_task.abort();
                    Ok(())
                }
            }
        }
    };

    running.store(false, Ordering::Relaxed);
    for task in aux_tasks {
        task.abort();
    }
    outcome
}

fn join_outcome(
    res: Result<Result<(), MakerError>, tokio::task::JoinError>,
) -> Result<(), MakerError> {
    match res {
        Ok(result) => result,
        Err(e) => {
            error!("trading loop task failed: {e}");
            Err(MakerError::Venue(VenueError::Malformed(
                "trading loop aborted unexpectedly".to_string(),
            )))
        }
    }
}

/// Boot book fetch with a few retries so a momentary venue blip does
/// not kill the process during startup.
async fn fetch_initial_book(
    rest: &VenueRestClient,
    market: &Market,
) -> Result<polymarket_mm::rest::BookPayload, MakerError> {
    let mut last_err = None;
    for attempt in 1..=3u32 {
        match rest.book(&market.market_id).await {
            Ok(payload) => return Ok(payload),
            Err(e) if e.is_transient() => {
                warn!(attempt, "initial book fetch failed: {e}");
                last_err = Some(e);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            Err(e) => return Err(MakerError::Venue(e)),
        }
    }
    Err(MakerError::Venue(last_err.unwrap_or(VenueError::Upstream {
        status: 503,
    })))
}

async fn discover_market(rest: &VenueRestClient, settings: &Settings) -> Result<Market, MakerError> {
    if !settings.market_discovery_enabled {
        let info = rest.market(&settings.market_id).await?;
        return Ok(info.into_market());
    }

    let markets = rest.markets(true, false).await?;
    let found = markets.into_iter().find(|m| m.id == settings.market_id);
    match found {
        Some(info) => Ok(info.into_market()),
        None => {
            error!(market_id = %settings.market_id, "market not found among active markets");
            Err(MakerError::Venue(VenueError::Rejected {
                status: 404,
                body: format!("market {} not active", settings.market_id),
            }))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

fn init_tracing(settings: &Settings) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level));

    if let Ok(dir) = std::env::var("LOG_DIR") {
        let file = tracing_appender::rolling::daily(dir, "polymarket-mm.log");
        let (writer, guard) = tracing_appender::non_blocking(file);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        None
    }
}
