//! Prometheus metric names, descriptions, and the scrape endpoint.
//!
//! The `metrics` facade keeps recording fire-and-forget from any task;
//! the exporter handle renders the registry for `GET /metrics`.

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use metrics::{describe_counter, describe_gauge, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::{error, info};

// Counters
pub const ORDERS_PLACED_TOTAL: &str = "orders_placed_total";
pub const ORDERS_FILLED_TOTAL: &str = "orders_filled_total";
pub const ORDERS_CANCELLED_TOTAL: &str = "orders_cancelled_total";
pub const ORDERS_REJECTED_TOTAL: &str = "orders_rejected_total";
pub const BOOK_RESYNCS_TOTAL: &str = "book_resyncs_total";
pub const FILLS_DEDUPLICATED_TOTAL: &str = "fills_deduplicated_total";

// Gauges
pub const INVENTORY: &str = "inventory";
pub const EXPOSURE_USD: &str = "exposure_usd";
pub const SPREAD_BPS: &str = "spread_bps";
pub const PROFIT_USD: &str = "profit_usd";

// Histograms
pub const QUOTE_CYCLE_DURATION_SECONDS: &str = "quote_cycle_duration_seconds";
pub const ORDER_ACK_LATENCY_SECONDS: &str = "order_ack_latency_seconds";

/// Install the Prometheus recorder and describe the metric set.
pub fn install() -> Result<PrometheusHandle, anyhow::Error> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    describe_counter!(ORDERS_PLACED_TOTAL, "Orders placed, by side and outcome");
    describe_counter!(ORDERS_FILLED_TOTAL, "Orders fully filled, by side and outcome");
    describe_counter!(ORDERS_CANCELLED_TOTAL, "Orders cancelled");
    describe_counter!(ORDERS_REJECTED_TOTAL, "Orders rejected by the venue or risk gate");
    describe_counter!(BOOK_RESYNCS_TOTAL, "Orderbook resyncs after gaps or crossed books");
    describe_counter!(FILLS_DEDUPLICATED_TOTAL, "Duplicate fill events dropped");
    describe_gauge!(INVENTORY, "Current position size, by outcome type");
    describe_gauge!(EXPOSURE_USD, "Net USD exposure");
    describe_gauge!(SPREAD_BPS, "Observed spread in basis points");
    describe_gauge!(PROFIT_USD, "Realized profit in USD");
    describe_histogram!(
        QUOTE_CYCLE_DURATION_SECONDS,
        Unit::Seconds,
        "Duration of one cancel-replace cycle"
    );
    describe_histogram!(
        ORDER_ACK_LATENCY_SECONDS,
        Unit::Seconds,
        "Time from order submission to venue acknowledgement"
    );

    Ok(handle)
}

/// Serve `GET /metrics` until the process exits.
pub async fn serve(handle: PrometheusHandle, addr: SocketAddr) {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, "failed to bind metrics endpoint: {e}");
            return;
        }
    };
    info!(%addr, "📈 metrics endpoint listening");
    if let Err(e) = axum::serve(listener, app).await {
        error!("metrics endpoint terminated: {e}");
    }
}
