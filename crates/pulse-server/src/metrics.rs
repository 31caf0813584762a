//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Build a handle without installing a global recorder (tests, embedding).
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: kind).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Connection lifetime seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Upgrade requests rejected before the handshake (counter, labels: reason).
pub const WS_REJECTED_TOTAL: &str = "ws_rejected_total";
/// Messages dropped on a full outbox (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Live events ingested (counter).
pub const EVENTS_INGESTED_TOTAL: &str = "events_ingested_total";
/// Live-event envelopes enqueued to connections (counter).
pub const EVENTS_DELIVERED_TOTAL: &str = "events_delivered_total";
/// Document status notifications published (counter).
pub const DOCUMENT_STATUS_TOTAL: &str = "document_status_total";
/// Analytics snapshots pushed (counter).
pub const ANALYTICS_PUSHES_TOTAL: &str = "analytics_pushes_total";
/// Analytics fetch failures (counter).
pub const ANALYTICS_FETCH_ERRORS_TOTAL: &str = "analytics_fetch_errors_total";
/// Running analytics tickers (gauge).
pub const ANALYTICS_TICKERS_ACTIVE: &str = "analytics_tickers_active";
/// Job status polls issued (counter).
pub const JOB_POLLS_TOTAL: &str = "job_polls_total";
/// Job status query failures (counter).
pub const JOB_POLL_ERRORS_TOTAL: &str = "job_poll_errors_total";
