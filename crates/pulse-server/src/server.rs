//! `PulseServer`: Axum HTTP + `WebSocket` server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use pulse_core::{AnalyticsSource, JobStatusSource};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::config::HubConfig;
use crate::health::{self, HealthResponse};
use crate::hub::NotificationHub;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// The notification hub.
    pub hub: Arc<NotificationHub>,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle for `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The main Pulse server.
pub struct PulseServer {
    hub: Arc<NotificationHub>,
    metrics: PrometheusHandle,
    start_time: Instant,
}

impl PulseServer {
    /// Create a new server.
    pub fn new(
        config: HubConfig,
        analytics: Arc<dyn AnalyticsSource>,
        jobs: Arc<dyn JobStatusSource>,
        metrics: PrometheusHandle,
    ) -> Self {
        Self {
            hub: Arc::new(NotificationHub::new(config, analytics, jobs)),
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            hub: self.hub.clone(),
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .route("/ws/events", get(api::ws::events_upgrade))
            .route("/ws/jobs/{job_id}", get(api::ws::job_upgrade))
            .route("/api/events", post(api::events::ingest_event))
            .route(
                "/api/documents/{document_id}/status",
                post(api::events::document_status),
            )
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Bind the configured address and serve until hub shutdown.
    ///
    /// Returns the bound address (useful with port `0`) and the serve task.
    pub async fn listen(&self) -> std::io::Result<(SocketAddr, JoinHandle<()>)> {
        let config = self.hub.config();
        let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
        let addr = listener.local_addr()?;
        info!(%addr, "pulse hub listening");

        let router = self.router();
        let token = self.hub.shutdown_coordinator().token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "http server failed");
            }
        });
        Ok((addr, handle))
    }

    /// The notification hub.
    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Get the server configuration.
    pub fn config(&self) -> &HubConfig {
        self.hub.config()
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let hub = &state.hub;
    Json(health::health_check(
        state.start_time,
        hub.registry().len(),
        hub.registry().tenant_count(),
        hub.analytics().active_tickers(),
        hub.is_shutting_down(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::render(&state.metrics),
    )
}
