//! `WebSocket` upgrade handlers.
//!
//! Identity, filter parsing and the connection cap are all checked before
//! the handshake completes, so a rejected client gets a plain HTTP error.

use axum::extract::ws::{WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use pulse_core::{FilterQuery, HubError, JobId, StreamFilter};
use serde::Deserialize;
use tracing::warn;

use super::errors::ApiError;
use super::identity::Identity;
use crate::metrics::WS_REJECTED_TOTAL;
use crate::server::AppState;
use crate::websocket::connection::{ConnectionParams, Subscription};
use crate::websocket::session::run_ws_session;

/// Non-filter options of the event-stream upgrade.
#[derive(Debug, Default, Deserialize)]
pub struct StreamOptions {
    /// Receive periodic analytics snapshots (default `true`).
    #[serde(default)]
    pub analytics: Option<String>,
}

impl StreamOptions {
    /// Resolve the analytics flag.
    pub fn analytics(&self) -> Result<bool, HubError> {
        match self.analytics.as_deref().map(str::trim) {
            None | Some("") => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
            Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
            Some(v) => Err(HubError::Validation(format!(
                "analytics must be true or false, got {v:?}"
            ))),
        }
    }
}

/// GET /ws/events
pub async fn events_upgrade(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<FilterQuery>,
    Query(options): Query<StreamOptions>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let filter = StreamFilter::from_query(&query)
        .map_err(|e| rejected("invalid_filter", ApiError::Hub(e.into())))?;
    let analytics = options
        .analytics()
        .map_err(|e| rejected("invalid_filter", e.into()))?;
    let subscription = Subscription::Events { filter, analytics };
    upgrade(state, identity, subscription, ws)
}

/// GET /ws/jobs/{job_id}
pub async fn job_upgrade(
    State(state): State<AppState>,
    identity: Identity,
    Path(job_id): Path<String>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let subscription = Subscription::Job {
        job_id: JobId::from(job_id),
    };
    upgrade(state, identity, subscription, ws)
}

fn upgrade(
    state: AppState,
    identity: Identity,
    subscription: Subscription,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            counter!(WS_REJECTED_TOTAL, "reason" => "not_upgradable").increment(1);
            return Ok(rejection.into_response());
        }
    };

    let params = ConnectionParams {
        tenant_id: identity.tenant_id,
        user_id: identity.user_id,
        subscription,
    };
    let (conn, outbox) = state
        .hub
        .open_connection(params)
        .map_err(|e| rejected("capacity", e.into()))?;

    let hub = state.hub.clone();
    let failed = (state.hub.clone(), conn.clone());
    let response = ws
        .max_message_size(state.hub.config().max_message_size)
        .on_failed_upgrade(move |e| {
            let (hub, conn) = failed;
            warn!(conn_id = %conn.id, error = %e, "websocket upgrade failed");
            hub.close_connection(&conn);
            conn.mark_closed();
        })
        .on_upgrade(move |socket| run_ws_session(socket, conn, outbox, hub));
    Ok(response)
}

fn rejected(reason: &'static str, err: ApiError) -> ApiError {
    counter!(WS_REJECTED_TOTAL, "reason" => reason).increment(1);
    warn!(reason, error = %err, "websocket upgrade rejected");
    err
}
