//! WebSocket session lifecycle: handles a single connected client from
//! upgrade through disconnect.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::connection::ClientConnection;
use super::heartbeat::{SupervisorOutcome, run_supervisor};
use crate::hub::NotificationHub;
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL,
};

/// Frames a client may send. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Application-level keepalive.
    Ping,
    /// Ask the server to close the connection.
    Unsubscribe,
}

/// Parse a client text frame.
pub fn parse_client_frame(text: &str) -> Option<ClientFrame> {
    serde_json::from_str(text).ok()
}

/// Finalizes the connection on every exit path, panics included.
struct SessionGuard {
    hub: Arc<NotificationHub>,
    conn: Arc<ClientConnection>,
    close: CancellationToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let _ = self.hub.registry().deregister(&self.conn.id);
        self.conn.cancel();
        self.close.cancel();
        self.conn.mark_closed();
    }
}

/// Run a WebSocket session for a registered connection.
///
/// `connection_established` is already queued by the hub at registration.
///
/// 1. Attaches the analytics ticker or starts the job bridge
/// 2. Spawns the supervisor (single writer, pings, liveness timeout)
/// 3. Reads inbound frames until close, error or cancellation
/// 4. Deregisters, then lets the supervisor flush and close the socket
#[instrument(skip_all, fields(conn_id = %conn.id, tenant_id = %conn.tenant_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    conn: Arc<ClientConnection>,
    outbox: mpsc::Receiver<Arc<String>>,
    hub: Arc<NotificationHub>,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let close = CancellationToken::new();
    let guard = SessionGuard {
        hub: hub.clone(),
        conn: conn.clone(),
        close: close.clone(),
    };

    let started = Instant::now();
    let kind = if conn.job_id().is_some() { "job" } else { "events" };
    info!(kind, user_id = %conn.user_id, "client connected");
    counter!(WS_CONNECTIONS_TOTAL, "kind" => kind).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let analytics = conn
        .wants_analytics()
        .then(|| hub.attach_analytics(&conn.tenant_id));
    let bridge = hub.spawn_job_bridge(conn.clone());
    let supervisor = tokio::spawn(run_supervisor(
        conn.clone(),
        outbox,
        ws_tx,
        close.clone(),
        hub.supervisor_config(),
    ));

    let cancel = conn.cancellation_token().clone();
    let mut reason = loop {
        tokio::select! {
            () = cancel.cancelled() => break "cancelled",
            frame = ws_rx.next() => match frame {
                Some(Ok(msg)) => {
                    conn.touch();
                    match msg {
                        Message::Text(text) => match parse_client_frame(text.as_str()) {
                            Some(ClientFrame::Unsubscribe) => break "unsubscribe",
                            Some(ClientFrame::Ping) => {}
                            None => debug!(len = text.len(), "ignoring unrecognized client frame"),
                        },
                        Message::Close(_) => break "client_close",
                        Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => {}
                    }
                }
                Some(Err(e)) => {
                    debug!(error = %e, "websocket read error");
                    break "read_error";
                }
                None => break "eof",
            }
        }
    };

    // Leave the registry before the transport closes.
    let _ = hub.registry().deregister(&conn.id);
    conn.cancel();
    drop(analytics);
    if let Some(bridge) = bridge {
        if let Ok(outcome) = bridge.await {
            debug!(?outcome, "job bridge finished");
        }
    }
    close.cancel();
    let outcome = supervisor.await.unwrap_or(SupervisorOutcome::WriteFailed);
    drop(guard);

    if reason == "cancelled" && outcome != SupervisorOutcome::Cancelled {
        reason = outcome.as_str();
    }
    info!(
        reason,
        dropped = conn.drop_count(),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL, "reason" => reason).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_frames() {
        assert_eq!(parse_client_frame(r#"{"type":"ping"}"#), Some(ClientFrame::Ping));
        assert_eq!(
            parse_client_frame(r#"{"type":"unsubscribe"}"#),
            Some(ClientFrame::Unsubscribe)
        );
    }

    #[test]
    fn extra_fields_are_tolerated() {
        assert_eq!(
            parse_client_frame(r#"{"type":"ping","ts":123}"#),
            Some(ClientFrame::Ping)
        );
    }

    #[test]
    fn unknown_frames_are_ignored() {
        assert_eq!(parse_client_frame(r#"{"type":"subscribe"}"#), None);
        assert_eq!(parse_client_frame("not json"), None);
        assert_eq!(parse_client_frame(r#"{"kind":"ping"}"#), None);
    }
}
