//! Connection supervisor: the single socket writer.
//!
//! Drains the connection outbox in FIFO order, sends periodic Ping frames,
//! and ends the connection when no inbound frame arrives within the liveness
//! timeout. A write that stays pending is abandoned on close or when the
//! liveness deadline passes. Whatever ends the loop, the connection token is cancelled on the
//! way out so the session reader tears down too.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::connection::ClientConnection;
use crate::config::HubConfig;

/// Outcome of the supervisor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Nothing was received within the liveness timeout.
    TimedOut,
    /// The session asked the supervisor to close.
    Cancelled,
    /// Writing to the socket failed.
    WriteFailed,
    /// Every outbox sender is gone.
    OutboxClosed,
}

impl SupervisorOutcome {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::WriteFailed => "write_failed",
            Self::OutboxClosed => "outbox_closed",
        }
    }
}

/// Keepalive timings.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Interval between Ping frames.
    pub ping_interval: Duration,
    /// Close after this long without inbound frames.
    pub liveness_timeout: Duration,
    /// Budget for flushing the outbox and sending Close.
    pub close_grace: Duration,
}

impl From<&HubConfig> for SupervisorConfig {
    fn from(config: &HubConfig) -> Self {
        Self {
            ping_interval: config.ping_interval,
            liveness_timeout: config.liveness_timeout,
            close_grace: config.close_grace,
        }
    }
}

/// Run the supervisor for `conn` until `close` fires or the connection dies.
///
/// On `close`, messages already queued are flushed before the Close frame.
pub async fn run_supervisor<S>(
    conn: Arc<ClientConnection>,
    mut outbox: mpsc::Receiver<Arc<String>>,
    mut sink: S,
    close: CancellationToken,
    config: SupervisorConfig,
) -> SupervisorOutcome
where
    S: Sink<Message> + Unpin,
{
    let mut ping = time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let outcome = loop {
        let deadline = conn.liveness_deadline(config.liveness_timeout);
        tokio::select! {
            biased;
            () = close.cancelled() => break SupervisorOutcome::Cancelled,
            () = time::sleep_until(deadline) => {
                // Contact may have been renewed while we slept.
                if conn.liveness_deadline(config.liveness_timeout) <= Instant::now() {
                    warn!(
                        conn_id = %conn.id,
                        timeout_secs = config.liveness_timeout.as_secs(),
                        "client unresponsive, disconnecting"
                    );
                    break SupervisorOutcome::TimedOut;
                }
            }
            msg = outbox.recv() => match msg {
                Some(text) => {
                    let frame = text_frame(text);
                    if let Err(outcome) = write(&mut sink, frame, &conn, &close, config).await {
                        break outcome;
                    }
                }
                None => break SupervisorOutcome::OutboxClosed,
            },
            _ = ping.tick() => {
                let frame = Message::Ping(Bytes::new());
                if let Err(outcome) = write(&mut sink, frame, &conn, &close, config).await {
                    break outcome;
                }
            }
        }
    };

    conn.cancel();

    if outcome != SupervisorOutcome::WriteFailed {
        let shutdown = async {
            if outcome == SupervisorOutcome::Cancelled {
                while let Ok(text) = outbox.try_recv() {
                    if sink.send(text_frame(text)).await.is_err() {
                        return;
                    }
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        };
        if time::timeout(config.close_grace, shutdown).await.is_err() {
            debug!(conn_id = %conn.id, "close grace elapsed before flush completed");
        }
    }
    let _ = time::timeout(config.close_grace, sink.close()).await;

    debug!(conn_id = %conn.id, outcome = outcome.as_str(), "supervisor exited");
    outcome
}

/// Send one frame, giving up when `close` fires or the liveness deadline
/// passes while the write is still pending.
async fn write<S>(
    sink: &mut S,
    msg: Message,
    conn: &ClientConnection,
    close: &CancellationToken,
    config: SupervisorConfig,
) -> Result<(), SupervisorOutcome>
where
    S: Sink<Message> + Unpin,
{
    let send = sink.send(msg);
    tokio::pin!(send);
    loop {
        let deadline = conn.liveness_deadline(config.liveness_timeout);
        tokio::select! {
            biased;
            sent = &mut send => return sent.map_err(|_| SupervisorOutcome::WriteFailed),
            () = close.cancelled() => return Err(SupervisorOutcome::Cancelled),
            () = time::sleep_until(deadline) => {
                if conn.liveness_deadline(config.liveness_timeout) <= Instant::now() {
                    warn!(conn_id = %conn.id, "socket write stalled past liveness deadline");
                    return Err(SupervisorOutcome::TimedOut);
                }
            }
        }
    }
}

fn text_frame(text: Arc<String>) -> Message {
    Message::Text(Arc::unwrap_or_clone(text).into())
}
