//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use parking_lot::Mutex;
use pulse_core::{ConnectionId, Envelope, JobId, StreamFilter, TenantId, UserId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::metrics::WS_BROADCAST_DROPS_TOTAL;

/// Lifecycle state of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    /// Upgraded, not yet registered.
    Connecting = 0,
    /// Registered and eligible for pushes.
    Open = 1,
    /// Deregistered, transport shutting down.
    Closing = 2,
    /// Transport closed.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

/// What a connection is subscribed to.
#[derive(Clone, Debug, PartialEq)]
pub enum Subscription {
    /// Tenant event stream narrowed by a filter.
    Events {
        /// Immutable per-connection filter.
        filter: StreamFilter,
        /// Whether periodic analytics snapshots are wanted.
        analytics: bool,
    },
    /// Status stream for a single job.
    Job {
        /// Watched job.
        job_id: JobId,
    },
}

/// Everything the registry needs to admit a connection.
#[derive(Clone, Debug)]
pub struct ConnectionParams {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Subscription kind.
    pub subscription: Subscription,
}

/// Result of a non-blocking push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Enqueued on the outbox.
    Queued,
    /// Outbox full; message dropped.
    Dropped,
    /// Connection closing or closed; teardown has been triggered.
    Closed,
}

/// Represents a connected WebSocket client.
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: ConnectionId,
    /// Authenticated user.
    pub user_id: UserId,
    /// Owning tenant.
    pub tenant_id: TenantId,
    subscription: Subscription,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    /// Monotonic creation time.
    pub connected_at: Instant,
    /// Send channel to the connection's supervisor (the single writer).
    tx: mpsc::Sender<Arc<String>>,
    state: AtomicU8,
    /// When any inbound frame was last seen.
    last_contact: Mutex<Instant>,
    /// Count of messages dropped due to a full outbox.
    dropped_messages: AtomicU64,
    cancel: CancellationToken,
}

impl ClientConnection {
    /// Create a new connection in the `Connecting` state.
    pub fn new(
        id: ConnectionId,
        params: ConnectionParams,
        tx: mpsc::Sender<Arc<String>>,
        cancel: CancellationToken,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id: params.user_id,
            tenant_id: params.tenant_id,
            subscription: params.subscription,
            created_at: Utc::now(),
            connected_at: now,
            tx,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            last_contact: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
            cancel,
        }
    }

    /// Subscription this connection was opened with.
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Event filter, if this is an event-stream connection.
    pub fn filter(&self) -> Option<&StreamFilter> {
        match &self.subscription {
            Subscription::Events { filter, .. } => Some(filter),
            Subscription::Job { .. } => None,
        }
    }

    /// Whether this connection receives analytics snapshots.
    pub fn wants_analytics(&self) -> bool {
        matches!(self.subscription, Subscription::Events { analytics: true, .. })
    }

    /// Watched job, if this is a job-status connection.
    pub fn job_id(&self) -> Option<&JobId> {
        match &self.subscription {
            Subscription::Job { job_id } => Some(job_id),
            Subscription::Events { .. } => None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the connection accepts pushes.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// `Connecting → Open`. Returns `false` if the connection was not connecting.
    pub(crate) fn mark_open(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closing` unless already closing or closed.
    ///
    /// Returns `true` for the caller that performed the transition.
    pub(crate) fn begin_close(&self) -> bool {
        let prev = self
            .state
            .fetch_max(ConnectionState::Closing as u8, Ordering::AcqRel);
        prev < ConnectionState::Closing as u8
    }

    /// Terminal transition once the transport is gone.
    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    /// Push a serialized message without blocking.
    ///
    /// A full outbox drops the message (drop-newest). A closed outbox or a
    /// connection that is already closing triggers teardown.
    pub fn send(&self, message: Arc<String>) -> SendOutcome {
        if self.state() >= ConnectionState::Closing {
            return SendOutcome::Closed;
        }
        match self.tx.try_send(message) {
            Ok(()) => SendOutcome::Queued,
            Err(TrySendError::Full(_)) => {
                self.record_drop();
                SendOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.cancel.cancel();
                SendOutcome::Closed
            }
        }
    }

    /// Serialize an envelope and push it.
    pub fn send_envelope(&self, envelope: &Envelope) -> SendOutcome {
        match self.serialize(envelope) {
            Some(json) => self.send(json),
            None => SendOutcome::Dropped,
        }
    }

    /// Push an envelope the client must not miss, waiting up to `wait` for
    /// outbox space instead of dropping it straight away.
    ///
    /// Returns `Closed` without waiting further once the connection is
    /// cancelled.
    pub async fn deliver_envelope(&self, envelope: &Envelope, wait: Duration) -> SendOutcome {
        if self.state() >= ConnectionState::Closing {
            return SendOutcome::Closed;
        }
        let Some(json) = self.serialize(envelope) else {
            return SendOutcome::Dropped;
        };
        let reserved = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return SendOutcome::Closed,
            r = time::timeout(wait, self.tx.reserve()) => r,
        };
        match reserved {
            Ok(Ok(permit)) => {
                permit.send(json);
                SendOutcome::Queued
            }
            Ok(Err(_)) => {
                self.cancel.cancel();
                SendOutcome::Closed
            }
            Err(_) => {
                self.record_drop();
                SendOutcome::Dropped
            }
        }
    }

    fn serialize(&self, envelope: &Envelope) -> Option<Arc<String>> {
        match envelope.to_json() {
            Ok(json) => Some(Arc::new(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize envelope");
                None
            }
        }
    }

    fn record_drop(&self) {
        let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
        counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
        warn!(
            conn_id = %self.id,
            tenant_id = %self.tenant_id,
            dropped,
            "outbox full, dropping message"
        );
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Record inbound activity, renewing the liveness deadline.
    pub fn touch(&self) {
        *self.last_contact.lock() = Instant::now();
    }

    /// Instant of the last inbound frame (or creation).
    pub fn last_contact(&self) -> Instant {
        *self.last_contact.lock()
    }

    /// When the connection is considered dead absent further contact.
    pub fn liveness_deadline(&self, timeout: Duration) -> Instant {
        self.last_contact() + timeout
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Request teardown of this connection.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether teardown has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the connection should shut down.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn events_params(tenant: &str) -> ConnectionParams {
        ConnectionParams {
            tenant_id: TenantId::from(tenant),
            user_id: UserId::from("u1"),
            subscription: Subscription::Events {
                filter: StreamFilter::all(),
                analytics: false,
            },
        }
    }

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = ClientConnection::new(
            ConnectionId::from("conn_1"),
            events_params("t1"),
            tx,
            CancellationToken::new(),
        );
        let _ = conn.mark_open();
        (conn, rx)
    }

    #[test]
    fn starts_connecting() {
        let (tx, _rx) = mpsc::channel(1);
        let conn = ClientConnection::new(
            ConnectionId::from("c"),
            events_params("t1"),
            tx,
            CancellationToken::new(),
        );
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.mark_open());
        assert!(!conn.mark_open());
        assert_eq!(conn.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn send_message_success() {
        let (conn, mut rx) = make_connection(8);
        assert_eq!(conn.send(Arc::new("hello".into())), SendOutcome::Queued);
        let msg = rx.recv().await.unwrap();
        assert_eq!(&*msg, "hello");
    }

    #[test]
    fn full_outbox_drops_newest_and_counts() {
        let (conn, mut rx) = make_connection(1);
        assert_eq!(conn.send(Arc::new("first".into())), SendOutcome::Queued);
        assert_eq!(conn.send(Arc::new("second".into())), SendOutcome::Dropped);
        assert_eq!(conn.send(Arc::new("third".into())), SendOutcome::Dropped);
        assert_eq!(conn.drop_count(), 2);
        assert_eq!(&*rx.try_recv().unwrap(), "first");
        assert!(!conn.is_cancelled());
    }

    #[test]
    fn closed_outbox_triggers_teardown() {
        let (conn, rx) = make_connection(8);
        drop(rx);
        assert_eq!(conn.send(Arc::new("x".into())), SendOutcome::Closed);
        assert!(conn.is_cancelled());
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn closing_connection_rejects_pushes() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.begin_close());
        assert!(!conn.begin_close());
        assert_eq!(conn.send(Arc::new("late".into())), SendOutcome::Closed);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn close_is_monotonic() {
        let (conn, _rx) = make_connection(8);
        conn.mark_closed();
        assert!(!conn.begin_close());
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_envelope_waits_then_gives_up() {
        let (conn, mut rx) = make_connection(1);
        let _ = conn.send(Arc::new("backlog".into()));

        let start = Instant::now();
        let outcome = conn
            .deliver_envelope(&Envelope::error("final"), Duration::from_secs(3))
            .await;
        assert_eq!(outcome, SendOutcome::Dropped);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(conn.drop_count(), 1);

        let _ = rx.try_recv().unwrap();
        let outcome = conn
            .deliver_envelope(&Envelope::error("final"), Duration::from_secs(3))
            .await;
        assert_eq!(outcome, SendOutcome::Queued);
        assert!(rx.try_recv().unwrap().contains("final"));
    }

    #[tokio::test(start_paused = true)]
    async fn deliver_envelope_stops_on_cancel() {
        let (conn, _rx) = make_connection(1);
        let _ = conn.send(Arc::new("backlog".into()));
        conn.cancel();
        let outcome = conn
            .deliver_envelope(&Envelope::error("final"), Duration::from_secs(60))
            .await;
        assert_eq!(outcome, SendOutcome::Closed);
        assert_eq!(conn.drop_count(), 0);
    }

    #[tokio::test]
    async fn send_envelope_serializes() {
        let (conn, mut rx) = make_connection(8);
        let outcome = conn.send_envelope(&Envelope::error("boom"));
        assert_eq!(outcome, SendOutcome::Queued);
        let msg = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["error"], "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn touch_renews_deadline() {
        let (conn, _rx) = make_connection(8);
        let timeout = Duration::from_secs(60);
        let first = conn.liveness_deadline(timeout);
        tokio::time::advance(Duration::from_secs(10)).await;
        conn.touch();
        assert_eq!(conn.liveness_deadline(timeout), first + Duration::from_secs(10));
    }

    #[test]
    fn subscription_accessors() {
        let (tx, _rx) = mpsc::channel(1);
        let job = ClientConnection::new(
            ConnectionId::from("j"),
            ConnectionParams {
                tenant_id: TenantId::from("t1"),
                user_id: UserId::from("u1"),
                subscription: Subscription::Job {
                    job_id: JobId::from("job-1"),
                },
            },
            tx,
            CancellationToken::new(),
        );
        assert_eq!(job.job_id().map(JobId::as_str), Some("job-1"));
        assert!(job.filter().is_none());
        assert!(!job.wants_analytics());

        let (conn, _rx) = make_connection(1);
        assert!(conn.filter().is_some());
        assert!(conn.job_id().is_none());
    }
}
