//! Event fan-out to connected WebSocket clients.

use std::sync::Arc;

use metrics::counter;
use pulse_core::{Envelope, LiveEvent, TenantId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::{ClientConnection, SendOutcome};
use super::registry::ConnectionRegistry;
use crate::metrics::{DOCUMENT_STATUS_TOTAL, EVENTS_DELIVERED_TOTAL, EVENTS_INGESTED_TOTAL};

/// Per-call fan-out summary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FanoutReport {
    /// Enqueued on an outbox.
    pub delivered: usize,
    /// Dropped because the outbox was full.
    pub dropped: usize,
    /// Target was closing; teardown was triggered.
    pub closed: usize,
    /// Tenant connections the message did not apply to.
    pub skipped: usize,
}

impl FanoutReport {
    fn record(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Queued => self.delivered += 1,
            SendOutcome::Dropped => self.dropped += 1,
            SendOutcome::Closed => self.closed += 1,
        }
    }

    /// Connections a push was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Fans tenant-scoped messages out to matching connections.
///
/// Ingestion is synchronous and never blocks on a slow consumer: each push is
/// a `try_send` onto the connection's bounded outbox.
pub struct EventBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl EventBroadcaster {
    /// Create a broadcaster over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push `event` to every event-stream connection of its tenant whose
    /// filter matches.
    ///
    /// Consumer problems are never surfaced to the producer; they only show
    /// up in the report and the logs.
    pub fn ingest(&self, event: &LiveEvent) -> FanoutReport {
        counter!(EVENTS_INGESTED_TOTAL).increment(1);
        let Some(json) = serialize(&Envelope::live_event(event)) else {
            return FanoutReport::default();
        };

        let mut report = FanoutReport::default();
        self.registry.for_each_in_tenant(&event.tenant_id, |conn| {
            match conn.filter() {
                Some(filter) if filter.matches(event) => report.record(conn.send(json.clone())),
                _ => report.skipped += 1,
            }
        });

        counter!(EVENTS_DELIVERED_TOTAL).increment(report.delivered as u64);
        debug!(
            event_id = %event.id,
            tenant_id = %event.tenant_id,
            event_type = event.event_type,
            delivered = report.delivered,
            dropped = report.dropped,
            closed = report.closed,
            skipped = report.skipped,
            "live event fanned out"
        );
        report
    }

    /// Push a `document_status_update` to every event-stream connection of
    /// `tenant`. Filters do not apply.
    pub fn publish_document_status(
        &self,
        tenant: &TenantId,
        document_id: &str,
        status: &str,
        data: Option<Value>,
    ) -> FanoutReport {
        counter!(DOCUMENT_STATUS_TOTAL).increment(1);
        let Some(json) = serialize(&Envelope::document_status(document_id, status, data)) else {
            return FanoutReport::default();
        };

        let mut report = FanoutReport::default();
        self.registry.for_each_in_tenant(tenant, |conn| {
            if conn.filter().is_some() {
                report.record(conn.send(json.clone()));
            } else {
                report.skipped += 1;
            }
        });
        debug!(
            tenant_id = %tenant,
            document_id,
            status,
            delivered = report.delivered,
            "document status published"
        );
        report
    }

    /// Push a pre-built envelope to the tenant connections selected by `pick`.
    pub fn push_to_tenant<F>(&self, tenant: &TenantId, envelope: &Envelope, pick: F) -> FanoutReport
    where
        F: Fn(&ClientConnection) -> bool,
    {
        let Some(json) = serialize(envelope) else {
            return FanoutReport::default();
        };
        let mut report = FanoutReport::default();
        self.registry.for_each_in_tenant(tenant, |conn| {
            if pick(conn) {
                report.record(conn.send(json.clone()));
            } else {
                report.skipped += 1;
            }
        });
        report
    }

    /// The registry this broadcaster reads from.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }
}

fn serialize(envelope: &Envelope) -> Option<Arc<String>> {
    match envelope.to_json() {
        Ok(json) => Some(Arc::new(json)),
        Err(e) => {
            warn!(message_type = envelope.message_type.as_str(), error = %e, "failed to serialize envelope");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::{ConnectionParams, Subscription};
    use pulse_core::{JobId, StreamFilter, UserId};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn open(
        registry: &ConnectionRegistry,
        tenant: &str,
        subscription: Subscription,
        capacity: usize,
    ) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let conn = registry
            .register(
                ConnectionParams {
                    tenant_id: TenantId::from(tenant),
                    user_id: UserId::from("u"),
                    subscription,
                },
                tx,
                CancellationToken::new(),
            )
            .unwrap();
        (conn, rx)
    }

    fn events(filter: StreamFilter) -> Subscription {
        Subscription::Events {
            filter,
            analytics: false,
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Arc<String>>) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(serde_json::from_str(&msg).unwrap());
        }
        out
    }

    fn setup() -> (Arc<ConnectionRegistry>, EventBroadcaster) {
        let registry = Arc::new(ConnectionRegistry::new(100));
        let broadcaster = EventBroadcaster::new(registry.clone());
        (registry, broadcaster)
    }

    #[test]
    fn tenant_isolation() {
        let (registry, broadcaster) = setup();
        let (_a, mut rx_a) = open(&registry, "a", events(StreamFilter::all()), 8);
        let (_b, mut rx_b) = open(&registry, "b", events(StreamFilter::all()), 8);

        let event = LiveEvent::builder("a").event_type("mention").content("hi").build();
        let report = broadcaster.ingest(&event);

        assert_eq!(report.delivered, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn alert_filter_scenario() {
        let (registry, broadcaster) = setup();
        let alerts = StreamFilter::all()
            .with_event_types(["alert"])
            .with_min_confidence(0.8);
        let (_c, mut rx) = open(&registry, "t", events(alerts), 8);

        let low = LiveEvent::builder("t").event_type("alert").confidence(0.5).build();
        let high = LiveEvent::builder("t").event_type("alert").confidence(0.9).build();
        let other = LiveEvent::builder("t").event_type("mention").confidence(0.9).build();

        assert_eq!(broadcaster.ingest(&low).skipped, 1);
        assert_eq!(broadcaster.ingest(&high).delivered, 1);
        assert_eq!(broadcaster.ingest(&other).skipped, 1);

        let got = drain(&mut rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["type"], "live_event");
        assert_eq!(got[0]["data"]["id"], high.id.as_str());
    }

    #[test]
    fn slow_consumer_does_not_starve_others() {
        let (registry, broadcaster) = setup();
        let (slow, _slow_rx) = open(&registry, "t", events(StreamFilter::all()), 1);
        let (_fast, mut fast_rx) = open(&registry, "t", events(StreamFilter::all()), 64);

        let mut total = FanoutReport::default();
        for _ in 0..10 {
            let r = broadcaster.ingest(&LiveEvent::builder("t").event_type("x").build());
            total.delivered += r.delivered;
            total.dropped += r.dropped;
        }

        assert_eq!(drain(&mut fast_rx).len(), 10);
        assert_eq!(total.dropped, 9);
        assert_eq!(total.delivered, 11);
        assert_eq!(slow.drop_count(), 9);
    }

    #[test]
    fn closed_consumer_rolls_into_teardown() {
        let (registry, broadcaster) = setup();
        let (gone, rx) = open(&registry, "t", events(StreamFilter::all()), 8);
        drop(rx);

        let report = broadcaster.ingest(&LiveEvent::builder("t").event_type("x").build());
        assert_eq!(report.closed, 1);
        assert!(gone.is_cancelled());
    }

    #[test]
    fn job_connections_never_receive_live_events() {
        let (registry, broadcaster) = setup();
        let (_job, mut rx) = open(
            &registry,
            "t",
            Subscription::Job {
                job_id: JobId::from("j"),
            },
            8,
        );
        let report = broadcaster.ingest(&LiveEvent::builder("t").event_type("x").build());
        assert_eq!(report.skipped, 1);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn deregistered_connection_gets_nothing() {
        let (registry, broadcaster) = setup();
        let (conn, mut rx) = open(&registry, "t", events(StreamFilter::all()), 8);
        let _ = registry.deregister(&conn.id);
        let report = broadcaster.ingest(&LiveEvent::builder("t").event_type("x").build());
        assert_eq!(report.attempted(), 0);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn document_status_ignores_filters() {
        let (registry, broadcaster) = setup();
        let narrow = StreamFilter::all().with_event_types(["alert"]);
        let (_c, mut rx) = open(&registry, "t", events(narrow), 8);
        let (_other, mut other_rx) = open(&registry, "u", events(StreamFilter::all()), 8);

        let report = broadcaster.publish_document_status(
            &TenantId::from("t"),
            "doc-1",
            "processed",
            Some(serde_json::json!({"pages": 3})),
        );
        assert_eq!(report.delivered, 1);

        let got = drain(&mut rx);
        assert_eq!(got[0]["type"], "document_status_update");
        assert_eq!(got[0]["status"], "processed");
        assert_eq!(got[0]["data"]["document_id"], "doc-1");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[test]
    fn push_to_tenant_uses_predicate() {
        let (registry, broadcaster) = setup();
        let (_a, mut rx_a) = open(
            &registry,
            "t",
            Subscription::Events {
                filter: StreamFilter::all(),
                analytics: true,
            },
            8,
        );
        let (_b, mut rx_b) = open(&registry, "t", events(StreamFilter::all()), 8);
        let report = broadcaster.push_to_tenant(
            &TenantId::from("t"),
            &Envelope::analytics_update(serde_json::json!({"total": 1})),
            ClientConnection::wants_analytics,
        );
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert!(drain(&mut rx_b).is_empty());
    }
}
