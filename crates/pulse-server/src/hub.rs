//! `NotificationHub`: the registry, fan-out, analytics and job-status bridge
//! behind one handle.

use std::sync::Arc;
use std::time::Duration;

use pulse_core::{AnalyticsSource, Envelope, HubError, JobStatusSource, LiveEvent, TenantId};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::HubConfig;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::analytics::{AnalyticsGuard, AnalyticsPublisher};
use crate::websocket::broadcast::{EventBroadcaster, FanoutReport};
use crate::websocket::connection::{ClientConnection, ConnectionParams};
use crate::websocket::heartbeat::SupervisorConfig;
use crate::websocket::job_bridge::{BridgeOutcome, JobStatusBridge};
use crate::websocket::registry::ConnectionRegistry;

/// A freshly registered connection and the receiving end of its outbox.
pub type OpenedConnection = (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>);

/// Shared hub state. One per process.
pub struct NotificationHub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    broadcaster: EventBroadcaster,
    analytics: Arc<AnalyticsPublisher>,
    jobs: JobStatusBridge,
    shutdown: ShutdownCoordinator,
}

impl NotificationHub {
    /// Create a hub wired to the given collaborators.
    pub fn new(
        config: HubConfig,
        analytics_source: Arc<dyn AnalyticsSource>,
        job_source: Arc<dyn JobStatusSource>,
    ) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let analytics = Arc::new(AnalyticsPublisher::new(
            analytics_source,
            registry.clone(),
            config.analytics_interval,
            config.analytics_period.clone(),
            shutdown.child_token(),
        ));
        Self {
            broadcaster: EventBroadcaster::new(registry.clone()),
            jobs: JobStatusBridge::new(job_source, config.job_poll_interval),
            registry,
            analytics,
            shutdown,
            config,
        }
    }

    /// Register a connection with a bounded outbox.
    ///
    /// `connection_established` is queued before the connection becomes
    /// visible to fan-out, so it is always the first message. The
    /// connection's token is a child of the hub shutdown token.
    pub fn open_connection(&self, params: ConnectionParams) -> Result<OpenedConnection, HubError> {
        let (tx, rx) = mpsc::channel(self.config.outbox_capacity);
        let conn = self.registry.register_with(
            params,
            tx,
            self.shutdown.child_token(),
            |conn| {
                let _ = conn.send_envelope(&Envelope::connection_established(&conn.id));
            },
        )?;
        debug!(
            conn_id = %conn.id,
            tenant_id = %conn.tenant_id,
            user_id = %conn.user_id,
            "connection registered"
        );
        Ok((conn, rx))
    }

    /// Deregister and cancel a connection. Idempotent.
    pub fn close_connection(&self, conn: &ClientConnection) {
        let _ = self.registry.deregister(&conn.id);
        conn.cancel();
    }

    /// Validate `event` and fan it out to its tenant.
    ///
    /// Only an invalid event is an error; consumer problems never are.
    pub fn ingest(&self, event: &LiveEvent) -> Result<FanoutReport, HubError> {
        event.validate()?;
        Ok(self.broadcaster.ingest(event))
    }

    /// Notify every event-stream connection of `tenant` about a document.
    pub fn publish_document_status(
        &self,
        tenant: &TenantId,
        document_id: &str,
        status: &str,
        data: Option<Value>,
    ) -> Result<FanoutReport, HubError> {
        if document_id.is_empty() || status.is_empty() {
            return Err(HubError::Validation(
                "document_id and status must not be empty".into(),
            ));
        }
        if data.as_ref().is_some_and(|d| !d.is_object()) {
            return Err(HubError::Validation("data must be a JSON object".into()));
        }
        Ok(self
            .broadcaster
            .publish_document_status(tenant, document_id, status, data))
    }

    /// Start (or join) the analytics ticker for `tenant`.
    pub fn attach_analytics(&self, tenant: &TenantId) -> AnalyticsGuard {
        self.analytics.attach(tenant)
    }

    /// Start the status poller for a job-status connection.
    pub fn spawn_job_bridge(&self, conn: Arc<ClientConnection>) -> Option<JoinHandle<BridgeOutcome>> {
        self.jobs.spawn(conn)
    }

    /// Keepalive timings for connection supervisors.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::from(&self.config)
    }

    /// Hub configuration.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Connection registry.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Event broadcaster.
    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    /// Analytics publisher.
    pub fn analytics(&self) -> &Arc<AnalyticsPublisher> {
        &self.analytics
    }

    /// Shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Cancel every connection, bridge and ticker.
    pub fn shutdown(&self) {
        if !self.shutdown.is_shutting_down() {
            info!(connections = self.registry.len(), "hub shutting down");
        }
        self.shutdown.shutdown();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutting_down()
    }

    /// Wait until every connection has deregistered, up to `timeout`.
    ///
    /// Returns `true` if the registry drained in time.
    pub async fn wait_until_drained(&self, timeout: Duration) -> bool {
        let drained = async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("registry", &self.registry)
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryAnalytics, InMemoryJobs};
    use crate::websocket::connection::Subscription;
    use crate::websocket::connection::tests::events_params;
    use assert_matches::assert_matches;
    use pulse_core::{JobId, UserId};
    use std::collections::HashSet;

    fn hub_with(config: HubConfig) -> NotificationHub {
        NotificationHub::new(
            config,
            Arc::new(InMemoryAnalytics::new()),
            Arc::new(InMemoryJobs::new()),
        )
    }

    fn hub() -> NotificationHub {
        hub_with(HubConfig::default())
    }

    #[test]
    fn open_connection_uses_configured_outbox() {
        let hub = hub_with(HubConfig {
            outbox_capacity: 2,
            ..HubConfig::default()
        });
        let (conn, _rx) = hub.open_connection(events_params("t")).unwrap();
        let event = LiveEvent::builder("t").event_type("x").build();
        for _ in 0..3 {
            let _ = hub.ingest(&event).unwrap();
        }
        // The greeting holds one of the two slots.
        assert_eq!(conn.drop_count(), 2);
    }

    #[test]
    fn greeting_precedes_any_event() {
        let hub = hub();
        let (_conn, mut rx) = hub.open_connection(events_params("t")).unwrap();
        let report = hub
            .ingest(&LiveEvent::builder("t").event_type("x").build())
            .unwrap();
        assert_eq!(report.delivered, 1);

        let first: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        let second: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(first["type"], "connection_established");
        assert_eq!(second["type"], "live_event");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_registration_and_ingest() {
        let hub = Arc::new(hub_with(HubConfig {
            max_connections: 1_000,
            outbox_capacity: 2_048,
            ..HubConfig::default()
        }));

        // 50 tasks registering two connections each.
        let mut registrations = Vec::new();
        for _ in 0..50 {
            let hub = hub.clone();
            registrations.push(tokio::spawn(async move {
                (0..2)
                    .map(|_| hub.open_connection(events_params("t")).unwrap())
                    .collect::<Vec<_>>()
            }));
        }
        let mut opened = Vec::new();
        for task in registrations {
            opened.extend(task.await.unwrap());
        }
        assert_eq!(hub.registry().len(), 100);
        let ids: HashSet<_> = opened.iter().map(|(c, _)| c.id.clone()).collect();
        assert_eq!(ids.len(), 100);

        // 1000 events from 10 tasks while other connections come and go.
        let event = LiveEvent::builder("t").event_type("x").build();
        let mut ingests = Vec::new();
        for _ in 0..10 {
            let hub = hub.clone();
            let event = event.clone();
            ingests.push(tokio::spawn(async move {
                for _ in 0..100 {
                    let report = hub.ingest(&event).unwrap();
                    assert!(report.delivered >= 100);
                    assert_eq!(report.dropped, 0);
                }
            }));
        }
        let churn = {
            let hub = hub.clone();
            tokio::spawn(async move {
                for _ in 0..20 {
                    let (conn, _rx) = hub.open_connection(events_params("t")).unwrap();
                    tokio::task::yield_now().await;
                    hub.close_connection(&conn);
                }
            })
        };
        for task in ingests {
            task.await.unwrap();
        }
        churn.await.unwrap();

        assert_eq!(hub.registry().len(), 100);
        for (conn, mut rx) in opened {
            let mut received = 0;
            while rx.try_recv().is_ok() {
                received += 1;
            }
            assert_eq!(received, 1_001, "connection {}", conn.id);
            assert_eq!(conn.drop_count(), 0);
        }
    }

    #[test]
    fn capacity_limit() {
        let hub = hub_with(HubConfig {
            max_connections: 1,
            ..HubConfig::default()
        });
        let _first = hub.open_connection(events_params("t")).unwrap();
        assert_matches!(
            hub.open_connection(events_params("t")),
            Err(HubError::CapacityExceeded { limit: 1 })
        );
    }

    #[test]
    fn invalid_event_is_rejected() {
        let hub = hub();
        let event = LiveEvent::builder("t").event_type("x").confidence(1.5).build();
        assert_matches!(hub.ingest(&event), Err(HubError::Validation(_)));
    }

    #[test]
    fn document_status_validation() {
        let hub = hub();
        let t = TenantId::from("t");
        assert!(hub.publish_document_status(&t, "", "done", None).is_err());
        assert!(
            hub.publish_document_status(&t, "d", "done", Some(serde_json::json!([1])))
                .is_err()
        );
        assert_eq!(
            hub.publish_document_status(&t, "d", "done", None)
                .unwrap()
                .delivered,
            0
        );
    }

    #[test]
    fn close_connection_is_idempotent() {
        let hub = hub();
        let (conn, _rx) = hub.open_connection(events_params("t")).unwrap();
        hub.close_connection(&conn);
        hub.close_connection(&conn);
        assert!(hub.registry().is_empty());
        assert!(conn.is_cancelled());
    }

    #[test]
    fn shutdown_cancels_every_connection() {
        let hub = hub();
        let (a, _ra) = hub.open_connection(events_params("a")).unwrap();
        let (b, _rb) = hub
            .open_connection(ConnectionParams {
                tenant_id: TenantId::from("b"),
                user_id: UserId::from("u"),
                subscription: Subscription::Job {
                    job_id: JobId::from("j"),
                },
            })
            .unwrap();
        hub.shutdown();
        assert!(hub.is_shutting_down());
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn drained_when_registry_empty() {
        let hub = hub();
        assert!(hub.wait_until_drained(Duration::from_millis(50)).await);
        let (_conn, _rx) = hub.open_connection(events_params("t")).unwrap();
        assert!(!hub.wait_until_drained(Duration::from_millis(50)).await);
    }

    #[test]
    fn supervisor_config_matches_hub_config() {
        let hub = hub();
        let cfg = hub.supervisor_config();
        assert_eq!(cfg.ping_interval, hub.config().ping_interval);
        assert_eq!(cfg.liveness_timeout, hub.config().liveness_timeout);
    }
}
