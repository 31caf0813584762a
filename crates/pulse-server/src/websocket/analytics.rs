//! Periodic analytics snapshots, one ticker per tenant.
//!
//! A tenant's ticker runs while at least one of its connections holds an
//! [`AnalyticsGuard`]. Dropping the last guard stops the ticker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use pulse_core::{AnalyticsSource, CollaboratorError, Envelope, TenantId};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::broadcast::EventBroadcaster;
use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;
use crate::metrics::{ANALYTICS_FETCH_ERRORS_TOTAL, ANALYTICS_PUSHES_TOTAL, ANALYTICS_TICKERS_ACTIVE};

struct Ticker {
    subscribers: usize,
    cancel: CancellationToken,
}

/// Owns the per-tenant analytics tickers.
pub struct AnalyticsPublisher {
    source: Arc<dyn AnalyticsSource>,
    broadcaster: Arc<EventBroadcaster>,
    interval: Duration,
    period: String,
    shutdown: CancellationToken,
    tickers: Mutex<HashMap<TenantId, Ticker>>,
}

impl AnalyticsPublisher {
    /// Create a publisher. Tickers stop when `shutdown` is cancelled.
    pub fn new(
        source: Arc<dyn AnalyticsSource>,
        registry: Arc<ConnectionRegistry>,
        interval: Duration,
        period: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            source,
            broadcaster: Arc::new(EventBroadcaster::new(registry)),
            interval,
            period: period.into(),
            shutdown,
            tickers: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe one connection of `tenant`, starting the tenant's ticker if
    /// it is not running.
    pub fn attach(self: &Arc<Self>, tenant: &TenantId) -> AnalyticsGuard {
        let mut tickers = self.tickers.lock();
        let ticker = tickers.entry(tenant.clone()).or_insert_with(|| {
            let cancel = self.shutdown.child_token();
            drop(tokio::spawn(run_ticker(
                self.source.clone(),
                self.broadcaster.clone(),
                tenant.clone(),
                self.period.clone(),
                self.interval,
                cancel.clone(),
            )));
            debug!(tenant_id = %tenant, "analytics ticker started");
            gauge!(ANALYTICS_TICKERS_ACTIVE).increment(1.0);
            Ticker {
                subscribers: 0,
                cancel,
            }
        });
        ticker.subscribers += 1;
        AnalyticsGuard {
            publisher: Arc::clone(self),
            tenant: tenant.clone(),
        }
    }

    fn detach(&self, tenant: &TenantId) {
        let mut tickers = self.tickers.lock();
        let Some(ticker) = tickers.get_mut(tenant) else {
            return;
        };
        ticker.subscribers = ticker.subscribers.saturating_sub(1);
        if ticker.subscribers == 0 {
            ticker.cancel.cancel();
            let _ = tickers.remove(tenant);
            gauge!(ANALYTICS_TICKERS_ACTIVE).decrement(1.0);
            debug!(tenant_id = %tenant, "analytics ticker stopped");
        }
    }

    /// Fetch one snapshot for `tenant` and push it to its analytics
    /// subscribers. Returns the number of connections it was queued on.
    pub async fn publish_once(&self, tenant: &TenantId) -> Result<usize, CollaboratorError> {
        publish_snapshot(self.source.as_ref(), &self.broadcaster, tenant, &self.period).await
    }

    /// Number of running tickers.
    pub fn active_tickers(&self) -> usize {
        self.tickers.lock().len()
    }

    /// Number of attached subscribers for `tenant`.
    pub fn subscriber_count(&self, tenant: &TenantId) -> usize {
        self.tickers.lock().get(tenant).map_or(0, |t| t.subscribers)
    }
}

/// Keeps a tenant's ticker alive. Detaches on drop.
pub struct AnalyticsGuard {
    publisher: Arc<AnalyticsPublisher>,
    tenant: TenantId,
}

impl Drop for AnalyticsGuard {
    fn drop(&mut self) {
        self.publisher.detach(&self.tenant);
    }
}

impl std::fmt::Debug for AnalyticsGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsGuard")
            .field("tenant", &self.tenant)
            .finish_non_exhaustive()
    }
}

async fn publish_snapshot(
    source: &dyn AnalyticsSource,
    broadcaster: &EventBroadcaster,
    tenant: &TenantId,
    period: &str,
) -> Result<usize, CollaboratorError> {
    let snapshot = source.snapshot(tenant, period).await?;
    let report = broadcaster.push_to_tenant(
        tenant,
        &Envelope::analytics_update(snapshot),
        ClientConnection::wants_analytics,
    );
    counter!(ANALYTICS_PUSHES_TOTAL).increment(report.delivered as u64);
    Ok(report.delivered)
}

async fn run_ticker(
    source: Arc<dyn AnalyticsSource>,
    broadcaster: Arc<EventBroadcaster>,
    tenant: TenantId,
    period: String,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            r = publish_snapshot(source.as_ref(), &broadcaster, &tenant, &period) => r,
        };

        match result {
            Ok(recipients) => debug!(tenant_id = %tenant, recipients, "analytics snapshot pushed"),
            Err(e) => {
                counter!(ANALYTICS_FETCH_ERRORS_TOTAL).increment(1);
                warn!(tenant_id = %tenant, error = %e, "analytics fetch failed, skipping tick");
            }
        }
    }
}
