//! Connection registry indexed by ID, tenant and job.
//!
//! The registry is the only shared mutable state in the hub. Its lock is held
//! for map operations only; callers iterate over snapshots.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use pulse_core::{ConnectionId, HubError, JobId, TenantId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::{ClientConnection, ConnectionParams};

type IdGenerator = Box<dyn Fn() -> ConnectionId + Send + Sync>;

#[derive(Default)]
struct Indexes {
    by_id: HashMap<ConnectionId, Arc<ClientConnection>>,
    by_tenant: HashMap<TenantId, HashSet<ConnectionId>>,
    /// Watchers per job in registration order.
    by_job: HashMap<JobId, Vec<ConnectionId>>,
}

/// Registry of live connections.
pub struct ConnectionRegistry {
    inner: RwLock<Indexes>,
    max_connections: usize,
    next_id: IdGenerator,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections` connections.
    pub fn new(max_connections: usize) -> Self {
        Self::with_id_generator(max_connections, ConnectionId::new)
    }

    /// Create a registry with a custom ID source.
    pub fn with_id_generator<F>(max_connections: usize, next_id: F) -> Self
    where
        F: Fn() -> ConnectionId + Send + Sync + 'static,
    {
        Self {
            inner: RwLock::new(Indexes::default()),
            max_connections,
            next_id: Box::new(next_id),
        }
    }

    /// Admit a connection under a fresh unique ID and mark it `Open`.
    ///
    /// An ID collision is retried with a new ID. Fails only when the
    /// connection limit is reached.
    pub fn register(
        &self,
        params: ConnectionParams,
        tx: mpsc::Sender<Arc<String>>,
        cancel: CancellationToken,
    ) -> Result<Arc<ClientConnection>, HubError> {
        self.register_with(params, tx, cancel, |_| {})
    }

    /// Like [`register`](Self::register), running `before_open` on the new
    /// connection while it is still `Connecting`.
    ///
    /// Nothing can push to the connection until `before_open` returns, so
    /// whatever it enqueues is delivered first. It runs under the registry
    /// lock and must not call back into the registry.
    pub fn register_with<F>(
        &self,
        params: ConnectionParams,
        tx: mpsc::Sender<Arc<String>>,
        cancel: CancellationToken,
        before_open: F,
    ) -> Result<Arc<ClientConnection>, HubError>
    where
        F: FnOnce(&ClientConnection),
    {
        let mut inner = self.inner.write();
        if inner.by_id.len() >= self.max_connections {
            return Err(HubError::CapacityExceeded {
                limit: self.max_connections,
            });
        }

        let id = loop {
            let candidate = (self.next_id)();
            if !inner.by_id.contains_key(&candidate) {
                break candidate;
            }
            debug!(conn_id = %candidate, "connection id collision, regenerating");
        };

        let conn = Arc::new(ClientConnection::new(id.clone(), params, tx, cancel));
        let _ = inner
            .by_tenant
            .entry(conn.tenant_id.clone())
            .or_default()
            .insert(id.clone());
        if let Some(job_id) = conn.job_id() {
            inner.by_job.entry(job_id.clone()).or_default().push(id.clone());
        }
        let _ = inner.by_id.insert(id, conn.clone());
        before_open(&conn);
        let _ = conn.mark_open();
        Ok(conn)
    }

    /// Remove a connection and move it to `Closing`.
    ///
    /// Unknown IDs are a no-op, so concurrent close paths may all call this.
    pub fn deregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let removed = {
            let mut inner = self.inner.write();
            let conn = inner.by_id.remove(id)?;
            if let Some(ids) = inner.by_tenant.get_mut(&conn.tenant_id) {
                let _ = ids.remove(id);
                if ids.is_empty() {
                    let _ = inner.by_tenant.remove(&conn.tenant_id);
                }
            }
            if let Some(job_id) = conn.job_id() {
                if let Some(ids) = inner.by_job.get_mut(job_id) {
                    ids.retain(|c| c != id);
                    if ids.is_empty() {
                        let _ = inner.by_job.remove(job_id);
                    }
                }
            }
            conn
        };
        let _ = removed.begin_close();
        Some(removed)
    }

    /// Run `f` on every `Open` connection of `tenant`.
    ///
    /// The set is snapshotted under the read lock, which is released before
    /// `f` runs.
    pub fn for_each_in_tenant<F>(&self, tenant: &TenantId, mut f: F)
    where
        F: FnMut(&Arc<ClientConnection>),
    {
        for conn in self.tenant_snapshot(tenant) {
            f(&conn);
        }
    }

    /// Point-in-time copy of the tenant's `Open` connections.
    pub fn tenant_snapshot(&self, tenant: &TenantId) -> Vec<Arc<ClientConnection>> {
        let inner = self.inner.read();
        inner
            .by_tenant
            .get(tenant)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.by_id.get(id))
                    .filter(|c| c.is_open())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Earliest registered live watcher of `job_id`.
    pub fn by_job_id(&self, job_id: &JobId) -> Option<Arc<ClientConnection>> {
        let inner = self.inner.read();
        inner
            .by_job
            .get(job_id)?
            .iter()
            .filter_map(|id| inner.by_id.get(id))
            .find(|c| c.is_open())
            .cloned()
    }

    /// Look up a connection by ID.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.inner.read().by_id.get(id).cloned()
    }

    /// Every registered connection.
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.inner.read().by_id.values().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// Whether no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of connections registered for `tenant`.
    pub fn tenant_len(&self, tenant: &TenantId) -> usize {
        self.inner.read().by_tenant.get(tenant).map_or(0, HashSet::len)
    }

    /// Number of tenants with at least one connection.
    pub fn tenant_count(&self) -> usize {
        self.inner.read().by_tenant.len()
    }

    /// Number of jobs with at least one watcher.
    pub fn job_count(&self) -> usize {
        self.inner.read().by_job.len()
    }

    /// Configured connection limit.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("max_connections", &self.max_connections)
            .finish_non_exhaustive()
    }
}
