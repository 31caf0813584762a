//! External collaborators the hub queries but does not own.
//!
//! Durable storage, analytics computation and job execution live upstream.
//! The hub only sees them through these traits; the server crate ships HTTP
//! implementations and tests use in-memory fakes.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::CollaboratorError;
use crate::ids::{JobId, TenantId};
use crate::job::JobStatus;

/// Source of tenant-scoped analytics snapshots.
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    /// Fetch the current snapshot for `tenant` over `period` (e.g. `24h`).
    ///
    /// The returned value is opaque to the hub.
    async fn snapshot(&self, tenant: &TenantId, period: &str) -> Result<Value, CollaboratorError>;
}

/// Poll-only source of job status.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    /// Query the current status of `job` within `tenant`.
    async fn job_status(&self, tenant: &TenantId, job: &JobId)
    -> Result<JobStatus, CollaboratorError>;
}
