//! Upstream platform collaborators over HTTP using `reqwest`.
//!
//! - Analytics: `GET {base}/api/analytics/summary?period=<period>`
//! - Job status: `GET {base}/api/jobs/{job_id}`
//!
//! Both requests carry the tenant in the `x-tenant-id` header.

use std::time::Duration;

use async_trait::async_trait;
use pulse_core::{AnalyticsSource, CollaboratorError, JobId, JobStatus, JobStatusSource, TenantId};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

/// Header carrying the tenant on upstream requests.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// HTTP client for the analytics and job-status endpoints.
#[derive(Clone, Debug)]
pub struct HttpCollaborators {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCollaborators {
    /// Create a client against `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("pulse-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CollaboratorError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        tenant: &TenantId,
        query: &[(&str, &str)],
    ) -> Result<T, CollaboratorError> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, tenant_id = %tenant, "upstream request");
        let response = self
            .client
            .get(&url)
            .header(TENANT_HEADER, tenant.as_str())
            .query(query)
            .send()
            .await
            .map_err(|e| CollaboratorError::Transport(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CollaboratorError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::Status {
                code: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| CollaboratorError::Decode(e.to_string()))
    }
}

#[async_trait]
impl AnalyticsSource for HttpCollaborators {
    async fn snapshot(&self, tenant: &TenantId, period: &str) -> Result<Value, CollaboratorError> {
        self.get_json("/api/analytics/summary", tenant, &[("period", period)])
            .await
    }
}

#[async_trait]
impl JobStatusSource for HttpCollaborators {
    async fn job_status(
        &self,
        tenant: &TenantId,
        job: &JobId,
    ) -> Result<JobStatus, CollaboratorError> {
        self.get_json(&format!("/api/jobs/{job}"), tenant, &[]).await
    }
}
