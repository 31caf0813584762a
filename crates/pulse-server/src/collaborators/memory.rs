//! In-memory collaborators. Used by tests and by `pulse-hubd --offline`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use pulse_core::{AnalyticsSource, CollaboratorError, JobId, JobStatus, JobStatusSource, TenantId};
use serde_json::{Value, json};

/// Analytics snapshots keyed by tenant.
///
/// Unknown tenants get an empty summary.
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    snapshots: Mutex<HashMap<TenantId, Value>>,
    failing: Mutex<Option<String>>,
    calls: AtomicUsize,
}

impl InMemoryAnalytics {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the snapshot returned for `tenant`.
    pub fn set(&self, tenant: impl Into<TenantId>, snapshot: Value) {
        let _ = self.snapshots.lock().insert(tenant.into(), snapshot);
    }

    /// Make every fetch fail with `message` until cleared with `None`.
    pub fn fail_with(&self, message: Option<&str>) {
        *self.failing.lock() = message.map(str::to_owned);
    }

    /// Number of snapshot requests served (including failures).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsSource for InMemoryAnalytics {
    async fn snapshot(&self, tenant: &TenantId, period: &str) -> Result<Value, CollaboratorError> {
        let _ = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.failing.lock().clone() {
            return Err(CollaboratorError::Transport(message));
        }
        Ok(self
            .snapshots
            .lock()
            .get(tenant)
            .cloned()
            .unwrap_or_else(|| json!({ "period": period, "total_events": 0 })))
    }
}

/// Job status scripts keyed by job.
///
/// Each query pops the next scripted status; the last one repeats. Unknown
/// jobs are `NotFound`.
#[derive(Debug, Default)]
pub struct InMemoryJobs {
    scripts: Mutex<HashMap<JobId, VecDeque<JobStatus>>>,
    failing: Mutex<HashMap<JobId, String>>,
}

impl InMemoryJobs {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the statuses returned for `job`, in order.
    pub fn script(&self, job: impl Into<JobId>, statuses: impl IntoIterator<Item = JobStatus>) {
        let _ = self
            .scripts
            .lock()
            .insert(job.into(), statuses.into_iter().collect());
    }

    /// Make queries for `job` fail.
    pub fn fail(&self, job: impl Into<JobId>, message: impl Into<String>) {
        let _ = self.failing.lock().insert(job.into(), message.into());
    }
}

#[async_trait]
impl JobStatusSource for InMemoryJobs {
    async fn job_status(
        &self,
        _tenant: &TenantId,
        job: &JobId,
    ) -> Result<JobStatus, CollaboratorError> {
        if let Some(message) = self.failing.lock().get(job) {
            return Err(CollaboratorError::Status {
                code: 500,
                message: message.clone(),
            });
        }
        let mut scripts = self.scripts.lock();
        let script = scripts
            .get_mut(job)
            .ok_or_else(|| CollaboratorError::NotFound(job.to_string()))?;
        match script.len() {
            0 => Err(CollaboratorError::NotFound(job.to_string())),
            1 => Ok(script[0].clone()),
            _ => script
                .pop_front()
                .ok_or_else(|| CollaboratorError::NotFound(job.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pulse_core::JobState;

    #[tokio::test]
    async fn analytics_default_and_override() {
        let source = InMemoryAnalytics::new();
        let t = TenantId::from("t");
        let default = source.snapshot(&t, "24h").await.unwrap();
        assert_eq!(default["period"], "24h");

        source.set("t", json!({"total_events": 9}));
        assert_eq!(source.snapshot(&t, "24h").await.unwrap()["total_events"], 9);

        source.fail_with(Some("down"));
        assert_matches!(source.snapshot(&t, "24h").await, Err(CollaboratorError::Transport(_)));
        source.fail_with(None);
        assert!(source.snapshot(&t, "24h").await.is_ok());
        assert_eq!(source.calls(), 4);
    }

    #[tokio::test]
    async fn jobs_replay_script_and_repeat_last() {
        let jobs = InMemoryJobs::new();
        jobs.script(
            "j",
            [
                JobStatus::new(JobState::Queued),
                JobStatus::new(JobState::Completed),
            ],
        );
        let (t, j) = (TenantId::from("t"), JobId::from("j"));
        assert_eq!(jobs.job_status(&t, &j).await.unwrap().state, JobState::Queued);
        assert_eq!(jobs.job_status(&t, &j).await.unwrap().state, JobState::Completed);
        assert_eq!(jobs.job_status(&t, &j).await.unwrap().state, JobState::Completed);
    }

    #[tokio::test]
    async fn unknown_and_failing_jobs() {
        let jobs = InMemoryJobs::new();
        let t = TenantId::from("t");
        assert_matches!(
            jobs.job_status(&t, &JobId::from("nope")).await,
            Err(CollaboratorError::NotFound(_))
        );
        jobs.fail("bad", "exploded");
        assert_matches!(
            jobs.job_status(&t, &JobId::from("bad")).await,
            Err(CollaboratorError::Status { code: 500, .. })
        );
    }
}
