//! Job-status polling bridge, one per job-status connection.
//!
//! Polls immediately, then on every interval tick. Non-terminal results are
//! pushed as `job_status_update`. A terminal result is pushed once as
//! `job_completed` and the connection is closed. Terminal pushes wait up to
//! one poll interval for outbox space rather than being dropped. The first query failure
//! pushes a single `error` and closes the connection; there is no retry.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use pulse_core::{Envelope, JobId, JobState, JobStatusSource};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use super::connection::{ClientConnection, SendOutcome};
use crate::metrics::{JOB_POLL_ERRORS_TOTAL, JOB_POLLS_TOTAL};

/// How a bridge finished.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The job reached a terminal state.
    Finished(JobState),
    /// The status query failed.
    QueryFailed,
    /// The connection was cancelled.
    Cancelled,
    /// The connection's outbox was closed.
    ConnectionClosed,
}

/// Spawns and runs bridges against one status source.
pub struct JobStatusBridge {
    source: Arc<dyn JobStatusSource>,
    interval: Duration,
}

impl JobStatusBridge {
    /// Create a bridge factory polling `source` every `interval`.
    pub fn new(source: Arc<dyn JobStatusSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    /// Start polling for `conn`'s job on a new task.
    ///
    /// Returns `None` if `conn` is not a job-status connection.
    pub fn spawn(&self, conn: Arc<ClientConnection>) -> Option<JoinHandle<BridgeOutcome>> {
        let job_id = conn.job_id()?.clone();
        Some(tokio::spawn(run_job_bridge(
            self.source.clone(),
            conn,
            job_id,
            self.interval,
        )))
    }

    /// Poll interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Poll `job_id` for `conn` until terminal, failure or cancellation.
#[instrument(skip_all, fields(conn_id = %conn.id, job_id = %job_id))]
pub async fn run_job_bridge(
    source: Arc<dyn JobStatusSource>,
    conn: Arc<ClientConnection>,
    job_id: JobId,
    interval: Duration,
) -> BridgeOutcome {
    let cancel = conn.cancellation_token().clone();
    // First tick completes immediately.
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut polls: u64 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return BridgeOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        polls += 1;
        counter!(JOB_POLLS_TOTAL).increment(1);
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => return BridgeOutcome::Cancelled,
            r = source.job_status(&conn.tenant_id, &job_id) => r,
        };

        match result {
            Ok(status) if status.state.is_terminal() => {
                info!(state = status.state.as_str(), polls, "job reached terminal state");
                let _ = conn
                    .deliver_envelope(&Envelope::job_completed(&job_id, &status), interval)
                    .await;
                conn.cancel();
                return BridgeOutcome::Finished(status.state);
            }
            Ok(status) => {
                debug!(state = status.state.as_str(), progress = ?status.progress, "job status");
                if conn.send_envelope(&Envelope::job_status_update(&job_id, &status))
                    == SendOutcome::Closed
                {
                    return BridgeOutcome::ConnectionClosed;
                }
            }
            Err(e) => {
                counter!(JOB_POLL_ERRORS_TOTAL).increment(1);
                warn!(error = %e, polls, "job status query failed, closing");
                let envelope = Envelope::error(format!("job status query failed: {e}"))
                    .with_job_id(&job_id);
                let _ = conn.deliver_envelope(&envelope, interval).await;
                conn.cancel();
                return BridgeOutcome::QueryFailed;
            }
        }
    }
}
