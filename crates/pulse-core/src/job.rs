//! Job-status types returned by the external status collaborator.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Processing state of an external job.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobState {
    /// Accepted, not yet started.
    Queued,
    /// In progress.
    Processing,
    /// Finished successfully (terminal).
    Completed,
    /// Finished unsuccessfully (terminal).
    Failed,
    /// Any status string the hub does not recognise. Treated as non-terminal.
    Other(String),
}

impl JobState {
    /// Whether no further status change can follow.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Wire string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for JobState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "queued" => Self::Queued,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl From<JobState> for String {
    fn from(state: JobState) -> Self {
        state.as_str().to_owned()
    }
}

/// One poll result: `{status, progress, ...extra}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    /// Current state.
    #[serde(rename = "status")]
    pub state: JobState,
    /// Progress percentage, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Any other fields the collaborator returned, forwarded verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobStatus {
    /// Status with no progress or extra fields.
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            progress: None,
            extra: Map::new(),
        }
    }

    /// Attach a progress percentage.
    #[must_use]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }
}
