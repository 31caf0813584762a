//! Wire envelope pushed to WebSocket clients, one JSON object per message.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::LiveEvent;
use crate::ids::{ConnectionId, JobId};
use crate::job::JobStatus;

/// Envelope `type` tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// First message on every connection.
    ConnectionEstablished,
    /// A matching live event.
    LiveEvent,
    /// Periodic analytics snapshot.
    AnalyticsUpdate,
    /// Non-terminal job status.
    JobStatusUpdate,
    /// Terminal job status; the connection closes afterwards.
    JobCompleted,
    /// Document processing progress for the tenant.
    DocumentStatusUpdate,
    /// Hub-side failure reported to the client.
    Error,
}

impl MessageType {
    /// Wire string for this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionEstablished => "connection_established",
            Self::LiveEvent => "live_event",
            Self::AnalyticsUpdate => "analytics_update",
            Self::JobStatusUpdate => "job_status_update",
            Self::JobCompleted => "job_completed",
            Self::DocumentStatusUpdate => "document_status_update",
            Self::Error => "error",
        }
    }
}

/// One outbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,
    /// Job the message refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    /// Job or document status string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Progress percentage, 0-100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Message payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Analytics snapshot (opaque).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<Value>,
    /// ISO-8601 creation time.
    pub timestamp: String,
    /// Error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    /// Bare envelope of the given type stamped with the current time.
    pub fn new(message_type: MessageType) -> Self {
        Self::at(message_type, Utc::now())
    }

    /// Bare envelope with an explicit timestamp.
    pub fn at(message_type: MessageType, at: DateTime<Utc>) -> Self {
        Self {
            message_type,
            job_id: None,
            status: None,
            progress: None,
            data: None,
            analytics: None,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
            error: None,
        }
    }

    /// `connection_established`, carrying the assigned connection ID.
    pub fn connection_established(connection_id: &ConnectionId) -> Self {
        Self::new(MessageType::ConnectionEstablished)
            .with_data(serde_json::json!({ "connection_id": connection_id }))
    }

    /// `live_event` carrying the full event as `data`.
    pub fn live_event(event: &LiveEvent) -> Self {
        Self::new(MessageType::LiveEvent).with_data(serde_json::to_value(event).unwrap_or_default())
    }

    /// `analytics_update` wrapping an opaque snapshot.
    pub fn analytics_update(snapshot: Value) -> Self {
        let mut env = Self::new(MessageType::AnalyticsUpdate);
        env.analytics = Some(snapshot);
        env
    }

    /// `job_status_update` for a non-terminal poll result.
    pub fn job_status_update(job_id: &JobId, status: &JobStatus) -> Self {
        Self::job(MessageType::JobStatusUpdate, job_id, status)
    }

    /// `job_completed` carrying the terminal payload.
    pub fn job_completed(job_id: &JobId, status: &JobStatus) -> Self {
        Self::job(MessageType::JobCompleted, job_id, status)
    }

    /// `document_status_update` for a tenant-wide document notification.
    pub fn document_status(document_id: &str, status: &str, data: Option<Value>) -> Self {
        let mut payload = serde_json::json!({ "document_id": document_id });
        if let Some(Value::Object(extra)) = data {
            if let Value::Object(ref mut map) = payload {
                map.extend(extra);
            }
        }
        let mut env = Self::new(MessageType::DocumentStatusUpdate).with_data(payload);
        env.status = Some(status.to_owned());
        env
    }

    /// `error` envelope.
    pub fn error(message: impl Into<String>) -> Self {
        let mut env = Self::new(MessageType::Error);
        env.error = Some(message.into());
        env
    }

    /// Attach a job ID.
    #[must_use]
    pub fn with_job_id(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }

    /// Attach a data payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Serialize to the JSON text frame sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    fn job(message_type: MessageType, job_id: &JobId, status: &JobStatus) -> Self {
        let mut env = Self::new(message_type).with_job_id(job_id);
        env.status = Some(status.state.as_str().to_owned());
        env.progress = status.progress;
        if !status.extra.is_empty() {
            env.data = Some(Value::Object(status.extra.clone()));
        }
        env
    }
}
