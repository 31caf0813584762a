//! Producer endpoints: live-event ingestion and document status fan-out.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use pulse_core::{EventId, LiveEvent, TenantId};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::errors::ApiError;
use super::identity::Identity;
use crate::server::AppState;
use crate::websocket::broadcast::FanoutReport;

/// Body of `POST /api/events`. The tenant comes from the request identity.
#[derive(Clone, Debug, Deserialize)]
pub struct IngestEvent {
    /// Producer-assigned ID; generated when absent.
    #[serde(default)]
    pub id: Option<EventId>,
    /// Upstream source.
    #[serde(default)]
    pub source_id: String,
    /// Type tag.
    pub event_type: String,
    /// Text payload.
    #[serde(default)]
    pub content: String,
    /// Media type.
    #[serde(default)]
    pub media_type: String,
    /// Media location.
    #[serde(default)]
    pub media_url: Option<String>,
    /// Sentiment classification.
    #[serde(default)]
    pub sentiment: Option<String>,
    /// Classifier confidence.
    #[serde(default)]
    pub confidence: Option<f64>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Upstream creation time; now when absent.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl IngestEvent {
    /// Attach the tenant and fill generated fields.
    pub fn into_event(self, tenant_id: TenantId) -> LiveEvent {
        LiveEvent {
            id: self.id.unwrap_or_default(),
            source_id: self.source_id,
            event_type: self.event_type,
            content: self.content,
            media_type: self.media_type,
            media_url: self.media_url,
            sentiment: self.sentiment,
            confidence: self.confidence,
            metadata: self.metadata,
            tenant_id,
            created_at: self.created_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Body of `POST /api/documents/{document_id}/status`.
#[derive(Clone, Debug, Deserialize)]
pub struct DocumentStatusBody {
    /// New processing status.
    pub status: String,
    /// Extra payload forwarded as `data`.
    #[serde(default)]
    pub data: Option<Value>,
}

/// POST /api/events
pub async fn ingest_event(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<IngestEvent>, JsonRejection>,
) -> Result<(StatusCode, Json<FanoutReport>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let event = body.into_event(identity.tenant_id);
    let report = state.hub.ingest(&event)?;
    debug!(event_id = %event.id, tenant_id = %event.tenant_id, ?report, "event ingested");
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// POST /api/documents/{document_id}/status
pub async fn document_status(
    State(state): State<AppState>,
    identity: Identity,
    Path(document_id): Path<String>,
    body: Result<Json<DocumentStatusBody>, JsonRejection>,
) -> Result<(StatusCode, Json<FanoutReport>), ApiError> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let report = state.hub.publish_document_status(
        &identity.tenant_id,
        &document_id,
        &body.status,
        body.data,
    )?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_body_fills_defaults() {
        let body: IngestEvent = serde_json::from_value(json!({"event_type": "alert"})).unwrap();
        let event = body.into_event(TenantId::from("acme"));
        assert_eq!(event.tenant_id.as_str(), "acme");
        assert_eq!(event.event_type, "alert");
        assert!(!event.id.is_empty());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn explicit_id_and_timestamp_are_kept() {
        let body: IngestEvent = serde_json::from_value(json!({
            "id": "evt-1",
            "event_type": "mention",
            "confidence": 0.4,
            "created_at": "2024-01-02T03:04:05Z"
        }))
        .unwrap();
        let event = body.into_event(TenantId::from("acme"));
        assert_eq!(event.id.as_str(), "evt-1");
        assert_eq!(event.confidence, Some(0.4));
        assert_eq!(event.created_at.to_rfc3339(), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn tenant_in_body_is_ignored() {
        let body: IngestEvent =
            serde_json::from_value(json!({"event_type": "x", "tenant_id": "other"})).unwrap();
        assert_eq!(body.into_event(TenantId::from("acme")).tenant_id.as_str(), "acme");
    }

    #[test]
    fn event_type_is_required() {
        assert!(serde_json::from_value::<IngestEvent>(json!({"content": "hi"})).is_err());
    }
}
