//! Live domain events handed to the hub by producers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::HubError;
use crate::ids::{EventId, TenantId};

/// One ingested domain occurrence.
///
/// Immutable once constructed; the broadcaster only ever borrows it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Event ID.
    pub id: EventId,
    /// Upstream source that produced the event (feed, account, channel).
    pub source_id: String,
    /// Free-form type tag (e.g. `alert`, `mention`).
    pub event_type: String,
    /// Text payload.
    pub content: String,
    /// Media type of the payload (e.g. `text`, `image`, `video`).
    pub media_type: String,
    /// Optional media location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Optional sentiment classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<String>,
    /// Optional classifier confidence in `[0.0, 1.0]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Opaque metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// When the event was created upstream.
    pub created_at: DateTime<Utc>,
}

impl LiveEvent {
    /// Start building an event for a tenant. `id` and `created_at` are
    /// generated; everything else defaults to empty.
    pub fn builder(tenant_id: impl Into<TenantId>) -> LiveEventBuilder {
        LiveEventBuilder {
            event: LiveEvent {
                id: EventId::new(),
                source_id: String::new(),
                event_type: String::new(),
                content: String::new(),
                media_type: String::new(),
                media_url: None,
                sentiment: None,
                confidence: None,
                metadata: BTreeMap::new(),
                tenant_id: tenant_id.into(),
                created_at: Utc::now(),
            },
        }
    }

    /// Reject events whose confidence lies outside `[0.0, 1.0]`.
    pub fn validate(&self) -> Result<(), HubError> {
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(HubError::Validation(format!(
                    "confidence must be within [0, 1], got {c}"
                )));
            }
        }
        if self.event_type.is_empty() {
            return Err(HubError::Validation("event_type must not be empty".into()));
        }
        Ok(())
    }
}

/// Fluent constructor for [`LiveEvent`], mostly used by producers and tests.
#[derive(Debug)]
pub struct LiveEventBuilder {
    event: LiveEvent,
}

impl LiveEventBuilder {
    /// Set the event ID.
    #[must_use]
    pub fn id(mut self, id: impl Into<EventId>) -> Self {
        self.event.id = id.into();
        self
    }

    /// Set the source ID.
    #[must_use]
    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.event.source_id = source_id.into();
        self
    }

    /// Set the event type tag.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event.event_type = event_type.into();
        self
    }

    /// Set the text payload.
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.event.content = content.into();
        self
    }

    /// Set the media type.
    #[must_use]
    pub fn media_type(mut self, media_type: impl Into<String>) -> Self {
        self.event.media_type = media_type.into();
        self
    }

    /// Set the media URL.
    #[must_use]
    pub fn media_url(mut self, url: impl Into<String>) -> Self {
        self.event.media_url = Some(url.into());
        self
    }

    /// Set the sentiment classification.
    #[must_use]
    pub fn sentiment(mut self, sentiment: impl Into<String>) -> Self {
        self.event.sentiment = Some(sentiment.into());
        self
    }

    /// Set the classifier confidence.
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.event.confidence = Some(confidence);
        self
    }

    /// Insert one metadata entry.
    #[must_use]
    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self.event.metadata.insert(key.into(), value);
        self
    }

    /// Finish building.
    pub fn build(self) -> LiveEvent {
        self.event
    }
}
