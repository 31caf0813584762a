//! Subscription filters and the matcher applied during fan-out.
//!
//! A filter narrows which events reach a connection *within* its tenant.
//! Every populated dimension must contain the event's value; empty
//! dimensions pass. Tenant isolation is enforced by the registry, never here.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::errors::FilterError;
use crate::event::LiveEvent;

/// Raw filter parameters as they arrive on the upgrade request query string.
///
/// Lists are comma-separated; `min_confidence` is a decimal.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterQuery {
    /// Comma-separated source IDs.
    #[serde(default)]
    pub source_ids: Option<String>,
    /// Comma-separated event types.
    #[serde(default)]
    pub event_types: Option<String>,
    /// Comma-separated media types.
    #[serde(default)]
    pub media_types: Option<String>,
    /// Comma-separated sentiments.
    #[serde(default)]
    pub sentiments: Option<String>,
    /// Minimum confidence threshold in `[0, 1]`.
    #[serde(default)]
    pub min_confidence: Option<String>,
}

/// Per-connection subscription predicate. Immutable once built.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StreamFilter {
    /// Allowed source IDs (empty = any).
    pub source_ids: HashSet<String>,
    /// Allowed event types (empty = any).
    pub event_types: HashSet<String>,
    /// Allowed media types (empty = any).
    pub media_types: HashSet<String>,
    /// Allowed sentiments (empty = any).
    pub sentiments: HashSet<String>,
    /// Minimum confidence (0 = no restriction).
    pub min_confidence: f64,
}

impl StreamFilter {
    /// A filter that matches every event of the tenant.
    pub fn all() -> Self {
        Self::default()
    }

    /// Build a filter from query parameters.
    ///
    /// Malformed input is rejected here so the matcher itself never fails.
    pub fn from_query(query: &FilterQuery) -> Result<Self, FilterError> {
        let min_confidence = match query.min_confidence.as_deref().map(str::trim) {
            None | Some("") => 0.0,
            Some(raw) => parse_confidence(raw)?,
        };
        Ok(Self {
            source_ids: split_list(query.source_ids.as_deref()),
            event_types: split_list(query.event_types.as_deref()),
            media_types: split_list(query.media_types.as_deref()),
            sentiments: split_list(query.sentiments.as_deref()),
            min_confidence,
        })
    }

    /// Restrict to these event types.
    #[must_use]
    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Restrict to these source IDs.
    #[must_use]
    pub fn with_source_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.source_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Require at least this confidence.
    #[must_use]
    pub fn with_min_confidence(mut self, min: f64) -> Self {
        self.min_confidence = min;
        self
    }

    /// Whether no dimension is populated (broadcast mode).
    pub fn is_empty(&self) -> bool {
        self.source_ids.is_empty()
            && self.event_types.is_empty()
            && self.media_types.is_empty()
            && self.sentiments.is_empty()
            && self.min_confidence <= 0.0
    }

    /// Evaluate the filter against one event.
    pub fn matches(&self, event: &LiveEvent) -> bool {
        dimension_passes(&self.source_ids, Some(&event.source_id))
            && dimension_passes(&self.event_types, Some(&event.event_type))
            && dimension_passes(&self.media_types, Some(&event.media_type))
            && dimension_passes(&self.sentiments, event.sentiment.as_deref())
            && event.confidence.is_none_or(|c| c >= self.min_confidence)
    }
}

/// Free-function form of [`StreamFilter::matches`].
pub fn matches(filter: &StreamFilter, event: &LiveEvent) -> bool {
    filter.matches(event)
}

fn dimension_passes(allowed: &HashSet<String>, value: Option<&str>) -> bool {
    allowed.is_empty() || value.is_some_and(|v| allowed.contains(v))
}

fn split_list(raw: Option<&str>) -> HashSet<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToOwned::to_owned)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_confidence(raw: &str) -> Result<f64, FilterError> {
    let value: f64 = raw.parse().map_err(|_| FilterError::InvalidConfidence {
        raw: raw.to_owned(),
    })?;
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(FilterError::ConfidenceOutOfRange { value });
    }
    Ok(value)
}
