//! Error hierarchy for the Pulse hub.
//!
//! - [`HubError`]: top-level enum returned by hub operations
//! - [`FilterError`]: malformed subscription input, rejected at connect time
//! - [`CollaboratorError`]: analytics / job-status query failures
//!
//! Transport errors never appear here: they are routed straight to
//! connection teardown and are not surfaced to producers.

use thiserror::Error;

/// Malformed subscription filter parameters.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// `min_confidence` is not a decimal number.
    #[error("min_confidence is not a number: {raw:?}")]
    InvalidConfidence {
        /// The raw query value.
        raw: String,
    },
    /// `min_confidence` parsed but lies outside `[0, 1]`.
    #[error("min_confidence must be within [0, 1], got {value}")]
    ConfidenceOutOfRange {
        /// The parsed value.
        value: f64,
    },
}

/// Failure talking to an upstream collaborator.
#[derive(Debug, Error)]
pub enum CollaboratorError {
    /// Network / connection level failure.
    #[error("collaborator transport error: {0}")]
    Transport(String),
    /// Collaborator answered with a non-success status.
    #[error("collaborator returned status {code}: {message}")]
    Status {
        /// HTTP-like status code.
        code: u16,
        /// Response body or reason.
        message: String,
    },
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Response could not be decoded.
    #[error("failed to decode collaborator response: {0}")]
    Decode(String),
}

/// Top-level hub error.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid subscription filter.
    #[error(transparent)]
    Filter(#[from] FilterError),
    /// Collaborator query failed.
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    /// Input failed validation.
    #[error("validation failed: {0}")]
    Validation(String),
    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Connection limit reached.
    #[error("connection limit reached ({limit})")]
    CapacityExceeded {
        /// Configured maximum.
        limit: usize,
    },
}

/// Result alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn filter_error_display() {
        let err = FilterError::InvalidConfidence { raw: "abc".into() };
        assert_eq!(err.to_string(), "min_confidence is not a number: \"abc\"");
        let err = FilterError::ConfidenceOutOfRange { value: 2.0 };
        assert!(err.to_string().contains("[0, 1]"));
    }

    #[test]
    fn hub_error_wraps_filter_transparently() {
        let err: HubError = FilterError::ConfidenceOutOfRange { value: 3.0 }.into();
        assert_matches!(err, HubError::Filter(_));
        assert!(err.to_string().starts_with("min_confidence"));
    }

    #[test]
    fn collaborator_status_display() {
        let err = CollaboratorError::Status {
            code: 503,
            message: "unavailable".into(),
        };
        assert_eq!(err.to_string(), "collaborator returned status 503: unavailable");
    }

    #[test]
    fn serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: HubError = json_err.into();
        assert_matches!(err, HubError::Serialization(_));
    }

    #[test]
    fn capacity_display() {
        let err = HubError::CapacityExceeded { limit: 10 };
        assert_eq!(err.to_string(), "connection limit reached (10)");
    }
}
