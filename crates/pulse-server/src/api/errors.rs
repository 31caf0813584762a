//! `ApiError`: maps hub failures to HTTP status codes with a JSON body.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pulse_core::HubError;
use serde_json::json;
use thiserror::Error;

/// Errors returned by HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Identity header absent or empty.
    #[error("missing or empty {0} header")]
    Unauthorized(&'static str),
    /// Request body or query could not be understood.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Hub operation failed.
    #[error(transparent)]
    Hub(#[from] HubError),
}

impl ApiError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Hub(err) => match err {
                HubError::Filter(_) | HubError::Validation(_) | HubError::Serialization(_) => {
                    StatusCode::BAD_REQUEST
                }
                HubError::CapacityExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
                HubError::Collaborator(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::Hub(HubError::Filter(_)) => "invalid_filter",
            Self::Hub(HubError::Validation(_) | HubError::Serialization(_)) => "invalid_input",
            Self::Hub(HubError::CapacityExceeded { .. }) => "capacity_exceeded",
            Self::Hub(HubError::Collaborator(_)) => "upstream_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{CollaboratorError, FilterError};

    #[test]
    fn status_mapping() {
        assert_eq!(
            ApiError::Unauthorized("x-tenant-id").status(),
            StatusCode::UNAUTHORIZED
        );
        let filter: ApiError = HubError::from(FilterError::ConfidenceOutOfRange { value: 2.0 }).into();
        assert_eq!(filter.status(), StatusCode::BAD_REQUEST);
        assert_eq!(filter.code(), "invalid_filter");
        let full: ApiError = HubError::CapacityExceeded { limit: 1 }.into();
        assert_eq!(full.status(), StatusCode::SERVICE_UNAVAILABLE);
        let upstream: ApiError = HubError::from(CollaboratorError::Transport("down".into())).into();
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn response_carries_json_body() {
        let resp = ApiError::Unauthorized("x-user-id").into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["error"]["code"], "unauthorized");
        assert_eq!(parsed["error"]["message"], "missing or empty x-user-id header");
    }
}
