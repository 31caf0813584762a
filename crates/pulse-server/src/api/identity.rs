//! Caller identity resolved by the upstream gateway.
//!
//! The hub trusts the `x-tenant-id` and `x-user-id` headers as-is.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use pulse_core::{TenantId, UserId};

use super::errors::ApiError;

/// Header carrying the tenant.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the user.
pub const USER_HEADER: &str = "x-user-id";

/// Validated tenant and user for a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Owning tenant.
    pub tenant_id: TenantId,
    /// Authenticated user.
    pub user_id: UserId,
}

impl Identity {
    /// Read both identity headers. Missing, empty or non-ASCII values are
    /// rejected.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        Ok(Self {
            tenant_id: TenantId::from(required_header(headers, TENANT_HEADER)?),
            user_id: UserId::from(required_header(headers, USER_HEADER)?),
        })
    }
}

fn required_header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::Unauthorized(name))
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}
