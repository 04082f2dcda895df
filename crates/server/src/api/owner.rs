// Owner extractor
// Decision: Owner is an opaque string from X-Owner; a missing or blank header is 401

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use calendar_core::EventError;

use super::error::ApiError;

pub const OWNER_HEADER: &str = "x-owner";

/// Authenticated owner of the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Owner(v.to_string()))
            .ok_or(ApiError(EventError::Unauthenticated))
    }
}
