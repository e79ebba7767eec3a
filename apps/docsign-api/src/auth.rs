//! Operator authentication
//!
//! Initiator and billing endpoints require the shared `X-API-Key`.
//! Participant endpoints are authorized by the handle in their path.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::error::ApiError;
use crate::state::AppState;

/// Check the `X-API-Key` header; with no key configured everything passes
pub fn verify_api_key(headers: &HeaderMap, expected: Option<&str>) -> bool {
    let Some(expected) = expected else {
        return true;
    };
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|key| constant_time_eq(key.as_bytes(), expected.as_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !verify_api_key(request.headers(), state.config.api_key.as_deref()) {
        tracing::warn!(path = %request.uri().path(), "rejected operator request without a valid API key");
        return Err(ApiError::Unauthorized);
    }
    Ok(next.run(request).await)
}
