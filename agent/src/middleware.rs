//! Middleware for the agent server

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use std::sync::Arc;

use crate::AppState;

/// Extractor that validates the `Authorization: Bearer <key>` header.
/// Add it as the first argument of every handler.
pub struct ApiKeyAuth;

impl FromRequestParts<Arc<AppState>> for ApiKeyAuth {
    type Rejection = StatusCode;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "));

        match token {
            Some(token) if token == state.api_key => Ok(ApiKeyAuth),
            _ => Err(StatusCode::UNAUTHORIZED),
        }
    }
}
