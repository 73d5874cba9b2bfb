//! Caller-facing error responses.
//!
//! Bodies are deliberately generic; the detailed cause is logged server-side
//! by whoever produced the error.

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::auth::{KeyResolverError, ValidationError};
use crate::store::StoreError;

/// Request outcome other than success.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No usable `Authorization: Bearer` header.
    #[error("authentication required")]
    Unauthenticated,

    /// Token failed validation.
    #[error("invalid token")]
    TokenInvalid,

    /// Token is valid but lacks a required scope.
    #[error("insufficient scope")]
    InsufficientScope,

    /// Missing or unusable request parameter.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Identity provider or document store could not serve the request.
    #[error("upstream unavailable")]
    UpstreamUnavailable,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::TokenInvalid | Self::InsufficientScope => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::TokenInvalid => "invalid_token",
            Self::InsufficientScope => "insufficient_scope",
            Self::BadRequest(_) => "bad_request",
            Self::UpstreamUnavailable => "upstream_unavailable",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Unauthenticated => {
                "Missing Authorization header. Use: Authorization: Bearer <token>".to_string()
            }
            Self::TokenInvalid => "Invalid token".to_string(),
            Self::InsufficientScope => {
                "Unauthorized. The token doesn't have a valid scope".to_string()
            }
            Self::BadRequest(message) => message.clone(),
            Self::UpstreamUnavailable => {
                "Upstream service unavailable. Try again later.".to_string()
            }
        }
    }

    /// Log a store failure and convert it to the generic upstream error.
    pub fn from_store(err: &StoreError) -> Self {
        error!(error = %err, "Document store request failed");
        Self::UpstreamUnavailable
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::KeyResolutionFailed(KeyResolverError::DiscoveryUnavailable(_)) => {
                Self::UpstreamUnavailable
            }
            _ => Self::TokenInvalid,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.code(),
            "message": self.message(),
        }));

        match self {
            Self::Unauthenticated => (
                self.status(),
                [(header::WWW_AUTHENTICATE, "Bearer")],
                body,
            )
                .into_response(),
            Self::TokenInvalid => (
                self.status(),
                [(header::WWW_AUTHENTICATE, r#"Bearer error="invalid_token""#)],
                body,
            )
                .into_response(),
            Self::InsufficientScope => (
                self.status(),
                [(header::WWW_AUTHENTICATE, r#"Bearer error="insufficient_scope""#)],
                body,
            )
                .into_response(),
            Self::BadRequest(_) | Self::UpstreamUnavailable => {
                (self.status(), body).into_response()
            }
        }
    }
}
