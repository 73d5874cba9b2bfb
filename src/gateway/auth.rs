//! Request gate for protected routes.
//!
//! - Missing or non-`Bearer` `Authorization` header: 401, validator not called
//! - Token fails validation: 403 (503 if key discovery is down)
//! - Token valid: [`Claims`] inserted into *this request's* extensions
//!
//! Handlers pull the claims back out with the [`Authenticated`] extractor and
//! run the scope check before touching any data.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, Request, header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use super::error::ApiError;
use super::router::AppState;
use crate::auth::{AuditEvent, Claims, audit};

/// Why no bearer token could be taken from the headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingToken {
    /// No `Authorization` header.
    NoHeader,
    /// Header is not valid visible ASCII.
    Unreadable,
    /// Scheme is not `Bearer`.
    WrongScheme,
    /// `Bearer` with nothing after it.
    Empty,
}

impl MissingToken {
    fn reason(self) -> &'static str {
        match self {
            Self::NoHeader => "no Authorization header",
            Self::Unreadable => "unreadable Authorization header",
            Self::WrongScheme => "Authorization scheme is not Bearer",
            Self::Empty => "empty bearer token",
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, MissingToken> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(MissingToken::NoHeader)?
        .to_str()
        .map_err(|_| MissingToken::Unreadable)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(if value.trim().eq_ignore_ascii_case("bearer") {
            MissingToken::Empty
        } else {
            MissingToken::WrongScheme
        })?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(MissingToken::WrongScheme);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(MissingToken::Empty);
    }
    Ok(token)
}

/// Authentication middleware for protected routes.
pub async fn request_gate(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let token = match bearer_token(request.headers()) {
        Ok(token) => token.to_string(),
        Err(missing) => {
            warn!(path = %path, reason = missing.reason(), "Unauthenticated request");
            audit::emit(&AuditEvent::missing(&path, missing.reason()));
            return ApiError::Unauthenticated.into_response();
        }
    };

    match state.validator.validate(&token).await {
        Ok(claims) => {
            debug!(path = %path, principal = %claims.principal(), "Authenticated request");
            audit::emit(&AuditEvent::accepted(&path, &claims));
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(e) => {
            warn!(path = %path, error = %e, "Token validation failed");
            audit::emit(&AuditEvent::rejected(&path, e.to_string()));
            ApiError::from(e).into_response()
        }
    }
}

/// Claims of the current request, placed there by [`request_gate`].
///
/// Rejects with 401 if the gate did not run, so a route that forgot the gate
/// fails closed.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Claims);

impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .remove::<Claims>()
            .map(Authenticated)
            .ok_or(ApiError::Unauthenticated)
    }
}
