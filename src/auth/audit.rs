//! Audit logging for authentication and authorization decisions.
//!
//! Every event is emitted through `tracing` with the event serialized as JSON
//! in the `audit` field, so any log aggregator can query it.
//!
//! | Event | When |
//! |-------|------|
//! | `auth.missing` | A protected route was called without usable credentials |
//! | `auth.accepted` | A bearer token passed validation |
//! | `auth.rejected` | A bearer token failed validation |
//! | `scope.denied` | A valid token lacked a required scope |

use serde::Serialize;

use super::token::Claims;

/// Structured audit event.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"auth.accepted"`).
    pub event: &'static str,
    /// Request path.
    pub path: String,
    /// Caller identity, when a token was validated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// Calling client application (`azp`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_app: Option<String>,
    /// Scopes that were required but not granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_scopes: Option<Vec<String>>,
    /// Server-side reason; never sent to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn bare(event: &'static str, path: &str) -> Self {
        Self {
            event,
            path: path.to_string(),
            principal: None,
            client_app: None,
            missing_scopes: None,
            reason: None,
        }
    }

    /// Construct an `auth.missing` event.
    #[must_use]
    pub fn missing(path: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::bare("auth.missing", path)
        }
    }

    /// Construct an `auth.accepted` event.
    #[must_use]
    pub fn accepted(path: &str, claims: &Claims) -> Self {
        Self {
            principal: Some(claims.principal().to_string()),
            client_app: claims.azp.clone(),
            ..Self::bare("auth.accepted", path)
        }
    }

    /// Construct an `auth.rejected` event.
    #[must_use]
    pub fn rejected(path: &str, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::bare("auth.rejected", path)
        }
    }

    /// Construct a `scope.denied` event.
    #[must_use]
    pub fn scope_denied(path: &str, claims: &Claims, missing: &[&str]) -> Self {
        Self {
            principal: Some(claims.principal().to_string()),
            client_app: claims.azp.clone(),
            missing_scopes: Some(missing.iter().map(|s| (*s).to_string()).collect()),
            ..Self::bare("scope.denied", path)
        }
    }

    fn is_denial(&self) -> bool {
        self.event != "auth.accepted"
    }
}

/// Emit an audit event.
///
/// ```text
/// WARN volcano_gateway::auth::audit audit={"event":"scope.denied",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) if event.is_denial() => tracing::warn!(audit = %json, "auth audit"),
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
