//! Bearer token validation.
//!
//! # Verification flow
//!
//! 1. Decode the JWT header (no verification) to extract `kid`.
//! 2. Resolve the signing key through the [`KeyResolver`].
//! 3. Verify the signature using only the algorithm pinned to that key.
//! 4. Verify `exp` (and `nbf` when present), `iss`, and `aud`.
//! 5. Return the decoded [`Claims`].
//!
//! Every failure is terminal for the request; nothing is retried.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use super::jwks::{KeyResolver, KeyResolverError};

/// Expected audience and issuer, compared exactly against token claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOptions {
    expected_audience: String,
    expected_issuer: String,
    leeway: Duration,
}

impl ValidationOptions {
    /// Options with zero clock leeway.
    #[must_use]
    pub fn new(expected_audience: impl Into<String>, expected_issuer: impl Into<String>) -> Self {
        Self {
            expected_audience: expected_audience.into(),
            expected_issuer: expected_issuer.into(),
            leeway: Duration::ZERO,
        }
    }

    /// Tolerate clock skew on `exp` / `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The required `aud` value.
    #[must_use]
    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }

    /// The required `iss` value.
    #[must_use]
    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// Clock skew tolerance.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    fn to_validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[&self.expected_audience]);
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_required_spec_claims(&["exp", "aud", "iss"]);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.leeway = self.leeway.as_secs();
        validation
    }
}

/// `aud` claim: a single value or a list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    /// `"aud": "x"`
    Single(String),
    /// `"aud": ["x", "y"]`
    Many(Vec<String>),
}

impl Audience {
    /// Whether `value` is one of the audiences.
    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::Single(aud) => aud == value,
            Self::Many(auds) => auds.iter().any(|aud| aud == value),
        }
    }
}

/// Verified token body.
///
/// Produced once per request by [`TokenValidator::validate`] and carried in
/// that request's extensions only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Space-delimited delegated scopes (`scp`, or `scope` from non-Entra issuers)
    #[serde(default, alias = "scope", skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,
    /// Audience
    pub aud: Audience,
    /// Issuer
    pub iss: String,
    /// Expiry (Unix timestamp)
    pub exp: u64,
    /// Not-before (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    /// Issued-at (Unix timestamp)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    /// Subject
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Object id of the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    /// Tenant id of the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,
    /// Client application that requested the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Sign-in name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
}

impl Claims {
    /// Granted scope names, split on whitespace. Empty when the claim is absent.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scp.as_deref().unwrap_or_default().split_whitespace()
    }

    /// Best identifier for logs: `preferred_username`, then `oid`, then `sub`.
    #[must_use]
    pub fn principal(&self) -> &str {
        self.preferred_username
            .as_deref()
            .or(self.oid.as_deref())
            .or(self.sub.as_deref())
            .unwrap_or("unknown")
    }
}

/// Reasons a token is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Signature does not verify, or the header names an algorithm the key is not pinned to.
    #[error("token signature is invalid")]
    SignatureInvalid,

    /// `aud` does not contain the expected audience.
    #[error("token audience does not match")]
    AudienceMismatch,

    /// `iss` is not the expected issuer.
    #[error("token issuer does not match")]
    IssuerMismatch,

    /// `exp` is in the past.
    #[error("token has expired")]
    Expired,

    /// `nbf` is in the future.
    #[error("token is not valid yet")]
    NotYetValid,

    /// No signing key could be obtained.
    #[error("signing key resolution failed: {0}")]
    KeyResolutionFailed(#[from] KeyResolverError),

    /// Not a JWT, no `kid`, or claims that cannot be decoded.
    #[error("malformed token: {0}")]
    Malformed(String),
}

impl From<jsonwebtoken::errors::Error> for ValidationError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Self::SignatureInvalid,
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidAudience => Self::AudienceMismatch,
            ErrorKind::InvalidIssuer => Self::IssuerMismatch,
            _ => Self::Malformed(err.to_string()),
        }
    }
}

/// Verifies bearer tokens against keys from a [`KeyResolver`].
///
/// Stateless apart from the resolver; safe to share across requests.
pub struct TokenValidator {
    resolver: Arc<dyn KeyResolver>,
    options: ValidationOptions,
}

impl TokenValidator {
    /// Create a validator with fixed options.
    #[must_use]
    pub fn new(resolver: Arc<dyn KeyResolver>, options: ValidationOptions) -> Self {
        Self { resolver, options }
    }

    /// The options used by [`validate`](Self::validate).
    #[must_use]
    pub fn options(&self) -> &ValidationOptions {
        &self.options
    }

    /// Validate `token` with the configured options.
    pub async fn validate(&self, token: &str) -> Result<Claims, ValidationError> {
        self.validate_with(token, &self.options).await
    }

    /// Validate `token` with explicit options.
    pub async fn validate_with(
        &self,
        token: &str,
        options: &ValidationOptions,
    ) -> Result<Claims, ValidationError> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;

        let kid = header
            .kid
            .as_deref()
            .ok_or_else(|| ValidationError::Malformed("header has no 'kid'".to_string()))?;

        let key = self.resolver.resolve(kid).await?;

        let validation = options.to_validation(key.algorithm);
        let data = jsonwebtoken::decode::<Claims>(token, &key.key, &validation)?;

        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwks::StaticKeyResolver;
    use jsonwebtoken::{EncodingKey, Header, get_current_timestamp};
    use serde_json::{Value, json};

    const AUDIENCE: &str = "c7639087-cb59-4011-88ed-5d535bafc525";
    const ISSUER: &str = "https://login.microsoftonline.com/e801a3ad/v2.0";
    const SECRET: &[u8] = b"test-signing-secret-0123456789abcdef";

    fn validator() -> TokenValidator {
        let resolver = StaticKeyResolver::new().with_secret("kid-1", SECRET);
        TokenValidator::new(Arc::new(resolver), ValidationOptions::new(AUDIENCE, ISSUER))
    }

    fn claims(scp: &str) -> Value {
        json!({
            "aud": AUDIENCE,
            "iss": ISSUER,
            "exp": get_current_timestamp() + 3600,
            "scp": scp,
            "sub": "caller",
        })
    }

    fn sign(claims: &Value, kid: Option<&str>, secret: &[u8]) -> String {
        let mut header = Header::new(Algorithm::HS256);
        header.kid = kid.map(str::to_string);
        jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn valid_token_preserves_scope_claim() {
        let token = sign(&claims("access_as_reader other_scope"), Some("kid-1"), SECRET);

        let claims = validator().validate(&token).await.unwrap();

        assert_eq!(claims.scp.as_deref(), Some("access_as_reader other_scope"));
        assert_eq!(claims.iss, ISSUER);
        assert!(claims.aud.contains(AUDIENCE));
    }

    #[tokio::test]
    async fn audience_array_is_accepted() {
        let mut body = claims("access_as_reader");
        body["aud"] = json!(["other-app", AUDIENCE]);
        let token = sign(&body, Some("kid-1"), SECRET);

        assert!(validator().validate(&token).await.is_ok());
    }

    #[tokio::test]
    async fn foreign_signature_is_rejected() {
        let token = sign(&claims("access_as_reader"), Some("kid-1"), b"some-other-secret");

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::SignatureInvalid
        );
    }

    #[tokio::test]
    async fn swapped_payload_is_rejected() {
        let genuine = sign(&claims("other_scope"), Some("kid-1"), SECRET);
        let forged = sign(&claims("access_as_reader"), Some("kid-1"), SECRET);

        let genuine_parts: Vec<&str> = genuine.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        let tampered = format!("{}.{}.{}", genuine_parts[0], forged_parts[1], genuine_parts[2]);

        assert_eq!(
            validator().validate(&tampered).await.unwrap_err(),
            ValidationError::SignatureInvalid
        );
    }

    #[tokio::test]
    async fn expired_one_second_ago() {
        let mut body = claims("access_as_reader");
        body["exp"] = json!(get_current_timestamp() - 1);
        let token = sign(&body, Some("kid-1"), SECRET);

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::Expired
        );
    }

    #[tokio::test]
    async fn leeway_accepts_recently_expired() {
        let mut body = claims("access_as_reader");
        body["exp"] = json!(get_current_timestamp() - 1);
        let token = sign(&body, Some("kid-1"), SECRET);

        let lenient = ValidationOptions::new(AUDIENCE, ISSUER).with_leeway(Duration::from_secs(60));
        assert!(validator().validate_with(&token, &lenient).await.is_ok());
    }

    #[tokio::test]
    async fn future_not_before_is_rejected() {
        let mut body = claims("access_as_reader");
        body["nbf"] = json!(get_current_timestamp() + 600);
        let token = sign(&body, Some("kid-1"), SECRET);

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::NotYetValid
        );
    }

    #[tokio::test]
    async fn wrong_audience_is_rejected() {
        let mut body = claims("access_as_reader");
        body["aud"] = json!("another-application");
        let token = sign(&body, Some("kid-1"), SECRET);

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::AudienceMismatch
        );
    }

    #[tokio::test]
    async fn wrong_issuer_is_rejected() {
        let mut body = claims("access_as_reader");
        body["iss"] = json!("https://login.microsoftonline.com/someone-else/v2.0");
        let token = sign(&body, Some("kid-1"), SECRET);

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::IssuerMismatch
        );
    }

    #[tokio::test]
    async fn unknown_kid_fails_key_resolution() {
        let token = sign(&claims("access_as_reader"), Some("rotated"), SECRET);

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::KeyResolutionFailed(KeyResolverError::KeyNotFound(
                "rotated".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn missing_kid_is_malformed() {
        let token = sign(&claims("access_as_reader"), None, SECRET);

        assert!(matches!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::Malformed(_)
        ));
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        for token in ["", "not-a-jwt", "a.b.c", "....."] {
            assert!(
                matches!(
                    validator().validate(token).await.unwrap_err(),
                    ValidationError::Malformed(_)
                ),
                "token {token:?} should be malformed"
            );
        }
    }

    #[tokio::test]
    async fn header_algorithm_must_match_key() {
        let mut header = Header::new(Algorithm::HS512);
        header.kid = Some("kid-1".to_string());
        let token = jsonwebtoken::encode(
            &header,
            &claims("access_as_reader"),
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();

        assert_eq!(
            validator().validate(&token).await.unwrap_err(),
            ValidationError::SignatureInvalid
        );
    }

    #[test]
    fn scopes_split_on_any_whitespace() {
        let claims: Claims = serde_json::from_value(json!({
            "aud": AUDIENCE,
            "iss": ISSUER,
            "exp": 1,
            "scp": " access_as_reader\tother_scope  ",
        }))
        .unwrap();

        assert_eq!(
            claims.scopes().collect::<Vec<_>>(),
            vec!["access_as_reader", "other_scope"]
        );
    }

    #[test]
    fn scope_alias_is_accepted() {
        let claims: Claims = serde_json::from_value(json!({
            "aud": AUDIENCE,
            "iss": ISSUER,
            "exp": 1,
            "scope": "access_as_reader",
        }))
        .unwrap();

        assert_eq!(claims.scp.as_deref(), Some("access_as_reader"));
    }

    #[test]
    fn principal_prefers_username() {
        let claims: Claims = serde_json::from_value(json!({
            "aud": AUDIENCE,
            "iss": ISSUER,
            "exp": 1,
            "sub": "opaque",
            "preferred_username": "alice@contoso.com",
        }))
        .unwrap();

        assert_eq!(claims.principal(), "alice@contoso.com");
    }
}
