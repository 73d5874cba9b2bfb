//! Signing key resolution from the identity provider's JWKS endpoint.
//!
//! # Caching
//!
//! Keys are cached per `kid` for `cache_ttl` (default 1 hour). A lookup that
//! misses, or hits a stale entry, re-fetches the whole key set and replaces
//! the cache with it, so rotated-out keys disappear on the next refresh.
//!
//! Refreshes are serialized behind one async lock and are not repeated more
//! often than `min_refresh_interval`. A caller presenting random `kid` values
//! therefore costs at most one upstream fetch per interval. Failed fetches
//! count too: during an outage, misses inside the interval get the last
//! error back (or a stale key, if the `kid` was cached) without waiting on
//! the endpoint again.
//!
//! Errors are terminal for the request that hit them; nothing here retries.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm, PublicKeyUse},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::JwksConfig;

/// Failure to produce a signing key for a `kid`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyResolverError {
    /// The key set has no usable entry for this key id.
    #[error("no signing key with kid '{0}'")]
    KeyNotFound(String),

    /// The discovery endpoint was unreachable, timed out, or returned garbage.
    #[error("key discovery unavailable: {0}")]
    DiscoveryUnavailable(String),
}

/// A public key usable for signature verification.
#[derive(Clone)]
pub struct SigningKey {
    /// Key identifier from the key set
    pub kid: String,
    /// The only algorithm this key is accepted for
    pub algorithm: Algorithm,
    /// Verification key material
    pub key: DecodingKey,
}

impl SigningKey {
    /// Build a key entry.
    #[must_use]
    pub fn new(kid: impl Into<String>, algorithm: Algorithm, key: DecodingKey) -> Self {
        Self {
            kid: kid.into(),
            algorithm,
            key,
        }
    }
}

// Key material stays out of logs.
impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

/// Source of signing keys, looked up by key id.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Return the verification key for `kid`.
    async fn resolve(&self, kid: &str) -> Result<SigningKey, KeyResolverError>;
}

/// Fixed in-process key map.
#[derive(Debug, Default)]
pub struct StaticKeyResolver {
    keys: HashMap<String, SigningKey>,
}

impl StaticKeyResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key; replaces any existing key with the same id.
    #[must_use]
    pub fn with_key(mut self, key: SigningKey) -> Self {
        self.keys.insert(key.kid.clone(), key);
        self
    }

    /// Add an HS256 shared-secret key.
    #[must_use]
    pub fn with_secret(self, kid: &str, secret: &[u8]) -> Self {
        self.with_key(SigningKey::new(
            kid,
            Algorithm::HS256,
            DecodingKey::from_secret(secret),
        ))
    }
}

#[async_trait]
impl KeyResolver for StaticKeyResolver {
    async fn resolve(&self, kid: &str) -> Result<SigningKey, KeyResolverError> {
        self.keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyResolverError::KeyNotFound(kid.to_string()))
    }
}

/// Cached key with its fetch time.
struct CachedKey {
    key: SigningKey,
    fetched_at: Instant,
}

/// Outcome of the most recent fetch, successful or not.
struct RefreshAttempt {
    at: Instant,
    error: Option<KeyResolverError>,
}

/// Resolver backed by a remote JWKS document with a per-`kid` TTL cache.
pub struct JwksKeyResolver {
    uri: String,
    http: reqwest::Client,
    keys: DashMap<String, CachedKey>,
    ttl: Duration,
    min_refresh_interval: Duration,
    /// Last fetch attempt; also the refresh lock.
    last_attempt: Mutex<Option<RefreshAttempt>>,
}

impl JwksKeyResolver {
    /// Create a resolver for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &JwksConfig) -> crate::Result<Self> {
        let http = reqwest::Client::builder()
            .https_only(config.require_https)
            .timeout(config.timeout)
            .build()?;

        if !config.uri.starts_with("https://") {
            warn!(uri = %config.uri, "JWKS endpoint is not HTTPS");
        }

        Ok(Self {
            uri: config.uri.clone(),
            http,
            keys: DashMap::new(),
            ttl: config.cache_ttl,
            min_refresh_interval: config.min_refresh_interval,
            last_attempt: Mutex::new(None),
        })
    }

    /// The JWKS endpoint this resolver reads.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Number of keys currently cached.
    #[must_use]
    pub fn cached_keys(&self) -> usize {
        self.keys.len()
    }

    fn fresh(&self, kid: &str) -> Option<SigningKey> {
        self.keys
            .get(kid)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| entry.key.clone())
    }

    /// Re-fetch the key set unless another task just tried, then look `kid` up.
    ///
    /// Inside `min_refresh_interval` of the last attempt a miss is answered
    /// from the cache, or with that attempt's error if it failed.
    async fn refresh_and_resolve(&self, kid: &str) -> Result<SigningKey, KeyResolverError> {
        let mut last_attempt = self.last_attempt.lock().await;

        // A concurrent refresh may have landed while we waited.
        if let Some(key) = self.fresh(kid) {
            return Ok(key);
        }

        if let Some(attempt) = last_attempt.as_ref() {
            if attempt.at.elapsed() < self.min_refresh_interval {
                debug!(
                    kid = %kid,
                    failed = attempt.error.is_some(),
                    "JWKS fetched recently, not re-fetching"
                );
                if let Some(key) = self.cached(kid) {
                    return Ok(key);
                }
                return Err(attempt
                    .error
                    .clone()
                    .unwrap_or_else(|| KeyResolverError::KeyNotFound(kid.to_string())));
            }
        }

        let result = self.fetch().await;
        let now = Instant::now();
        match result {
            Ok(jwks) => {
                self.replace_keys(&jwks, now);
                *last_attempt = Some(RefreshAttempt { at: now, error: None });
            }
            Err(e) => {
                warn!(uri = %self.uri, error = %e, "JWKS fetch failed");
                *last_attempt = Some(RefreshAttempt {
                    at: now,
                    error: Some(e.clone()),
                });
                return self.cached(kid).ok_or(e);
            }
        }

        self.cached(kid)
            .ok_or_else(|| KeyResolverError::KeyNotFound(kid.to_string()))
    }

    /// Cached key for `kid`, stale or not.
    fn cached(&self, kid: &str) -> Option<SigningKey> {
        self.keys.get(kid).map(|entry| entry.key.clone())
    }

    async fn fetch(&self) -> Result<JwkSet, KeyResolverError> {
        debug!(uri = %self.uri, "Fetching JWKS");
        let response = self
            .http
            .get(&self.uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| KeyResolverError::DiscoveryUnavailable(e.to_string()))?;

        response.json::<JwkSet>().await.map_err(|e| {
            KeyResolverError::DiscoveryUnavailable(format!("malformed key set: {e}"))
        })
    }

    /// Insert every usable key from `jwks` and drop the ones it no longer lists.
    fn replace_keys(&self, jwks: &JwkSet, fetched_at: Instant) {
        let fresh: Vec<SigningKey> = jwks.keys.iter().filter_map(signing_key_from_jwk).collect();

        for key in &fresh {
            self.keys.insert(
                key.kid.clone(),
                CachedKey {
                    key: key.clone(),
                    fetched_at,
                },
            );
        }
        self.keys
            .retain(|kid, _| fresh.iter().any(|key| &key.kid == kid));

        info!(
            uri = %self.uri,
            published = jwks.keys.len(),
            usable = fresh.len(),
            "JWKS refreshed"
        );
    }
}

#[async_trait]
impl KeyResolver for JwksKeyResolver {
    async fn resolve(&self, kid: &str) -> Result<SigningKey, KeyResolverError> {
        if let Some(key) = self.fresh(kid) {
            return Ok(key);
        }
        self.refresh_and_resolve(kid).await
    }
}

/// Convert a published JWK into a verification key.
///
/// Only asymmetric signature keys are accepted; the algorithm is pinned from
/// the key type so a token header cannot pick a weaker one.
fn signing_key_from_jwk(jwk: &Jwk) -> Option<SigningKey> {
    let kid = jwk.common.key_id.as_deref()?;

    if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
        return None;
    }

    let (algorithm, key) = match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let algorithm = match jwk.common.key_algorithm {
                Some(KeyAlgorithm::RS384) => Algorithm::RS384,
                Some(KeyAlgorithm::RS512) => Algorithm::RS512,
                Some(KeyAlgorithm::PS256) => Algorithm::PS256,
                Some(KeyAlgorithm::PS384) => Algorithm::PS384,
                Some(KeyAlgorithm::PS512) => Algorithm::PS512,
                _ => Algorithm::RS256,
            };
            (algorithm, DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok()?)
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let algorithm = match ec.curve {
                EllipticCurve::P256 => Algorithm::ES256,
                EllipticCurve::P384 => Algorithm::ES384,
                _ => return None,
            };
            (algorithm, DecodingKey::from_ec_components(&ec.x, &ec.y).ok()?)
        }
        _ => return None,
    };

    Some(SigningKey::new(kid, algorithm, key))
}
