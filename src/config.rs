//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::{RequiredScopes, ValidationOptions};
use crate::{Error, Result};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "VOLCANO_GATEWAY_";

/// Microsoft identity platform multi-tenant key discovery endpoint.
pub const DEFAULT_JWKS_URI: &str = "https://login.microsoftonline.com/common/discovery/keys";

/// Base URL used to derive the authority from a tenant id.
const DEFAULT_AUTHORITY_BASE: &str = "https://login.microsoftonline.com";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving secrets.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token validation configuration
    pub auth: AuthConfig,
    /// Signing key discovery configuration
    pub jwks: JwksConfig,
    /// Document store configuration
    pub store: StoreConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Identity provider settings used to validate bearer tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Application (client) id registered with the identity provider
    pub client_id: Option<String>,
    /// Directory (tenant) id
    pub tenant_id: Option<String>,
    /// Authority URL; derived from `tenant_id` when unset
    pub authority: Option<String>,
    /// Expected `iss` claim; defaults to `<authority>/v2.0`
    pub issuer: Option<String>,
    /// Expected `aud` claim; defaults to `client_id`
    pub audience: Option<String>,
    /// Scopes every protected endpoint requires
    pub required_scopes: Vec<String>,
    /// Clock skew tolerated on `exp` / `nbf`
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            tenant_id: None,
            authority: None,
            issuer: None,
            audience: None,
            required_scopes: vec!["access_as_reader".to_string()],
            leeway: Duration::ZERO,
        }
    }
}

impl AuthConfig {
    /// Authority URL, explicit or derived from the tenant id.
    #[must_use]
    pub fn resolved_authority(&self) -> Option<String> {
        self.authority
            .as_deref()
            .map(|a| a.trim_end_matches('/').to_string())
            .or_else(|| {
                self.tenant_id
                    .as_deref()
                    .map(|tenant| format!("{DEFAULT_AUTHORITY_BASE}/{tenant}"))
            })
    }

    /// Expected issuer: explicit, or `<authority>/v2.0`.
    #[must_use]
    pub fn resolved_issuer(&self) -> Option<String> {
        self.issuer
            .clone()
            .or_else(|| self.resolved_authority().map(|a| format!("{a}/v2.0")))
    }

    /// Expected audience: explicit, or the client id.
    #[must_use]
    pub fn resolved_audience(&self) -> Option<String> {
        self.audience.clone().or_else(|| self.client_id.clone())
    }

    /// Build the immutable validation options for the token validator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the audience or issuer cannot be resolved.
    pub fn validation_options(&self) -> Result<ValidationOptions> {
        let audience = self.resolved_audience().ok_or_else(|| {
            Error::Config("auth.client_id (or auth.audience) is required".to_string())
        })?;
        let issuer = self.resolved_issuer().ok_or_else(|| {
            Error::Config(
                "auth.tenant_id, auth.authority or auth.issuer is required".to_string(),
            )
        })?;

        Ok(ValidationOptions::new(audience, issuer).with_leeway(self.leeway))
    }

    /// The configured required scopes as a de-duplicated set.
    #[must_use]
    pub fn required_scopes(&self) -> RequiredScopes {
        RequiredScopes::new(self.required_scopes.iter().cloned())
    }
}

/// Signing key discovery (JWKS) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksConfig {
    /// JWKS endpoint
    pub uri: String,
    /// How long a fetched key stays fresh
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Minimum gap between refreshes caused by unknown key ids
    #[serde(with = "humantime_serde")]
    pub min_refresh_interval: Duration,
    /// Network timeout for one fetch
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Refuse non-HTTPS key endpoints
    pub require_https: bool,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_JWKS_URI.to_string(),
            cache_ttl: Duration::from_secs(3600),
            min_refresh_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
            require_https: true,
        }
    }
}

/// Which document store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Azure Cosmos DB SQL API
    #[default]
    Cosmos,
    /// In-process store seeded from a JSON file
    Memory,
}

/// Document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store implementation
    pub backend: StoreBackend,
    /// Cosmos account endpoint, e.g. `https://<account>.documents.azure.com`
    pub endpoint: Option<String>,
    /// Cosmos master key (supports `env:VAR_NAME`)
    #[serde(skip_serializing)]
    pub account_key: Option<String>,
    /// Database name
    pub database: String,
    /// Container holding the records
    pub container: String,
    /// Field matched by the `volcanoname` lookup
    pub lookup_field: String,
    /// Number of records returned by the sample endpoint
    pub sample_size: usize,
    /// Upper bound on a single store round-trip
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    /// JSON seed file for the memory backend
    pub seed_file: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Cosmos,
            endpoint: None,
            account_key: None,
            database: "VolcanoList".to_string(),
            container: "Volcanos".to_string(),
            lookup_field: "VolcanoName".to_string(),
            sample_size: 10,
            query_timeout: Duration::from_secs(10),
            seed_file: None,
        }
    }
}

impl StoreConfig {
    /// Resolve the account key (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_account_key(&self) -> Option<String> {
        self.account_key.as_ref().map(|key| {
            if let Some(var_name) = key.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| key.clone())
            } else {
                key.clone()
            }
        })
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.expand_env_vars();

        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.auth.validation_options()?;

        if self.auth.required_scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(Error::Config(
                "auth.required_scopes must name at least one scope".to_string(),
            ));
        }

        if self.store.sample_size == 0 {
            return Err(Error::Config("store.sample_size must be > 0".to_string()));
        }

        match self.store.backend {
            StoreBackend::Cosmos => {
                if self.store.endpoint.is_none() {
                    return Err(Error::Config(
                        "store.endpoint is required for the cosmos backend".to_string(),
                    ));
                }
                if self.store.resolve_account_key().is_none() {
                    return Err(Error::Config(
                        "store.account_key is required for the cosmos backend".to_string(),
                    ));
                }
            }
            StoreBackend::Memory => {}
        }

        Ok(())
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                    Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in string settings
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        // A setting that expands to nothing counts as unset
        for slot in [
            &mut self.auth.client_id,
            &mut self.auth.tenant_id,
            &mut self.auth.authority,
            &mut self.auth.issuer,
            &mut self.auth.audience,
            &mut self.store.endpoint,
            &mut self.store.seed_file,
        ] {
            *slot = slot
                .as_deref()
                .map(|value| Self::expand_string(&re, value))
                .filter(|value| !value.trim().is_empty());
        }

        self.jwks.uri = Self::expand_string(&re, &self.jwks.uri);
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }
}

/// Replace a leading `~` with the current user's home directory.
fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = env::var_os("HOME") {
            return format!("{}{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string (`"30s"`, or `"250ms"` below a second)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"100ms"`, `"30s"`, `"5m"`, `"1h"` or a bare number of seconds.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim().parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
