//! Read-only document store collaborator.
//!
//! Handlers only reach a store after the request gate and the scope check
//! have both succeeded. Every failure is surfaced as a [`StoreError`]; an
//! empty `Vec` always means "no matching records", never "query failed".

pub mod cosmos;
pub mod memory;

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tracing::info;

use crate::config::{StoreBackend, StoreConfig};

pub use cosmos::CosmosStore;
pub use memory::MemoryStore;

/// An opaque JSON document.
pub type Record = serde_json::Value;

/// Field names that may be interpolated into a query.
static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("field name pattern is valid"));

/// Document store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Field name is not a plain identifier.
    #[error("invalid field name '{0}'")]
    InvalidField(String),

    /// Container (or database) name is unusable in a resource path.
    #[error("invalid resource name '{0}'")]
    InvalidResource(String),

    /// The container does not exist.
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Network failure or non-success status from the store.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something we could not decode.
    #[error("unexpected store response: {0}")]
    Protocol(String),

    /// The round-trip exceeded the configured bound.
    #[error("store query timed out after {0:?}")]
    QueryTimeout(Duration),

    /// Store could not be constructed from configuration.
    #[error("store configuration: {0}")]
    Config(String),
}

/// Parameterized reads against a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Records in `container` whose `field` equals `value`.
    async fn query_by_field(
        &self,
        container: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError>;

    /// Up to `n` records from `container`, in store order.
    async fn read_first_n(&self, container: &str, n: usize) -> Result<Vec<Record>, StoreError>;
}

/// Reject field names that are not plain identifiers.
pub fn validate_field_name(field: &str) -> Result<(), StoreError> {
    if FIELD_NAME.is_match(field) {
        Ok(())
    } else {
        Err(StoreError::InvalidField(field.to_string()))
    }
}

/// Bounds every call on the wrapped store by `timeout`.
pub struct TimeoutStore {
    inner: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl TimeoutStore {
    /// Wrap `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl DocumentStore for TimeoutStore {
    async fn query_by_field(
        &self,
        container: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        tokio::time::timeout(
            self.timeout,
            self.inner.query_by_field(container, field, value),
        )
        .await
        .map_err(|_| StoreError::QueryTimeout(self.timeout))?
    }

    async fn read_first_n(&self, container: &str, n: usize) -> Result<Vec<Record>, StoreError> {
        tokio::time::timeout(self.timeout, self.inner.read_first_n(container, n))
            .await
            .map_err(|_| StoreError::QueryTimeout(self.timeout))?
    }
}

/// Build the configured store, wrapped with the query timeout.
pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>, StoreError> {
    let inner: Arc<dyn DocumentStore> = match config.backend {
        StoreBackend::Cosmos => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| StoreError::Config("store.endpoint is not set".to_string()))?;
            let key = config
                .resolve_account_key()
                .ok_or_else(|| StoreError::Config("store.account_key is not set".to_string()))?;
            info!(endpoint = %endpoint, database = %config.database, "Using Cosmos DB store");
            Arc::new(CosmosStore::new(endpoint, &config.database, &key)?)
        }
        StoreBackend::Memory => {
            let store = match config.seed_file.as_deref() {
                Some(path) => MemoryStore::from_seed_file(path)?,
                None => MemoryStore::new(),
            };
            info!(containers = store.container_count(), "Using in-memory store");
            Arc::new(store)
        }
    };

    Ok(Arc::new(TimeoutStore::new(inner, config.query_timeout)))
}
