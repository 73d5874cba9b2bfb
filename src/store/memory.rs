//! In-process document store.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{DocumentStore, Record, StoreError, validate_field_name};

/// Containers of JSON records held in memory.
///
/// Seed files are a JSON object mapping container names to record arrays:
///
/// ```json
/// { "Volcanos": [ { "VolcanoName": "Etna", "Country": "Italy" } ] }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    containers: HashMap<String, Vec<Record>>,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a container.
    #[must_use]
    pub fn with_container(mut self, name: impl Into<String>, records: Vec<Record>) -> Self {
        self.containers.insert(name.into(), records);
        self
    }

    /// Load containers from a JSON seed file.
    pub fn from_seed_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        let containers: HashMap<String, Vec<Record>> = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Config(format!("{}: {e}", path.display())))?;
        Ok(Self { containers })
    }

    /// Number of containers.
    #[must_use]
    pub fn container_count(&self) -> usize {
        self.containers.len()
    }

    fn container(&self, name: &str) -> Result<&[Record], StoreError> {
        self.containers
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| StoreError::ContainerNotFound(name.to_string()))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query_by_field(
        &self,
        container: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        validate_field_name(field)?;
        Ok(self
            .container(container)?
            .iter()
            .filter(|record| matches!(record.get(field), Some(Value::String(v)) if v == value))
            .cloned()
            .collect())
    }

    async fn read_first_n(&self, container: &str, n: usize) -> Result<Vec<Record>, StoreError> {
        Ok(self.container(container)?.iter().take(n).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn volcanoes() -> MemoryStore {
        MemoryStore::new().with_container(
            "Volcanos",
            vec![
                json!({"VolcanoName": "Etna", "Country": "Italy"}),
                json!({"VolcanoName": "Fuji", "Country": "Japan"}),
                json!({"VolcanoName": "Etna", "Country": "Italy", "Elevation": 3357}),
                json!({"VolcanoName": 42}),
            ],
        )
    }

    #[tokio::test]
    async fn query_matches_exact_string_values() {
        let store = volcanoes();

        assert_eq!(store.query_by_field("Volcanos", "VolcanoName", "Etna").await.unwrap().len(), 2);
        assert!(store.query_by_field("Volcanos", "VolcanoName", "etna").await.unwrap().is_empty());
        assert!(store.query_by_field("Volcanos", "VolcanoName", "42").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_queries_return_same_records() {
        let store = volcanoes();
        let first = store.query_by_field("Volcanos", "VolcanoName", "Fuji").await.unwrap();
        let second = store.query_by_field("Volcanos", "VolcanoName", "Fuji").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn read_first_n_caps_result() {
        let store = volcanoes();
        assert_eq!(store.read_first_n("Volcanos", 2).await.unwrap().len(), 2);
        assert_eq!(store.read_first_n("Volcanos", 10).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn unknown_container_is_an_error() {
        let err = volcanoes().read_first_n("Craters", 10).await.unwrap_err();
        assert!(matches!(err, StoreError::ContainerNotFound(name) if name == "Craters"));
    }

    #[tokio::test]
    async fn invalid_field_is_rejected() {
        let err = volcanoes()
            .query_by_field("Volcanos", "VolcanoName OR 1=1", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));
    }

    #[test]
    fn seed_file_round_trip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"Volcanos": [{{"VolcanoName": "Etna"}}], "Empty": []}}"#).unwrap();

        let store = MemoryStore::from_seed_file(file.path()).unwrap();
        assert_eq!(store.container_count(), 2);
    }

    #[test]
    fn malformed_seed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(
            MemoryStore::from_seed_file(file.path()),
            Err(StoreError::Config(_))
        ));
    }
}
