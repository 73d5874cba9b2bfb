//! Azure Cosmos DB (SQL API) store over the REST interface.
//!
//! Requests are signed with the account master key:
//!
//! ```text
//! sig  = base64(HMAC-SHA256(key, "{verb}\n{resource_type}\n{resource_link}\n{date}\n\n"))
//! auth = urlencode("type=master&ver=1.0&sig={sig}")
//! ```
//!
//! `verb`, `resource_type` and `date` are lowercased; `resource_link` is
//! case-sensitive. Result pages are followed via `x-ms-continuation`.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac, digest::KeyInit};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tracing::debug;
use url::Url;

use super::{DocumentStore, Record, StoreError, validate_field_name};

/// REST API version sent with every request.
const API_VERSION: &str = "2018-12-31";

/// Continuation token header (request and response).
const CONTINUATION: &str = "x-ms-continuation";

/// Upper bound on pages followed for one call.
const MAX_PAGES: usize = 100;

/// One page of a document feed or query.
#[derive(Debug, Deserialize)]
struct DocumentPage {
    #[serde(rename = "Documents")]
    documents: Vec<Record>,
}

/// Cosmos DB client for one database.
pub struct CosmosStore {
    http: reqwest::Client,
    endpoint: Url,
    database: String,
    key: Vec<u8>,
}

impl CosmosStore {
    /// Create a client for `database` at `endpoint` using a base64 master key.
    pub fn new(endpoint: &str, database: &str, account_key: &str) -> Result<Self, StoreError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StoreError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        let key = STANDARD
            .decode(account_key.trim())
            .map_err(|e| StoreError::Config(format!("account key is not base64: {e}")))?;
        validate_resource_name(database)?;

        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| StoreError::Config(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            database: database.to_string(),
            key,
        })
    }

    fn collection_link(&self, container: &str) -> Result<String, StoreError> {
        validate_resource_name(container)?;
        Ok(format!("dbs/{}/colls/{container}", self.database))
    }

    /// Build the `authorization` header value for one request.
    fn authorization(
        &self,
        verb: &Method,
        resource_type: &str,
        resource_link: &str,
        date: &str,
    ) -> Result<String, StoreError> {
        let payload = format!(
            "{}\n{}\n{}\n{}\n\n",
            verb.as_str().to_lowercase(),
            resource_type.to_lowercase(),
            resource_link,
            date.to_lowercase()
        );

        let mut mac = <Hmac<Sha256> as KeyInit>::new_from_slice(&self.key)
            .map_err(|e| StoreError::Config(format!("unusable account key: {e}")))?;
        mac.update(payload.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        let token = format!("type=master&ver=1.0&sig={signature}");
        Ok(url::form_urlencoded::byte_serialize(token.as_bytes()).collect())
    }

    /// Issue one signed request against the `docs` feed of a collection.
    async fn send_page(
        &self,
        method: Method,
        link: &str,
        body: Option<&serde_json::Value>,
        max_items: Option<usize>,
        continuation: Option<&str>,
    ) -> Result<(Vec<Record>, Option<String>), StoreError> {
        let url = self
            .endpoint
            .join(&format!("{link}/docs"))
            .map_err(|e| StoreError::Config(e.to_string()))?;
        let date = rfc1123_now();
        let auth = self.authorization(&method, "docs", link, &date)?;

        let mut request = self
            .http
            .request(method, url)
            .header("authorization", auth)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION);

        if let Some(body) = body {
            request = request
                .header("content-type", "application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .header("x-ms-documentdb-query-enablecrosspartition", "True")
                .body(body.to_string());
        }
        if let Some(n) = max_items {
            request = request.header("x-ms-max-item-count", n.to_string());
        }
        if let Some(token) = continuation {
            request = request.header(CONTINUATION, token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StoreError::ContainerNotFound(link.to_string()));
            }
            status => {
                return Err(StoreError::Unavailable(format!(
                    "{link} answered with status {status}"
                )));
            }
        }

        let next = response
            .headers()
            .get(CONTINUATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let page: DocumentPage = response
            .json()
            .await
            .map_err(|e| StoreError::Protocol(e.to_string()))?;

        Ok((page.documents, next))
    }
}

#[async_trait]
impl DocumentStore for CosmosStore {
    async fn query_by_field(
        &self,
        container: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Record>, StoreError> {
        validate_field_name(field)?;
        let link = self.collection_link(container)?;
        let query = json!({
            "query": format!("SELECT * FROM c WHERE c.{field} = @value"),
            "parameters": [{ "name": "@value", "value": value }],
        });

        let mut records = Vec::new();
        let mut continuation: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let (page, next) = self
                .send_page(Method::POST, &link, Some(&query), None, continuation.as_deref())
                .await?;
            records.extend(page);
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        debug!(container = %container, field = %field, matched = records.len(), "Cosmos query");
        Ok(records)
    }

    async fn read_first_n(&self, container: &str, n: usize) -> Result<Vec<Record>, StoreError> {
        let link = self.collection_link(container)?;

        let mut records = Vec::with_capacity(n);
        let mut continuation: Option<String> = None;
        for _ in 0..MAX_PAGES {
            if records.len() >= n {
                break;
            }
            let (page, next) = self
                .send_page(
                    Method::GET,
                    &link,
                    None,
                    Some(n - records.len()),
                    continuation.as_deref(),
                )
                .await?;
            records.extend(page);
            match next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }
        records.truncate(n);

        debug!(container = %container, returned = records.len(), "Cosmos read feed");
        Ok(records)
    }
}

/// Database and container ids end up in the URL path.
fn validate_resource_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name.contains(['/', '\\', '?', '#']) {
        return Err(StoreError::InvalidResource(name.to_string()));
    }
    Ok(())
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
