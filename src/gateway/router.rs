//! HTTP router and handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{RawQuery, State},
    http::{StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{debug, warn};

use super::auth::{Authenticated, request_gate};
use super::error::ApiError;
use crate::auth::{
    AuditEvent, Claims, RequiredScopes, TokenValidator, audit, has_required_scopes, missing_scopes,
};
use crate::config::StoreConfig;
use crate::store::{DocumentStore, Record};

/// Query parameter naming the volcano to look up.
pub const VOLCANO_PARAM: &str = "volcanoname";

/// Where and how the handlers query the store.
#[derive(Debug, Clone)]
pub struct QuerySettings {
    /// Container holding the records
    pub container: String,
    /// Field matched by `/getVolcanoData`
    pub lookup_field: String,
    /// Records returned by `/getCosmosData`
    pub sample_size: usize,
}

impl From<&StoreConfig> for QuerySettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            container: config.container.clone(),
            lookup_field: config.lookup_field.clone(),
            sample_size: config.sample_size,
        }
    }
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self::from(&StoreConfig::default())
    }
}

/// Shared application state
pub struct AppState {
    /// Bearer token validator
    pub validator: Arc<TokenValidator>,
    /// Scopes every protected route requires
    pub required_scopes: RequiredScopes,
    /// Document store
    pub store: Arc<dyn DocumentStore>,
    /// Query targets
    pub queries: QuerySettings,
}

/// Create the router
pub fn create_router(state: Arc<AppState>, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/getCosmosData", get(cosmos_data_handler))
        .route("/getVolcanoData", get(volcano_data_handler))
        // All-lowercase aliases; any other casing is 404
        .route("/getcosmosdata", get(cosmos_data_handler))
        .route("/getvolcanodata", get(volcano_data_handler))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            request_gate,
        ));

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .merge(protected)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::GATEWAY_TIMEOUT,
            request_timeout,
        ))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / - endpoint templates
async fn index_handler() -> impl IntoResponse {
    Json(json!({
        "endpoint1": format!("/getVolcanoData?{VOLCANO_PARAM}=<name>"),
        "endpoint2": "/getCosmosData",
    }))
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// GET /getCosmosData - first `sample_size` records of the container
async fn cosmos_data_handler(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated,
    uri: Uri,
) -> Result<Json<Vec<Record>>, ApiError> {
    authorize(&state.required_scopes, &claims, uri.path())?;

    let records = state
        .store
        .read_first_n(&state.queries.container, state.queries.sample_size)
        .await
        .map_err(|e| ApiError::from_store(&e))?;

    debug!(principal = %claims.principal(), returned = records.len(), "Served sample records");
    Ok(Json(records))
}

/// GET /getVolcanoData?volcanoname=<name> - records matching the name
async fn volcano_data_handler(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated,
    uri: Uri,
    RawQuery(query): RawQuery,
) -> Result<Json<Vec<Record>>, ApiError> {
    authorize(&state.required_scopes, &claims, uri.path())?;

    let name = query_param(query.as_deref(), VOLCANO_PARAM)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Missing required query parameter '{VOLCANO_PARAM}'"))
        })?;

    let records = state
        .store
        .query_by_field(&state.queries.container, &state.queries.lookup_field, &name)
        .await
        .map_err(|e| ApiError::from_store(&e))?;

    debug!(
        principal = %claims.principal(),
        volcano = %name,
        matched = records.len(),
        "Served volcano lookup"
    );
    Ok(Json(records))
}

/// Reject claims missing any required scope.
fn authorize(required: &RequiredScopes, claims: &Claims, path: &str) -> Result<(), ApiError> {
    if has_required_scopes(claims, required) {
        return Ok(());
    }

    let missing = missing_scopes(claims, required);
    warn!(
        path = %path,
        principal = %claims.principal(),
        missing = ?missing,
        "Token lacks required scope"
    );
    audit::emit(&AuditEvent::scope_denied(path, claims, &missing));
    Err(ApiError::InsufficientScope)
}

/// First value of `key` in a raw query string, percent-decoded.
fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn query_param_decodes_value() {
        assert_eq!(
            query_param(Some("volcanoname=Mount%20St.%20Helens"), VOLCANO_PARAM),
            Some("Mount St. Helens".to_string())
        );
        assert_eq!(
            query_param(Some("volcanoname=Mauna+Loa"), VOLCANO_PARAM),
            Some("Mauna Loa".to_string())
        );
    }

    #[test]
    fn query_param_takes_first_occurrence() {
        assert_eq!(
            query_param(Some("x=1&volcanoname=Etna&volcanoname=Fuji"), VOLCANO_PARAM),
            Some("Etna".to_string())
        );
    }

    #[test]
    fn query_param_absent() {
        assert_eq!(query_param(None, VOLCANO_PARAM), None);
        assert_eq!(query_param(Some("name=Etna"), VOLCANO_PARAM), None);
        assert_eq!(query_param(Some("volcanoname="), VOLCANO_PARAM), Some(String::new()));
    }

    #[test]
    fn query_settings_follow_store_config() {
        let settings = QuerySettings::default();
        assert_eq!(settings.container, "Volcanos");
        assert_eq!(settings.lookup_field, "VolcanoName");
        assert_eq!(settings.sample_size, 10);
    }
}
