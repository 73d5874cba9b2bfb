//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::router::{AppState, QuerySettings, create_router};
use crate::auth::{JwksKeyResolver, KeyResolver, TokenValidator};
use crate::config::Config;
use crate::store::{DocumentStore, build_store};
use crate::{Error, Result};

/// Volcano data gateway server
pub struct Gateway {
    /// Configuration
    config: Config,
    /// State shared by every request
    state: Arc<AppState>,
}

impl Gateway {
    /// Create a gateway backed by the configured JWKS endpoint and store.
    pub fn new(config: Config) -> Result<Self> {
        let resolver = Arc::new(JwksKeyResolver::new(&config.jwks)?);
        info!(jwks_uri = %resolver.uri(), "Using JWKS key discovery");

        let store = build_store(&config.store)?;
        Self::with_parts(config, resolver, store)
    }

    /// Create a gateway from explicit collaborators.
    pub fn with_parts(
        config: Config,
        resolver: Arc<dyn KeyResolver>,
        store: Arc<dyn DocumentStore>,
    ) -> Result<Self> {
        let validator = Arc::new(TokenValidator::new(
            resolver,
            config.auth.validation_options()?,
        ));

        let state = Arc::new(AppState {
            validator,
            required_scopes: config.auth.required_scopes(),
            store,
            queries: QuerySettings::from(&config.store),
        });

        Ok(Self { config, state })
    }

    /// Shared request state
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Run the gateway until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = create_router(Arc::clone(&self.state), self.config.server.request_timeout);
        let listener = TcpListener::bind(addr).await?;

        let options = self.state.validator.options();
        info!("============================================================");
        info!("VOLCANO GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            audience = %options.expected_audience(),
            issuer = %options.expected_issuer(),
            scopes = %self.state.required_scopes,
            "Bearer authentication required"
        );
        info!("  GET http://{addr}/getCosmosData");
        info!("  GET http://{addr}/getVolcanoData?volcanoname=<name>");
        info!("============================================================");

        let shutdown_timeout = self.config.server.shutdown_timeout;
        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());

        // Graceful drain is bounded; in-flight requests past the limit are dropped
        let serve = async move { server.await.map_err(|e| Error::Internal(e.to_string())) };
        tokio::pin!(serve);
        tokio::select! {
            result = &mut serve => result?,
            () = async {
                shutdown_signal().await;
                tokio::time::sleep(shutdown_timeout).await;
            } => {
                warn!(timeout = ?shutdown_timeout, "Shutdown timed out, dropping in-flight requests");
            }
        }

        info!("Gateway stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
