//! Volcano data gateway
//!
//! HTTP API that guards read-only document-store queries behind Azure AD
//! bearer tokens.
//!
//! # Features
//!
//! - **Token validation**: RS/ES/HS signatures against JWKS keys, with
//!   `exp`/`nbf`/`iss`/`aud` checks
//! - **Key discovery**: per-`kid` cache with refresh-on-miss
//! - **Scope authorization**: every protected route requires `access_as_reader`
//! - **Document store**: Cosmos DB REST client or an in-memory store
//!
//! # Routes
//!
//! | Route | Auth |
//! |---|---|
//! | `GET /` | none |
//! | `GET /health` | none |
//! | `GET /getCosmosData` | bearer + scope |
//! | `GET /getVolcanoData?volcanoname=<name>` | bearer + scope |

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod store;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string())),
    }
}
