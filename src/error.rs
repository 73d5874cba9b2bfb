//! Error types for the volcano gateway

use std::io;

use thiserror::Error;

/// Result type alias for the gateway
pub type Result<T> = std::result::Result<T, Error>;

/// Gateway startup and runtime errors.
///
/// Request-level failures are modelled separately by
/// [`ApiError`](crate::gateway::ApiError), which never leaks detail to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Document store construction failed
    #[error("Document store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
