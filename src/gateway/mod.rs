//! Gateway server implementation

pub mod auth;
pub mod error;
mod router;
mod server;

pub use auth::{Authenticated, bearer_token, request_gate};
pub use error::ApiError;
pub use router::{AppState, QuerySettings, VOLCANO_PARAM, create_router};
pub use server::Gateway;
