//! Bearer token authentication and scope authorization.
//!
//! ```text
//! Authorization: Bearer <jwt>
//!   -> TokenValidator::validate   (header kid -> KeyResolver -> signature, exp/nbf, iss, aud)
//!   -> Claims                     (stored in the request's extensions)
//!   -> has_required_scopes        (every required scope present in `scp`)
//! ```
//!
//! Nothing in this module holds per-request state; validators and resolvers
//! are shared read-only across concurrent requests.

pub mod audit;
pub mod jwks;
pub mod scope;
pub mod token;

pub use audit::AuditEvent;
pub use jwks::{JwksKeyResolver, KeyResolver, KeyResolverError, SigningKey, StaticKeyResolver};
pub use scope::{RequiredScopes, has_required_scopes, missing_scopes};
pub use token::{Audience, Claims, TokenValidator, ValidationError, ValidationOptions};
