//! Gateway authentication
//!
//! Credentials are resolved by an ordered list of strategies (bearer token,
//! then legacy API key); the resolver then checks permissions and quota.

mod context;
mod error;
mod middleware;
mod resolver;
mod strategy;

pub use context::{AuthContext, AuthRequirements};
pub use error::{AuthError, AuthErrorBody, AuthErrorKind, REQUEST_ID_HEADER, request_id_from};
pub use middleware::{AdminState, GatewayState, gateway, require_admin};
pub use resolver::AuthResolver;
pub use strategy::{BearerStrategy, CredentialStrategy, LegacyKeyStrategy, StrategyOutcome};
