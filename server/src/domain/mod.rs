//! Credential domain logic
//!
//! - `api_keys` - legacy API key lifecycle and lookup
//! - `tokens` - bearer token pairs, rotation and revocation

pub mod api_keys;
pub mod tokens;

pub use api_keys::{ApiKeyError, ApiKeyManager, ApiKeyUpdate, CreateApiKey, CreatedApiKey};
pub use tokens::{
    AccessClaims, PrincipalSource, TokenError, TokenIssuer, TokenPair, TokenSubject,
    VerifyOutcome,
};
