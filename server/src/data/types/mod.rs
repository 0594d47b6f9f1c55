//! Shared data types
//!
//! Records kept in the key store and the principal produced by authentication.

mod api_keys;
mod principal;

pub use api_keys::{ApiKeyRecord, KeyStatus, RateLimitSpec, StoredApiKey, Usage};
pub use principal::Principal;
