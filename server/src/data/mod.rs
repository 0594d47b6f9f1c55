//! Data layer
//!
//! - `cache` - Key store (in-memory or Redis) and the sliding-window rate limiter
//! - `types` - Records kept in the store and the authenticated principal

pub mod cache;
pub mod types;

pub use cache::{CacheError, CacheService};
