//! Cache backend trait definition

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

/// Cache backend trait
///
/// Defines the interface for key store implementations.
/// Both in-memory and Redis backends implement this trait.
///
/// # Consistency Notes
///
/// Operations on individual keys are atomic. `delete` reports whether this call
/// removed the key, so concurrent deletes of the same key have exactly one
/// winner. Multi-key updates (e.g. moving a member between sets) are not
/// transactional.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value from the cache
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Set a value in the cache with optional TTL
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
    -> Result<(), CacheError>;

    /// Delete a key from the cache
    ///
    /// Returns `true` only for the call that actually removed the key.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Check if a key exists in the cache
    ///
    /// Note: Result may be stale due to concurrent modifications or TTL expiry.
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Atomic increment with TTL (creates key if not exists)
    ///
    /// The TTL is applied when the counter is created and not extended afterwards.
    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError>;

    /// Get the current counter value without incrementing
    ///
    /// Returns None if the counter doesn't exist or has expired.
    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError>;

    /// Get the TTL remaining for a key
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Add a member to a set (creates the set if missing)
    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// Remove a member from a set
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError>;

    /// All members of a set (empty if the set doesn't exist)
    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), CacheError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
