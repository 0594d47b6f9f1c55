//! Key store module
//!
//! Shared key-value/counter/set store with pluggable backends:
//! - In-memory (default) - uses moka + dashmap
//! - Redis (optional) - uses deadpool-redis
//!
//! Every call goes through `CacheService`, which bounds it with the configured
//! per-operation timeout. Also provides the sliding-window rate limiter.

mod backend;
mod error;
mod key;
mod memory;
pub mod rate_limiter;
mod redis;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use key::CacheKey;
pub use rate_limiter::{RateLimitResult, RateLimiter, WindowSpec};

use memory::InMemoryCache;

use crate::core::config::{CacheBackendType, CacheConfig};

/// Key store service providing typed, time-bounded access to a backend
///
/// Wraps the underlying cache backend and provides:
/// - Raw bytes API for flexibility
/// - Typed API using MessagePack serialization
/// - Counters and sets
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    op_timeout: Duration,
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.backend_name())
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}

impl CacheService {
    /// Create a new key store from configuration
    pub async fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendType::Memory => {
                tracing::debug!(
                    max_entries = config.max_entries,
                    eviction_policy = ?config.eviction_policy,
                    "Initializing in-memory key store"
                );
                Arc::new(InMemoryCache::new(config))
            }
            CacheBackendType::Redis => {
                let url = config.redis_url.as_ref().ok_or_else(|| {
                    CacheError::Config("redis_url required for Redis backend".into())
                })?;
                // Note: RedisCache::new logs sanitized URL internally
                Arc::new(redis::RedisCache::new(url).await?)
            }
        };

        Ok(Self::with_backend(
            backend,
            Duration::from_millis(config.op_timeout_ms),
        ))
    }

    /// Wrap an existing backend
    pub fn with_backend(backend: Arc<dyn CacheBackend>, op_timeout: Duration) -> Self {
        Self {
            backend,
            op_timeout,
        }
    }

    /// Get the backend name
    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }

    async fn timed<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T, CacheError>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout {
                op,
                timeout_ms: self.op_timeout.as_millis() as u64,
            }),
        }
    }

    // =========================================================================
    // Raw bytes API
    // =========================================================================

    /// Get raw bytes from the store
    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        self.timed("get", self.backend.get(key)).await
    }

    /// Set raw bytes in the store
    pub async fn set_raw(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        self.timed("set", self.backend.set(key, value, ttl)).await
    }

    // =========================================================================
    // Typed API (serde)
    // =========================================================================

    /// Get a typed value
    ///
    /// Uses MessagePack for compact, fast deserialization.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get_raw(key).await? {
            Some(bytes) => {
                let value = rmp_serde::from_slice(&bytes)
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a typed value
    ///
    /// Uses MessagePack for compact, fast serialization.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let bytes =
            rmp_serde::to_vec_named(value).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.set_raw(key, bytes, ttl).await
    }

    // =========================================================================
    // Other operations
    // =========================================================================

    /// Delete a key. Returns `true` only for the caller that removed it.
    pub async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        self.timed("delete", self.backend.delete(key)).await
    }

    /// Check if a key exists
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        self.timed("exists", self.backend.exists(key)).await
    }

    /// Atomic increment (for rate limiting)
    pub async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        self.timed("incr", self.backend.incr(key, ttl)).await
    }

    /// Get current counter value without incrementing (for rate limit pre-checks)
    pub async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        self.timed("get_counter", self.backend.get_counter(key))
            .await
    }

    /// Get TTL remaining for a key
    pub async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        self.timed("ttl", self.backend.ttl(key)).await
    }

    /// Add a member to a set
    pub async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.timed("set_add", self.backend.set_add(key, member))
            .await
    }

    /// Remove a member from a set
    pub async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        self.timed("set_remove", self.backend.set_remove(key, member))
            .await
    }

    /// Members of a set
    pub async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        self.timed("set_members", self.backend.set_members(key))
            .await
    }

    /// Health check
    pub async fn health_check(&self) -> Result<(), CacheError> {
        self.timed("health_check", self.backend.health_check())
            .await
    }
}

/// Test doubles for the key store
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;

    /// In-memory key store with default settings
    pub(crate) async fn memory_cache() -> Arc<CacheService> {
        Arc::new(CacheService::new(&CacheConfig::default()).await.unwrap())
    }

    /// Backend whose every operation fails, as if the store were unreachable
    pub(crate) struct UnavailableBackend;

    fn down<T>() -> Result<T, CacheError> {
        Err(CacheError::Connection("connection refused".to_string()))
    }

    #[async_trait]
    impl CacheBackend for UnavailableBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            down()
        }
        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            down()
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            down()
        }
        async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
            down()
        }
        async fn incr(&self, _key: &str, _ttl: Option<Duration>) -> Result<i64, CacheError> {
            down()
        }
        async fn get_counter(&self, _key: &str) -> Result<Option<i64>, CacheError> {
            down()
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
            down()
        }
        async fn set_add(&self, _key: &str, _member: &str) -> Result<(), CacheError> {
            down()
        }
        async fn set_remove(&self, _key: &str, _member: &str) -> Result<(), CacheError> {
            down()
        }
        async fn set_members(&self, _key: &str) -> Result<Vec<String>, CacheError> {
            down()
        }
        async fn health_check(&self) -> Result<(), CacheError> {
            down()
        }
        fn backend_name(&self) -> &'static str {
            "unavailable"
        }
    }

    /// Key store that is always down
    pub(crate) fn unavailable_cache() -> Arc<CacheService> {
        Arc::new(CacheService::with_backend(
            Arc::new(UnavailableBackend),
            Duration::from_millis(50),
        ))
    }

    /// Memory backend whose counter increments stall for a fixed delay
    pub(crate) struct SlowCounterBackend {
        inner: InMemoryCache,
        delay: Duration,
    }

    #[async_trait]
    impl CacheBackend for SlowCounterBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.get(key).await
        }
        async fn set(
            &self,
            key: &str,
            value: Vec<u8>,
            ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.exists(key).await
        }
        async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
            tokio::time::sleep(self.delay).await;
            self.inner.incr(key, ttl).await
        }
        async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
            self.inner.get_counter(key).await
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
            self.inner.ttl(key).await
        }
        async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
            self.inner.set_add(key, member).await
        }
        async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
            self.inner.set_remove(key, member).await
        }
        async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
            self.inner.set_members(key).await
        }
        async fn health_check(&self) -> Result<(), CacheError> {
            self.inner.health_check().await
        }
        fn backend_name(&self) -> &'static str {
            "slow-counter"
        }
    }

    /// In-memory key store whose counter increments take `delay`
    pub(crate) fn slow_counter_cache(delay: Duration) -> Arc<CacheService> {
        Arc::new(CacheService::with_backend(
            Arc::new(SlowCounterBackend {
                inner: InMemoryCache::new(&CacheConfig::default()),
                delay,
            }),
            Duration::from_secs(1),
        ))
    }

    /// Backend that never answers
    pub(crate) struct HangingBackend;

    #[async_trait]
    impl CacheBackend for HangingBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            futures::future::pending().await
        }
        async fn set(
            &self,
            _key: &str,
            _value: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> Result<(), CacheError> {
            futures::future::pending().await
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            futures::future::pending().await
        }
        async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
            futures::future::pending().await
        }
        async fn incr(&self, _key: &str, _ttl: Option<Duration>) -> Result<i64, CacheError> {
            futures::future::pending().await
        }
        async fn get_counter(&self, _key: &str) -> Result<Option<i64>, CacheError> {
            futures::future::pending().await
        }
        async fn ttl(&self, _key: &str) -> Result<Option<Duration>, CacheError> {
            futures::future::pending().await
        }
        async fn set_add(&self, _key: &str, _member: &str) -> Result<(), CacheError> {
            futures::future::pending().await
        }
        async fn set_remove(&self, _key: &str, _member: &str) -> Result<(), CacheError> {
            futures::future::pending().await
        }
        async fn set_members(&self, _key: &str) -> Result<Vec<String>, CacheError> {
            futures::future::pending().await
        }
        async fn health_check(&self) -> Result<(), CacheError> {
            futures::future::pending().await
        }
        fn backend_name(&self) -> &'static str {
            "hanging"
        }
    }
}
