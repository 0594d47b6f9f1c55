//! Redis-compatible key store using deadpool-redis
//!
//! Works against Redis, Valkey and Dragonfly (`redis://`, `rediss://`) as well
//! as Sentinel deployments (`redis+sentinel://`).

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime, Timeouts};

use super::backend::CacheBackend;
use super::error::CacheError;

/// INCR that sets the expiry only when the counter is created
const INCR_WITH_TTL_SCRIPT: &str = r#"
    local count = redis.call('INCR', KEYS[1])
    if count == 1 and ARGV[1] then
        redis.call('PEXPIRE', KEYS[1], ARGV[1])
    end
    return count
"#;

const POOL_MAX_SIZE: usize = 32;
const POOL_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_COUNTER_TTL_MS: u64 = 60_000;

/// Redis-compatible key store backed by a connection pool
pub struct RedisCache {
    pool: Pool,
    name: &'static str,
}

impl RedisCache {
    /// Connect and verify the server answers PING
    pub async fn new(redis_url: &str) -> Result<Self, CacheError> {
        let sanitized_url = sanitize_redis_url(redis_url);
        let name = backend_name_for(redis_url);

        let mut config = Config::from_url(redis_url);
        config.pool = Some(PoolConfig {
            max_size: POOL_MAX_SIZE,
            timeouts: Timeouts {
                wait: Some(POOL_TIMEOUT),
                create: Some(POOL_TIMEOUT),
                recycle: Some(POOL_TIMEOUT),
            },
            ..Default::default()
        });
        let pool = config.create_pool(Some(Runtime::Tokio1)).map_err(|e| {
            CacheError::Connection(format!(
                "Failed to create Redis pool for {sanitized_url}: {e}"
            ))
        })?;

        let store = Self { pool, name };
        store.health_check().await.map_err(|e| {
            CacheError::Connection(format!("Redis unreachable at {sanitized_url}: {e}"))
        })?;

        tracing::debug!(url = %sanitized_url, backend = name, "Redis key store connected");
        Ok(store)
    }
}

fn backend_name_for(url: &str) -> &'static str {
    if url.starts_with("redis+sentinel://") || url.starts_with("rediss+sentinel://") {
        "redis-sentinel"
    } else {
        "redis"
    }
}

/// Mask the password of a Redis URL for logging
fn sanitize_redis_url(url: &str) -> String {
    let Some(at_pos) = url.rfind('@') else {
        return url.to_string();
    };
    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
    if scheme_end > at_pos {
        return url.to_string();
    }
    match url[scheme_end..at_pos].find(':') {
        Some(colon) => format!("{}***{}", &url[..scheme_end + colon + 1], &url[at_pos..]),
        None => url.to_string(),
    }
}

/// Milliseconds for PSETEX/PEXPIRE, never 0 (which would mean "no expiry")
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.pool.get().await?;
        let result: Option<Vec<u8>> = conn.get(key).await?;
        Ok(result)
    }

    async fn set(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        match ttl {
            Some(ttl) => {
                let _: () = deadpool_redis::redis::cmd("PSETEX")
                    .arg(key)
                    .arg(ttl_millis(ttl))
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        // DEL is atomic: only one of several concurrent callers sees 1
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.pool.get().await?;
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64, CacheError> {
        let mut conn = self.pool.get().await?;
        let ttl_ms = ttl.map(ttl_millis).unwrap_or(DEFAULT_COUNTER_TTL_MS);

        let count: i64 = deadpool_redis::redis::cmd("EVAL")
            .arg(INCR_WITH_TTL_SCRIPT)
            .arg(1)
            .arg(key)
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }

    async fn get_counter(&self, key: &str) -> Result<Option<i64>, CacheError> {
        let mut conn = self.pool.get().await?;
        let result: Option<String> = conn.get(key).await?;
        Ok(result.and_then(|s| s.parse::<i64>().ok()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.pool.get().await?;
        let ttl_ms: i64 = deadpool_redis::redis::cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        // -2: missing, -1: no expiry
        Ok(u64::try_from(ttl_ms)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis))
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.sadd(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), CacheError> {
        let mut conn = self.pool.get().await?;
        let _: i64 = conn.srem(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        deadpool_redis::redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| CacheError::Connection(e.to_string()))?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        self.name
    }
}
