//! Rate limiter using the key store
//!
//! Implements a sliding window counter.
//!
//! # Algorithm
//!
//! Time is cut into fixed windows of the configured length; window `i` covers
//! `[i * window, (i + 1) * window)`. Each window has its own counter. The
//! request rate is estimated by weighting the previous window's count by the
//! share of it still inside the sliding window:
//!
//! ```text
//! estimate = floor(prev_count * (1 - elapsed_in_current / window)) + current_count
//! ```
//!
//! A request is denied without touching any counter when `estimate >= limit`.
//! Otherwise the current counter is incremented and the estimate re-checked,
//! so concurrent callers can overshoot the limit by at most the number racing.
//!
//! # Window normalization
//!
//! Window strings are normalized before use (`1h` becomes `60m`, `1d` becomes
//! `1440m`) and the normalized form is part of the counter key, so equivalent
//! windows share counters.
//!
//! # Store failures
//!
//! With `fail_open` set (the default), a failing store allows the request
//! without consuming quota and logs a warning. Otherwise the error is returned.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;
use utoipa::ToSchema;

use super::CacheService;
use super::error::CacheError;
use super::key::CacheKey;
use crate::core::constants::{DEFAULT_RATE_LIMIT_WINDOW, LIMITER_CACHE_IDLE_SECS};
use crate::data::types::RateLimitSpec;
use crate::utils::duration::{DurationSpec, DurationUnit};
use crate::utils::time::now_millis;

/// A quota with its window parsed and normalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowSpec {
    /// Maximum requests per window
    pub requests: u32,
    /// Normalized window
    pub window: DurationSpec,
}

impl WindowSpec {
    /// Parse a quota; `None` if the window string is not a duration
    pub fn parse(requests: u32, window: &str) -> Option<Self> {
        let window = DurationSpec::parse(window)?.normalized();
        if window.as_millis() == 0 {
            return None;
        }
        Some(Self { requests, window })
    }

    /// Window length in milliseconds (never 0)
    pub fn window_ms(&self) -> u64 {
        self.window.as_millis().max(1)
    }
}

/// Rate limit check result
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Requests remaining in the sliding window
    pub remaining: u32,
    /// Requests allowed per window
    pub limit: u32,
    /// Unix timestamp (seconds) when the current window ends
    pub reset_at: u64,
    /// Seconds until retry (only if blocked)
    pub retry_after: Option<u64>,
}

/// Sliding-window rate limiter using the key store
pub struct RateLimiter {
    cache: Arc<CacheService>,
    /// Parsed quotas per `(principal, requests, window)` signature
    specs: Cache<String, Arc<WindowSpec>>,
    fail_open: bool,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(cache: Arc<CacheService>, spec_cache_capacity: u64, fail_open: bool) -> Self {
        let specs = Cache::builder()
            .max_capacity(spec_cache_capacity)
            .time_to_idle(Duration::from_secs(LIMITER_CACHE_IDLE_SECS))
            .build();

        Self {
            cache,
            specs,
            fail_open,
        }
    }

    /// Check and consume quota for `principal` under `spec`
    pub async fn limit(
        &self,
        principal: &str,
        spec: &RateLimitSpec,
    ) -> Result<RateLimitResult, CacheError> {
        self.check_at(principal, spec, now_millis()).await
    }

    /// Same as [`RateLimiter::limit`] with an explicit clock (ms since epoch)
    pub async fn check_at(
        &self,
        principal: &str,
        spec: &RateLimitSpec,
        now_ms: u64,
    ) -> Result<RateLimitResult, CacheError> {
        let window = self.window_spec(principal, spec);

        match self.sliding_check(principal, &window, now_ms).await {
            Ok(result) => Ok(result),
            Err(e) if self.fail_open => {
                tracing::warn!(
                    %principal,
                    limit = window.requests,
                    window = %window.window,
                    error = %e,
                    fail_open = true,
                    "Rate limit store unavailable, allowing request"
                );
                Ok(RateLimitResult {
                    allowed: true,
                    remaining: window.requests,
                    limit: window.requests,
                    reset_at: window_end_secs(now_ms, window.window_ms()),
                    retry_after: None,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Resolve the parsed quota for a signature, caching the result
    fn window_spec(&self, principal: &str, spec: &RateLimitSpec) -> Arc<WindowSpec> {
        let signature = format!("{}:{}:{}", principal, spec.requests, spec.window);
        self.specs.get_with(signature, || {
            let parsed = WindowSpec::parse(spec.requests, &spec.window).unwrap_or_else(|| {
                tracing::warn!(
                    %principal,
                    window = %spec.window,
                    fallback = DEFAULT_RATE_LIMIT_WINDOW,
                    "Unparsable rate limit window, using fallback"
                );
                WindowSpec {
                    requests: spec.requests,
                    window: DurationSpec::parse(DEFAULT_RATE_LIMIT_WINDOW)
                        .map(DurationSpec::normalized)
                        .unwrap_or(DurationSpec {
                            value: 1,
                            unit: DurationUnit::Minutes,
                        }),
                }
            });
            Arc::new(parsed)
        })
    }

    async fn sliding_check(
        &self,
        principal: &str,
        window: &WindowSpec,
        now_ms: u64,
    ) -> Result<RateLimitResult, CacheError> {
        let window_ms = window.window_ms();
        let index = now_ms / window_ms;
        let elapsed = now_ms - index * window_ms;
        let limit = window.requests;
        let label = window.window.to_string();

        let current_key = CacheKey::rate_window(principal, limit, &label, index);
        let previous_key = CacheKey::rate_window(principal, limit, &label, index.wrapping_sub(1));

        let previous = self.cache.get_counter(&previous_key).await?.unwrap_or(0);
        let current = self.cache.get_counter(&current_key).await?.unwrap_or(0);

        // Share of the previous window still inside the sliding window
        let carried = (previous as f64 * (1.0 - elapsed as f64 / window_ms as f64)).floor() as i64;

        let reset_at = window_end_secs(now_ms, window_ms);
        let retry_after = ((index + 1) * window_ms - now_ms).div_ceil(1000).max(1);

        let limit_i64 = i64::from(limit);
        if carried + current >= limit_i64 {
            tracing::debug!(%principal, limit, carried, current, "Rate limit exceeded");
            return Ok(RateLimitResult {
                allowed: false,
                remaining: 0,
                limit,
                reset_at,
                retry_after: Some(retry_after),
            });
        }

        // Both the current and the following window read this counter
        let ttl = Duration::from_millis(window_ms.saturating_mul(2));
        let current = self.cache.incr(&current_key, Some(ttl)).await?;

        let estimate = carried + current;
        let allowed = estimate <= limit_i64;
        let remaining = limit_i64.saturating_sub(estimate).try_into().unwrap_or(0u32);

        tracing::trace!(%principal, limit, estimate, allowed, "Rate limit check");

        Ok(RateLimitResult {
            allowed,
            remaining,
            limit,
            reset_at,
            retry_after: (!allowed).then_some(retry_after),
        })
    }
}

fn window_end_secs(now_ms: u64, window_ms: u64) -> u64 {
    let index = now_ms / window_ms;
    ((index + 1) * window_ms).div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::testing::{memory_cache, unavailable_cache};

    const MINUTE_MS: u64 = 60_000;
    /// Start of an arbitrary minute-aligned window
    const T0: u64 = 1_700_000_040_000;

    fn spec(requests: u32, window: &str) -> RateLimitSpec {
        RateLimitSpec {
            requests,
            window: window.to_string(),
        }
    }

    async fn limiter() -> RateLimiter {
        RateLimiter::new(memory_cache().await, 100, true)
    }

    #[test]
    fn test_window_spec_normalizes() {
        let hour = WindowSpec::parse(10, "1h").unwrap();
        let minutes = WindowSpec::parse(10, "60m").unwrap();
        assert_eq!(hour, minutes);
        assert_eq!(hour.window.to_string(), "60m");
        assert_eq!(hour.window_ms(), 3_600_000);

        assert!(WindowSpec::parse(10, "soon").is_none());
        assert!(WindowSpec::parse(10, "0s").is_none());
    }

    #[tokio::test]
    async fn test_two_per_minute_then_rollover() {
        let limiter = limiter().await;
        let quota = spec(2, "1m");

        let first = limiter.check_at("key_a", &quota, T0 + 1_000).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.limit, 2);

        let second = limiter.check_at("key_a", &quota, T0 + 2_000).await.unwrap();
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = limiter.check_at("key_a", &quota, T0 + 3_000).await.unwrap();
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
        assert_eq!(third.retry_after, Some(57));

        // Early in the next window floor(2 * 0.98) = 1 is carried over
        let early = limiter
            .check_at("key_a", &quota, T0 + MINUTE_MS + 1_000)
            .await
            .unwrap();
        assert!(early.allowed);
        assert_eq!(early.remaining, 0);
        let early_again = limiter
            .check_at("key_a", &quota, T0 + MINUTE_MS + 2_000)
            .await
            .unwrap();
        assert!(!early_again.allowed);

        // Three quarters in, floor(2 * 0.25) = 0 is carried over
        let later = limiter
            .check_at("key_a", &quota, T0 + MINUTE_MS + 45_000)
            .await
            .unwrap();
        assert!(later.allowed);
        assert_eq!(later.remaining, 0);
    }

    #[tokio::test]
    async fn test_full_window_gap_resets() {
        let limiter = limiter().await;
        let quota = spec(1, "1m");

        assert!(limiter.check_at("key_b", &quota, T0).await.unwrap().allowed);
        assert!(!limiter.check_at("key_b", &quota, T0 + 10).await.unwrap().allowed);
        assert!(
            limiter
                .check_at("key_b", &quota, T0 + 2 * MINUTE_MS)
                .await
                .unwrap()
                .allowed
        );
    }

    #[tokio::test]
    async fn test_denied_requests_do_not_consume() {
        let cache = memory_cache().await;
        let limiter = RateLimiter::new(cache.clone(), 100, true);
        let quota = spec(1, "1m");

        limiter.check_at("key_c", &quota, T0).await.unwrap();
        for _ in 0..5 {
            assert!(!limiter.check_at("key_c", &quota, T0 + 5).await.unwrap().allowed);
        }

        let key = CacheKey::rate_window("key_c", 1, "1m", T0 / MINUTE_MS);
        assert_eq!(cache.get_counter(&key).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_equivalent_windows_share_counters() {
        let limiter = limiter().await;

        assert!(limiter.check_at("key_d", &spec(1, "1h"), T0).await.unwrap().allowed);
        assert!(!limiter.check_at("key_d", &spec(1, "60m"), T0 + 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_different_principals_are_independent() {
        let limiter = limiter().await;
        let quota = spec(1, "1m");

        assert!(limiter.check_at("10.0.0.1", &quota, T0).await.unwrap().allowed);
        assert!(!limiter.check_at("10.0.0.1", &quota, T0).await.unwrap().allowed);
        assert!(limiter.check_at("10.0.0.2", &quota, T0).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_reset_at_is_window_end() {
        let limiter = limiter().await;
        let result = limiter
            .check_at("key_e", &spec(5, "1m"), T0 + 30_000)
            .await
            .unwrap();
        assert_eq!(result.reset_at, (T0 + MINUTE_MS) / 1000);
        assert!(result.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_unparsable_window_falls_back() {
        let limiter = limiter().await;
        let quota = spec(1, "whenever");

        assert!(limiter.check_at("key_f", &quota, T0).await.unwrap().allowed);
        assert!(!limiter.check_at("key_f", &quota, T0 + 1).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_fail_open_allows_without_quota() {
        let limiter = RateLimiter::new(unavailable_cache(), 100, true);
        let result = limiter.check_at("key_g", &spec(3, "1m"), T0).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, 3);
    }

    #[tokio::test]
    async fn test_fail_closed_returns_error() {
        let limiter = RateLimiter::new(unavailable_cache(), 100, false);
        let result = limiter.check_at("key_h", &spec(3, "1m"), T0).await;
        assert!(matches!(result, Err(CacheError::Connection(_))));
    }
}
