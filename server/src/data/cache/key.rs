//! Type-safe cache key builder with versioning

use crate::core::constants::CACHE_KEY_VERSION;

/// Type-safe cache key builder
///
/// All keys are prefixed with a version (e.g., "v1:") to allow
/// invalidating all stored data on schema changes.
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // API Keys
    // =========================================================================

    /// Stored API key record by key id
    pub fn api_key(key_id: &str) -> String {
        format!("{}:apikey:rec:{}", CACHE_KEY_VERSION, key_id)
    }

    /// Hash index: HMAC of the plaintext -> key id
    pub fn api_key_by_hash(hash: &str) -> String {
        format!("{}:apikey:hash:{}", CACHE_KEY_VERSION, hash)
    }

    /// Set of key ids currently in the given status
    pub fn api_keys_by_status(status: &str) -> String {
        format!("{}:apikeys:status:{}", CACHE_KEY_VERSION, status)
    }

    /// Lifetime use counter of a key
    pub fn api_key_usage_total(key_id: &str) -> String {
        format!("{}:apikey:usage:{}:total", CACHE_KEY_VERSION, key_id)
    }

    /// Use counter of a key for one `YYYY-MM` month
    pub fn api_key_usage_period(key_id: &str, month: &str) -> String {
        format!("{}:apikey:usage:{}:{}", CACHE_KEY_VERSION, key_id, month)
    }

    /// Time of the most recent use of a key
    pub fn api_key_last_used(key_id: &str) -> String {
        format!("{}:apikey:usage:{}:last", CACHE_KEY_VERSION, key_id)
    }

    // =========================================================================
    // Tokens
    // =========================================================================

    /// Outstanding refresh token marker
    pub fn refresh_token(user_id: &str, token_id: &str) -> String {
        format!("{}:jwt:refresh:{}:{}", CACHE_KEY_VERSION, user_id, token_id)
    }

    /// Revoked token marker, keyed by SHA-256 of the token text
    pub fn token_blacklist(token_hash: &str) -> String {
        format!("{}:jwt:bl:{}", CACHE_KEY_VERSION, token_hash)
    }

    // =========================================================================
    // Rate Limiting
    // =========================================================================

    /// Sliding-window counter for one window of one limit profile
    ///
    /// Note: Rate limit keys are NOT versioned (counter semantics don't change).
    /// `window` must already be normalized so equivalent windows share counters.
    pub fn rate_window(principal: &str, requests: u32, window: &str, index: u64) -> String {
        format!("rl:sw:{}:{}:{}:{}", principal, requests, window, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_keys() {
        assert_eq!(CacheKey::api_key("key_abc"), "v1:apikey:rec:key_abc");
        assert_eq!(CacheKey::api_key_by_hash("f00d"), "v1:apikey:hash:f00d");
        assert_eq!(
            CacheKey::api_keys_by_status("active"),
            "v1:apikeys:status:active"
        );
        assert_eq!(
            CacheKey::api_key_usage_total("key_abc"),
            "v1:apikey:usage:key_abc:total"
        );
        assert_eq!(
            CacheKey::api_key_usage_period("key_abc", "2026-04"),
            "v1:apikey:usage:key_abc:2026-04"
        );
        assert_eq!(
            CacheKey::api_key_last_used("key_abc"),
            "v1:apikey:usage:key_abc:last"
        );
    }

    #[test]
    fn test_token_keys() {
        assert_eq!(
            CacheKey::refresh_token("user1", "jti1"),
            "v1:jwt:refresh:user1:jti1"
        );
        assert_eq!(CacheKey::token_blacklist("abc"), "v1:jwt:bl:abc");
    }

    #[test]
    fn test_rate_window_key() {
        // Rate limit keys are NOT versioned
        assert_eq!(
            CacheKey::rate_window("key_1", 100, "60m", 42),
            "rl:sw:key_1:100:60m:42"
        );
    }
}
