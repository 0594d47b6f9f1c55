use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    APP_DOT_FOLDER, CONFIG_FILE_NAME, DEFAULT_ACCESS_TTL_SECS, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_CACHE_OP_TIMEOUT_MS, DEFAULT_CORS_ORIGIN, DEFAULT_GUEST_RATE_LIMIT_REQUESTS,
    DEFAULT_GUEST_RATE_LIMIT_WINDOW, DEFAULT_HOST, DEFAULT_JWT_AUDIENCE, DEFAULT_JWT_ISSUER,
    DEFAULT_LEGACY_CONTEXT_TTL_SECS, DEFAULT_LEGACY_HEADER, DEFAULT_LIMITER_CACHE_CAPACITY,
    DEFAULT_PORT, DEFAULT_RATE_LIMIT_REQUESTS, DEFAULT_RATE_LIMIT_WINDOW, DEFAULT_REFRESH_TTL_SECS,
    ENV_ADMIN_TOKEN, ENV_API_KEY_SECRET, ENV_JWT_SECRET, MIN_SECRET_LEN,
};
use crate::data::cache::WindowSpec;
use crate::data::types::RateLimitSpec;

// =============================================================================
// Cache Backend Enum
// =============================================================================

/// Key store backend type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendType {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for CacheBackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheBackendType::Memory => write!(f, "memory"),
            CacheBackendType::Redis => write!(f, "redis"),
        }
    }
}

// =============================================================================
// Eviction Policy Enum
// =============================================================================

/// Cache eviction policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// TinyLFU - LRU eviction + LFU admission (near-optimal hit ratio)
    #[default]
    TinyLfu,
    /// Simple LRU (better for recency-biased workloads)
    Lru,
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::TinyLfu => write!(f, "tinylfu"),
            EvictionPolicy::Lru => write!(f, "lru"),
        }
    }
}

// =============================================================================
// File Config Structs (JSON, every field optional)
// =============================================================================

/// Server configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ServerFileConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_origin: Option<String>,
}

/// Authentication configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct AuthFileConfig {
    pub issuer: Option<String>,
    pub audience: Option<String>,
    pub access_ttl_secs: Option<u64>,
    pub refresh_ttl_secs: Option<u64>,
    pub legacy_context_ttl_secs: Option<u64>,
    pub legacy_header: Option<String>,
    /// Accept `?api_key=` (testing only)
    pub allow_query_key: Option<bool>,
}

/// Rate limit configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RateLimitFileConfig {
    pub enabled: Option<bool>,
    pub fail_open: Option<bool>,
    pub default_requests: Option<u32>,
    pub default_window: Option<String>,
    pub guest_requests: Option<u32>,
    pub guest_window: Option<String>,
    pub limiter_cache_capacity: Option<u64>,
}

/// Key store configuration section
#[derive(Debug, Default, Clone, Deserialize)]
pub struct CacheFileConfig {
    pub backend: Option<CacheBackendType>,
    pub max_entries: Option<u64>,
    pub eviction_policy: Option<EvictionPolicy>,
    /// Connection URL for Redis-compatible backends
    pub redis_url: Option<String>,
    pub op_timeout_ms: Option<u64>,
}

/// File-based configuration (JSON)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    pub server: Option<ServerFileConfig>,
    pub auth: Option<AuthFileConfig>,
    pub rate_limit: Option<RateLimitFileConfig>,
    pub cache: Option<CacheFileConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

/// Overwrite `target` with `value` when set
fn merge_field<T: fmt::Debug>(target: &mut Option<T>, value: Option<T>, name: &str) {
    if value.is_some() {
        tracing::trace!(value = ?value, "Merging {}", name);
        *target = value;
    }
}

impl FileConfig {
    /// Load configuration from a JSON file
    fn load_from_file(path: &Path) -> Result<Self> {
        tracing::debug!(path = %path.display(), "Loading config file");
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Warn about unknown fields in the config
    fn warn_unknown_fields(&self) {
        if let serde_json::Value::Object(map) = &self.extra
            && !map.is_empty()
        {
            let keys_str: String = map
                .keys()
                .map(|k| k.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            tracing::warn!(
                fields = %keys_str,
                "Unknown fields in config file (possible typos)"
            );
        }
    }

    /// Merge another FileConfig into this one (other takes precedence)
    fn merge(&mut self, other: FileConfig) {
        if let Some(server) = other.server {
            let current = self.server.get_or_insert_with(ServerFileConfig::default);
            merge_field(&mut current.host, server.host, "server.host");
            merge_field(&mut current.port, server.port, "server.port");
            merge_field(
                &mut current.cors_origin,
                server.cors_origin,
                "server.cors_origin",
            );
        }

        if let Some(auth) = other.auth {
            let current = self.auth.get_or_insert_with(AuthFileConfig::default);
            merge_field(&mut current.issuer, auth.issuer, "auth.issuer");
            merge_field(&mut current.audience, auth.audience, "auth.audience");
            merge_field(
                &mut current.access_ttl_secs,
                auth.access_ttl_secs,
                "auth.access_ttl_secs",
            );
            merge_field(
                &mut current.refresh_ttl_secs,
                auth.refresh_ttl_secs,
                "auth.refresh_ttl_secs",
            );
            merge_field(
                &mut current.legacy_context_ttl_secs,
                auth.legacy_context_ttl_secs,
                "auth.legacy_context_ttl_secs",
            );
            merge_field(
                &mut current.legacy_header,
                auth.legacy_header,
                "auth.legacy_header",
            );
            merge_field(
                &mut current.allow_query_key,
                auth.allow_query_key,
                "auth.allow_query_key",
            );
        }

        if let Some(rate_limit) = other.rate_limit {
            let current = self
                .rate_limit
                .get_or_insert_with(RateLimitFileConfig::default);
            merge_field(&mut current.enabled, rate_limit.enabled, "rate_limit.enabled");
            merge_field(
                &mut current.fail_open,
                rate_limit.fail_open,
                "rate_limit.fail_open",
            );
            merge_field(
                &mut current.default_requests,
                rate_limit.default_requests,
                "rate_limit.default_requests",
            );
            merge_field(
                &mut current.default_window,
                rate_limit.default_window,
                "rate_limit.default_window",
            );
            merge_field(
                &mut current.guest_requests,
                rate_limit.guest_requests,
                "rate_limit.guest_requests",
            );
            merge_field(
                &mut current.guest_window,
                rate_limit.guest_window,
                "rate_limit.guest_window",
            );
            merge_field(
                &mut current.limiter_cache_capacity,
                rate_limit.limiter_cache_capacity,
                "rate_limit.limiter_cache_capacity",
            );
        }

        if let Some(cache) = other.cache {
            let current = self.cache.get_or_insert_with(CacheFileConfig::default);
            merge_field(&mut current.backend, cache.backend, "cache.backend");
            merge_field(&mut current.max_entries, cache.max_entries, "cache.max_entries");
            merge_field(
                &mut current.eviction_policy,
                cache.eviction_policy,
                "cache.eviction_policy",
            );
            if cache.redis_url.is_some() {
                // URL may carry a password
                tracing::trace!("Merging cache.redis_url = ***");
                current.redis_url = cache.redis_url;
            }
            merge_field(
                &mut current.op_timeout_ms,
                cache.op_timeout_ms,
                "cache.op_timeout_ms",
            );
        }
    }
}

// =============================================================================
// Runtime Config Structs (final merged configuration)
// =============================================================================

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Value of `Access-Control-Allow-Origin` on every gateway response
    pub cors_origin: String,
}

/// Authentication configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    /// Lifetime of a principal synthesized from a legacy key
    pub legacy_context_ttl_secs: u64,
    /// Dedicated legacy key header (lowercase)
    pub legacy_header: String,
    pub allow_query_key: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: DEFAULT_JWT_ISSUER.to_string(),
            audience: DEFAULT_JWT_AUDIENCE.to_string(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
            legacy_context_ttl_secs: DEFAULT_LEGACY_CONTEXT_TTL_SECS,
            legacy_header: DEFAULT_LEGACY_HEADER.to_string(),
            allow_query_key: false,
        }
    }
}

/// Rate limit configuration (final/runtime)
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Allow requests when the store is unreachable
    pub fail_open: bool,
    /// Quota for newly created keys
    pub default_limit: RateLimitSpec,
    /// Quota for unauthenticated callers, per client IP
    pub guest_limit: RateLimitSpec,
    pub limiter_cache_capacity: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_open: true,
            default_limit: RateLimitSpec::new(
                DEFAULT_RATE_LIMIT_REQUESTS,
                DEFAULT_RATE_LIMIT_WINDOW,
            ),
            guest_limit: RateLimitSpec::new(
                DEFAULT_GUEST_RATE_LIMIT_REQUESTS,
                DEFAULT_GUEST_RATE_LIMIT_WINDOW,
            ),
            limiter_cache_capacity: DEFAULT_LIMITER_CACHE_CAPACITY,
        }
    }
}

/// Key store configuration (used internally by CacheService)
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Backend type
    pub backend: CacheBackendType,
    /// Maximum entries (memory backend)
    pub max_entries: u64,
    /// Eviction policy (memory backend)
    pub eviction_policy: EvictionPolicy,
    /// Redis URL (redis backend)
    pub redis_url: Option<String>,
    /// Upper bound for a single store call
    pub op_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendType::Memory,
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            eviction_policy: EvictionPolicy::TinyLfu,
            redis_url: None,
            op_timeout_ms: DEFAULT_CACHE_OP_TIMEOUT_MS,
        }
    }
}

/// Server secrets, only ever read from CLI flags or the environment
#[derive(Clone, Default)]
pub struct SecretsConfig {
    pub jwt_secret: Option<String>,
    pub api_key_secret: Option<String>,
    pub admin_token: Option<String>,
}

impl fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "***" } else { "<unset>" };
        f.debug_struct("SecretsConfig")
            .field("jwt_secret", &mask(&self.jwt_secret))
            .field("api_key_secret", &mask(&self.api_key_secret))
            .field("admin_token", &mask(&self.admin_token))
            .finish()
    }
}

impl SecretsConfig {
    /// Token signing secret, generated for this process when unset
    pub fn jwt_secret_or_generate(&self) -> String {
        secret_or_generate(self.jwt_secret.as_deref(), ENV_JWT_SECRET)
    }

    /// API key hashing secret, generated for this process when unset
    pub fn api_key_secret_or_generate(&self) -> String {
        secret_or_generate(self.api_key_secret.as_deref(), ENV_API_KEY_SECRET)
    }
}

fn secret_or_generate(value: Option<&str>, env: &str) -> String {
    match value {
        Some(secret) => secret.to_string(),
        None => {
            tracing::warn!(
                env,
                "Secret not configured, generated a per-process value. \
                 Tokens and keys will not survive a restart."
            );
            hex::encode(crate::utils::crypto::generate_signing_key())
        }
    }
}

/// Final merged application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub secrets: SecretsConfig,
}

impl AppConfig {
    /// Load configuration from all sources
    ///
    /// Priority (lowest to highest):
    /// 1. Defaults
    /// 2. Profile directory config (~/.keygate/keygate.json)
    /// 3. Local directory config OR CLI-specified config path
    /// 4. CLI arguments (which include env var fallbacks via clap)
    pub fn load(cli: &CliConfig) -> Result<Self> {
        tracing::debug!("Loading application configuration");

        let mut file_config = FileConfig::default();
        let mut found_configs: Vec<String> = Vec::new();

        // 1. Profile dir - skip if not exists
        if let Some(profile_path) = get_profile_config_path()
            && profile_path.exists()
        {
            let profile_config = FileConfig::load_from_file(&profile_path)?;
            profile_config.warn_unknown_fields();
            file_config.merge(profile_config);
            found_configs.push(profile_path.display().to_string());
        }

        // 2. CLI-specified path OR local directory
        let overlay_path = if let Some(ref path) = cli.config {
            let expanded = expand_path(&path.to_string_lossy());
            if !expanded.exists() {
                anyhow::bail!("Config file not found: {}", expanded.display());
            }
            Some(expanded)
        } else {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() { Some(local) } else { None }
        };

        if let Some(path) = overlay_path {
            let overlay_config = FileConfig::load_from_file(&path)?;
            overlay_config.warn_unknown_fields();
            file_config.merge(overlay_config);
            found_configs.push(path.display().to_string());
        }

        tracing::debug!(configs = ?found_configs, "Config files loaded");

        let config = Self::layer(file_config, cli);
        config.validate()?;

        tracing::debug!(config = ?config, "Configuration loaded");
        Ok(config)
    }

    /// Layer configs: defaults -> file config -> CLI/env overrides
    fn layer(file_config: FileConfig, cli: &CliConfig) -> Self {
        let file_server = file_config.server.unwrap_or_default();
        let file_auth = file_config.auth.unwrap_or_default();
        let file_rate_limit = file_config.rate_limit.unwrap_or_default();
        let file_cache = file_config.cache.unwrap_or_default();

        let server = ServerConfig {
            host: cli
                .host
                .clone()
                .or(file_server.host)
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(file_server.port).unwrap_or(DEFAULT_PORT),
            cors_origin: cli
                .cors_origin
                .clone()
                .or(file_server.cors_origin)
                .unwrap_or_else(|| DEFAULT_CORS_ORIGIN.to_string()),
        };

        let auth_defaults = AuthConfig::default();
        let auth = AuthConfig {
            issuer: cli
                .jwt_issuer
                .clone()
                .or(file_auth.issuer)
                .unwrap_or(auth_defaults.issuer),
            audience: cli
                .jwt_audience
                .clone()
                .or(file_auth.audience)
                .unwrap_or(auth_defaults.audience),
            access_ttl_secs: cli
                .access_ttl_secs
                .or(file_auth.access_ttl_secs)
                .unwrap_or(auth_defaults.access_ttl_secs),
            refresh_ttl_secs: cli
                .refresh_ttl_secs
                .or(file_auth.refresh_ttl_secs)
                .unwrap_or(auth_defaults.refresh_ttl_secs),
            legacy_context_ttl_secs: file_auth
                .legacy_context_ttl_secs
                .unwrap_or(auth_defaults.legacy_context_ttl_secs),
            legacy_header: cli
                .legacy_header
                .clone()
                .or(file_auth.legacy_header)
                .unwrap_or(auth_defaults.legacy_header)
                .to_ascii_lowercase(),
            allow_query_key: cli
                .allow_query_key
                .or(file_auth.allow_query_key)
                .unwrap_or(auth_defaults.allow_query_key),
        };

        // A quota flag (`100/1m`) replaces both halves of the file setting
        let rl_defaults = RateLimitConfig::default();
        let default_limit = cli.rate_limit_default.clone().unwrap_or_else(|| {
            RateLimitSpec::new(
                file_rate_limit
                    .default_requests
                    .unwrap_or(rl_defaults.default_limit.requests),
                file_rate_limit
                    .default_window
                    .unwrap_or(rl_defaults.default_limit.window),
            )
        });
        let guest_limit = cli.rate_limit_guest.clone().unwrap_or_else(|| {
            RateLimitSpec::new(
                file_rate_limit
                    .guest_requests
                    .unwrap_or(rl_defaults.guest_limit.requests),
                file_rate_limit
                    .guest_window
                    .unwrap_or(rl_defaults.guest_limit.window),
            )
        });
        let rate_limit = RateLimitConfig {
            enabled: cli
                .rate_limit_enabled
                .or(file_rate_limit.enabled)
                .unwrap_or(rl_defaults.enabled),
            fail_open: cli
                .rate_limit_fail_open
                .or(file_rate_limit.fail_open)
                .unwrap_or(rl_defaults.fail_open),
            default_limit,
            guest_limit,
            limiter_cache_capacity: file_rate_limit
                .limiter_cache_capacity
                .unwrap_or(rl_defaults.limiter_cache_capacity),
        };

        let cache_defaults = CacheConfig::default();
        let cache = CacheConfig {
            backend: cli
                .cache_backend
                .or(file_cache.backend)
                .unwrap_or(cache_defaults.backend),
            max_entries: cli
                .cache_max_entries
                .or(file_cache.max_entries)
                .unwrap_or(cache_defaults.max_entries),
            eviction_policy: cli
                .cache_eviction_policy
                .or(file_cache.eviction_policy)
                .unwrap_or(cache_defaults.eviction_policy),
            redis_url: cli.cache_redis_url.clone().or(file_cache.redis_url),
            op_timeout_ms: cli
                .cache_op_timeout_ms
                .or(file_cache.op_timeout_ms)
                .unwrap_or(cache_defaults.op_timeout_ms),
        };

        let secrets = SecretsConfig {
            jwt_secret: cli.jwt_secret.clone().filter(|s| !s.is_empty()),
            api_key_secret: cli.api_key_secret.clone().filter(|s| !s.is_empty()),
            admin_token: cli.admin_token.clone().filter(|s| !s.is_empty()),
        };

        Self {
            server,
            auth,
            rate_limit,
            cache,
            secrets,
        }
    }

    /// Validate the configuration for consistency and correctness
    fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            anyhow::bail!("Configuration error: server.host must not be empty");
        }

        // Port 0 would bind a random port
        if self.server.port == 0 {
            anyhow::bail!("Configuration error: server.port must be greater than 0");
        }

        if self.auth.issuer.is_empty() {
            anyhow::bail!("Configuration error: auth.issuer must not be empty");
        }
        if self.auth.audience.is_empty() {
            anyhow::bail!("Configuration error: auth.audience must not be empty");
        }
        if self.auth.access_ttl_secs == 0
            || self.auth.refresh_ttl_secs == 0
            || self.auth.legacy_context_ttl_secs == 0
        {
            anyhow::bail!("Configuration error: auth token lifetimes must be greater than 0");
        }
        if self.auth.legacy_header.is_empty()
            || axum::http::HeaderName::from_bytes(self.auth.legacy_header.as_bytes()).is_err()
        {
            anyhow::bail!(
                "Configuration error: auth.legacy_header '{}' is not a valid header name",
                self.auth.legacy_header
            );
        }

        for (name, spec) in [
            ("rate_limit.default", &self.rate_limit.default_limit),
            ("rate_limit.guest", &self.rate_limit.guest_limit),
        ] {
            if WindowSpec::parse(spec.requests, &spec.window).is_none() {
                anyhow::bail!(
                    "Configuration error: {}_window '{}' is not a duration like 30s, 1m, 1h or 1d",
                    name,
                    spec.window
                );
            }
        }

        if self.rate_limit.enabled && self.rate_limit.default_limit.requests == 0 {
            tracing::warn!("rate_limit.default_requests is 0, keys with the default quota are always blocked");
        }

        if self.cache.backend == CacheBackendType::Redis
            && self.cache.redis_url.as_ref().is_none_or(|u| u.is_empty())
        {
            anyhow::bail!(
                "Configuration error: cache.redis_url is required when cache.backend is 'redis'"
            );
        }

        if self.cache.op_timeout_ms == 0 {
            anyhow::bail!("Configuration error: cache.op_timeout_ms must be greater than 0");
        }

        for (env, value) in [
            (ENV_JWT_SECRET, &self.secrets.jwt_secret),
            (ENV_API_KEY_SECRET, &self.secrets.api_key_secret),
        ] {
            if let Some(secret) = value
                && secret.len() < MIN_SECRET_LEN
            {
                anyhow::bail!(
                    "Configuration error: {} must be at least {} bytes",
                    env,
                    MIN_SECRET_LEN
                );
            }
        }

        if self.secrets.admin_token.is_none() {
            tracing::info!(
                env = ENV_ADMIN_TOKEN,
                "No admin token configured, admin endpoints are disabled"
            );
        }

        if is_all_interfaces(&self.server.host) && self.auth.allow_query_key {
            tracing::warn!(
                "auth.allow_query_key is enabled on a public interface; keys in URLs end up in logs"
            );
        }

        Ok(())
    }
}

/// Get the profile config path (~/.keygate/keygate.json)
fn get_profile_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(APP_DOT_FOLDER).join(CONFIG_FILE_NAME))
}

/// Expand a leading `~` to the home directory
fn expand_path(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Check if host binds to all network interfaces
fn is_all_interfaces(host: &str) -> bool {
    matches!(host, "0.0.0.0" | "::" | "[::]")
}
