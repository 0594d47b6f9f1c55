use clap::{Parser, Subcommand};

use std::path::PathBuf;

use super::config::{CacheBackendType, EvictionPolicy};
use super::constants::{
    ENV_ACCESS_TTL_SECS, ENV_ADMIN_TOKEN, ENV_ALLOW_QUERY_KEY, ENV_API_KEY_SECRET,
    ENV_CACHE_BACKEND, ENV_CACHE_EVICTION_POLICY, ENV_CACHE_MAX_ENTRIES, ENV_CACHE_OP_TIMEOUT_MS,
    ENV_CACHE_REDIS_URL, ENV_CONFIG, ENV_CORS_ORIGIN, ENV_HOST, ENV_JWT_AUDIENCE, ENV_JWT_ISSUER,
    ENV_JWT_SECRET, ENV_LEGACY_HEADER, ENV_PORT, ENV_RATE_LIMIT_DEFAULT, ENV_RATE_LIMIT_ENABLED,
    ENV_RATE_LIMIT_FAIL_OPEN, ENV_RATE_LIMIT_GUEST, ENV_REFRESH_TTL_SECS,
};
use crate::data::cache::WindowSpec;
use crate::data::types::RateLimitSpec;

#[derive(Parser)]
#[command(name = "keygate")]
#[command(
    version,
    about = "Authentication and quota gateway for API keys and bearer tokens",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Server host address
    #[arg(long, short = 'H', global = true, env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', global = true, env = ENV_PORT)]
    pub port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', global = true, env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Allowed CORS origin sent on every gateway response
    #[arg(long, global = true, env = ENV_CORS_ORIGIN)]
    pub cors_origin: Option<String>,

    // Token options
    /// Issuer claim of minted tokens
    #[arg(long, global = true, env = ENV_JWT_ISSUER)]
    pub jwt_issuer: Option<String>,

    /// Audience claim of minted tokens
    #[arg(long, global = true, env = ENV_JWT_AUDIENCE)]
    pub jwt_audience: Option<String>,

    /// Access token lifetime in seconds
    #[arg(long, global = true, env = ENV_ACCESS_TTL_SECS)]
    pub access_ttl_secs: Option<u64>,

    /// Refresh token lifetime in seconds
    #[arg(long, global = true, env = ENV_REFRESH_TTL_SECS)]
    pub refresh_ttl_secs: Option<u64>,

    /// Dedicated header carrying legacy API keys
    #[arg(long, global = true, env = ENV_LEGACY_HEADER)]
    pub legacy_header: Option<String>,

    /// Accept legacy keys in the `api_key` query parameter (testing only)
    #[arg(long, global = true, env = ENV_ALLOW_QUERY_KEY)]
    pub allow_query_key: Option<bool>,

    // Secrets
    /// Token signing secret (at least 32 bytes)
    #[arg(long, global = true, env = ENV_JWT_SECRET, hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// API key hashing secret (at least 32 bytes)
    #[arg(long, global = true, env = ENV_API_KEY_SECRET, hide_env_values = true)]
    pub api_key_secret: Option<String>,

    /// Bearer token accepted on the admin endpoints
    #[arg(long, global = true, env = ENV_ADMIN_TOKEN, hide_env_values = true)]
    pub admin_token: Option<String>,

    // Cache options
    /// Key store backend (memory or redis)
    #[arg(long, global = true, env = ENV_CACHE_BACKEND, value_parser = parse_cache_backend_type)]
    pub cache_backend: Option<CacheBackendType>,

    /// Maximum number of cache entries
    #[arg(long, global = true, env = ENV_CACHE_MAX_ENTRIES)]
    pub cache_max_entries: Option<u64>,

    /// Cache eviction policy (tinylfu or lru)
    #[arg(long, global = true, env = ENV_CACHE_EVICTION_POLICY, value_parser = parse_eviction_policy)]
    pub cache_eviction_policy: Option<EvictionPolicy>,

    /// Redis-compatible URL. Supports Redis, Sentinel, Valkey, Dragonfly.
    /// Formats: redis://host:port/db, redis+sentinel://s1:port,s2:port/master/db
    #[arg(long, global = true, env = ENV_CACHE_REDIS_URL, hide_env_values = true)]
    pub cache_redis_url: Option<String>,

    /// Timeout for a single key store operation in milliseconds
    #[arg(long, global = true, env = ENV_CACHE_OP_TIMEOUT_MS)]
    pub cache_op_timeout_ms: Option<u64>,

    // Rate limit options
    /// Enable or disable rate limiting
    #[arg(long, global = true, env = ENV_RATE_LIMIT_ENABLED)]
    pub rate_limit_enabled: Option<bool>,

    /// Allow requests when the key store is unreachable
    #[arg(long, global = true, env = ENV_RATE_LIMIT_FAIL_OPEN)]
    pub rate_limit_fail_open: Option<bool>,

    /// Default quota for new keys, e.g. 100/1m
    #[arg(long, global = true, env = ENV_RATE_LIMIT_DEFAULT, value_parser = parse_rate_limit)]
    pub rate_limit_default: Option<RateLimitSpec>,

    /// Guest quota per client IP, e.g. 10/1m
    #[arg(long, global = true, env = ENV_RATE_LIMIT_GUEST, value_parser = parse_rate_limit)]
    pub rate_limit_guest: Option<RateLimitSpec>,
}

/// Parse cache backend type from CLI/env string
fn parse_cache_backend_type(s: &str) -> Result<CacheBackendType, String> {
    match s.to_lowercase().as_str() {
        "memory" => Ok(CacheBackendType::Memory),
        "redis" => Ok(CacheBackendType::Redis),
        _ => Err(format!(
            "Invalid cache backend '{}'. Valid options: memory, redis",
            s
        )),
    }
}

/// Parse eviction policy from CLI/env string
fn parse_eviction_policy(s: &str) -> Result<EvictionPolicy, String> {
    match s.to_lowercase().as_str() {
        "tinylfu" => Ok(EvictionPolicy::TinyLfu),
        "lru" => Ok(EvictionPolicy::Lru),
        _ => Err(format!(
            "Invalid eviction policy '{}'. Valid options: tinylfu, lru",
            s
        )),
    }
}

/// Parse a `<requests>/<window>` quota from CLI/env string
fn parse_rate_limit(s: &str) -> Result<RateLimitSpec, String> {
    let invalid = || format!("Invalid rate limit '{}'. Expected <requests>/<window>, e.g. 100/1m", s);

    let (requests, window) = s.split_once('/').ok_or_else(invalid)?;
    let requests: u32 = requests.trim().parse().map_err(|_| invalid())?;
    let window = window.trim();
    WindowSpec::parse(requests, window).ok_or_else(invalid)?;

    Ok(RateLimitSpec::new(requests, window))
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Start the server (default command)
    Start,
    /// Offline API key tools
    Keys {
        #[command(subcommand)]
        command: KeysCommands,
    },
}

#[derive(Subcommand, Clone, Debug)]
pub enum KeysCommands {
    /// Print a fresh API key with its key id and prefix. Does not touch the key store.
    Generate,
}

/// Configuration derived from CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub config: Option<PathBuf>,
    pub cors_origin: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub access_ttl_secs: Option<u64>,
    pub refresh_ttl_secs: Option<u64>,
    pub legacy_header: Option<String>,
    pub allow_query_key: Option<bool>,
    pub jwt_secret: Option<String>,
    pub api_key_secret: Option<String>,
    pub admin_token: Option<String>,
    pub cache_backend: Option<CacheBackendType>,
    pub cache_max_entries: Option<u64>,
    pub cache_eviction_policy: Option<EvictionPolicy>,
    pub cache_redis_url: Option<String>,
    pub cache_op_timeout_ms: Option<u64>,
    pub rate_limit_enabled: Option<bool>,
    pub rate_limit_fail_open: Option<bool>,
    pub rate_limit_default: Option<RateLimitSpec>,
    pub rate_limit_guest: Option<RateLimitSpec>,
}

impl From<Cli> for CliConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            config: cli.config,
            cors_origin: cli.cors_origin,
            jwt_issuer: cli.jwt_issuer,
            jwt_audience: cli.jwt_audience,
            access_ttl_secs: cli.access_ttl_secs,
            refresh_ttl_secs: cli.refresh_ttl_secs,
            legacy_header: cli.legacy_header,
            allow_query_key: cli.allow_query_key,
            jwt_secret: cli.jwt_secret,
            api_key_secret: cli.api_key_secret,
            admin_token: cli.admin_token,
            cache_backend: cli.cache_backend,
            cache_max_entries: cli.cache_max_entries,
            cache_eviction_policy: cli.cache_eviction_policy,
            cache_redis_url: cli.cache_redis_url,
            cache_op_timeout_ms: cli.cache_op_timeout_ms,
            rate_limit_enabled: cli.rate_limit_enabled,
            rate_limit_fail_open: cli.rate_limit_fail_open,
            rate_limit_default: cli.rate_limit_default,
            rate_limit_guest: cli.rate_limit_guest,
        }
    }
}

/// Parse CLI arguments and return config with command
pub fn parse() -> (CliConfig, Option<Commands>) {
    let mut cli = Cli::parse();
    let command = cli.command.take();
    (CliConfig::from(cli), command)
}
