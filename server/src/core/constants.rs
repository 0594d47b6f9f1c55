// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display)
pub const APP_NAME: &str = "Keygate";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "keygate";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".keygate";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "keygate.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "KEYGATE_CONFIG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "KEYGATE_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "KEYGATE_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "KEYGATE_LOG";

/// Environment variable for the allowed CORS origin echoed on every response
pub const ENV_CORS_ORIGIN: &str = "KEYGATE_CORS_ORIGIN";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5390;

/// Default CORS origin
pub const DEFAULT_CORS_ORIGIN: &str = "*";

/// Default request body limit (1 MB)
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Body limit for admin and token endpoints (64 KB)
pub const AUTH_BODY_LIMIT: usize = 64 * 1024;

// =============================================================================
// Environment Variables - Secrets
// =============================================================================

/// HMAC secret for signing bearer tokens
pub const ENV_JWT_SECRET: &str = "KEYGATE_JWT_SECRET";

/// HMAC secret for hashing legacy API keys
pub const ENV_API_KEY_SECRET: &str = "KEYGATE_API_KEY_SECRET";

/// Operator token for the admin endpoints
pub const ENV_ADMIN_TOKEN: &str = "KEYGATE_ADMIN_TOKEN";

/// Minimum accepted length for configured secrets (bytes)
pub const MIN_SECRET_LEN: usize = 32;

// =============================================================================
// Environment Variables - Auth
// =============================================================================

pub const ENV_JWT_ISSUER: &str = "KEYGATE_JWT_ISSUER";
pub const ENV_JWT_AUDIENCE: &str = "KEYGATE_JWT_AUDIENCE";
pub const ENV_ACCESS_TTL_SECS: &str = "KEYGATE_ACCESS_TTL_SECS";
pub const ENV_REFRESH_TTL_SECS: &str = "KEYGATE_REFRESH_TTL_SECS";
pub const ENV_LEGACY_HEADER: &str = "KEYGATE_LEGACY_HEADER";
pub const ENV_ALLOW_QUERY_KEY: &str = "KEYGATE_ALLOW_QUERY_KEY";

// =============================================================================
// Token Defaults
// =============================================================================

/// Default token issuer claim
pub const DEFAULT_JWT_ISSUER: &str = "keygate";

/// Default token audience claim
pub const DEFAULT_JWT_AUDIENCE: &str = "keygate-api";

/// Access token lifetime (15 minutes)
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 15 * 60;

/// Refresh token lifetime (7 days)
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Lifetime assigned to a principal synthesized from a legacy key (1 hour)
pub const DEFAULT_LEGACY_CONTEXT_TTL_SECS: u64 = 60 * 60;

/// Token type returned alongside a token pair
pub const TOKEN_TYPE_BEARER: &str = "Bearer";

/// `token_type` claim for access tokens
pub const TOKEN_KIND_ACCESS: &str = "access";

/// `token_type` claim for refresh tokens
pub const TOKEN_KIND_REFRESH: &str = "refresh";

// =============================================================================
// Legacy API Keys
// =============================================================================

/// API key prefix
pub const API_KEY_PREFIX: &str = "kg_";

/// Random bytes per key (256 bits, hex encoded)
pub const API_KEY_RANDOM_BYTES: usize = 32;

/// Number of characters shown as the display prefix
pub const API_KEY_PREFIX_DISPLAY_LEN: usize = 12;

/// Prefix of generated key ids
pub const API_KEY_ID_PREFIX: &str = "key_";

/// Hex characters of SHA-256(plaintext) used in the key id
pub const API_KEY_ID_HEX_LEN: usize = 16;

/// Characters of the hashed key left visible after masking
pub const API_KEY_MASK_VISIBLE_LEN: usize = 8;

/// Default dedicated legacy header
pub const DEFAULT_LEGACY_HEADER: &str = "x-api-key";

/// Query parameter accepted for legacy keys (testing only)
pub const LEGACY_QUERY_PARAM: &str = "api_key";

/// Default plan for newly created keys
pub const DEFAULT_PLAN: &str = "free";

/// Default permission for newly created keys
pub const DEFAULT_PERMISSION: &str = "read";

/// Attempts at finding an unused key id before giving up
pub const API_KEY_CREATE_ATTEMPTS: usize = 3;

/// Lifetime of a monthly usage counter, long enough to outlive its month
pub const USAGE_PERIOD_TTL_SECS: u64 = 62 * 24 * 60 * 60;

// =============================================================================
// Guest Principal
// =============================================================================

pub const GUEST_USER_ID: &str = "guest";
pub const GUEST_PLAN: &str = "guest";
pub const GUEST_API_KEY_REF: &str = "guest";

// =============================================================================
// Environment Variables - Cache
// =============================================================================

/// Environment variable for cache backend (memory, redis)
pub const ENV_CACHE_BACKEND: &str = "KEYGATE_CACHE_BACKEND";

/// Environment variable for max cache entries (in-memory only)
pub const ENV_CACHE_MAX_ENTRIES: &str = "KEYGATE_CACHE_MAX_ENTRIES";

/// Environment variable for cache eviction policy (in-memory only)
pub const ENV_CACHE_EVICTION_POLICY: &str = "KEYGATE_CACHE_EVICTION_POLICY";

/// Environment variable for Redis-compatible URL
pub const ENV_CACHE_REDIS_URL: &str = "KEYGATE_CACHE_REDIS_URL";

/// Environment variable for the per-operation store timeout
pub const ENV_CACHE_OP_TIMEOUT_MS: &str = "KEYGATE_CACHE_OP_TIMEOUT_MS";

// =============================================================================
// Cache Defaults
// =============================================================================

/// Default max cache entries for in-memory backend
pub const DEFAULT_CACHE_MAX_ENTRIES: u64 = 100_000;

/// Default per-operation store timeout
pub const DEFAULT_CACHE_OP_TIMEOUT_MS: u64 = 500;

/// Cache key version prefix (bump to invalidate all keys)
pub const CACHE_KEY_VERSION: &str = "v1";

// =============================================================================
// Environment Variables - Rate Limiting
// =============================================================================

pub const ENV_RATE_LIMIT_ENABLED: &str = "KEYGATE_RATE_LIMIT_ENABLED";
pub const ENV_RATE_LIMIT_FAIL_OPEN: &str = "KEYGATE_RATE_LIMIT_FAIL_OPEN";
pub const ENV_RATE_LIMIT_DEFAULT: &str = "KEYGATE_RATE_LIMIT_DEFAULT";
pub const ENV_RATE_LIMIT_GUEST: &str = "KEYGATE_RATE_LIMIT_GUEST";

// =============================================================================
// Rate Limit Defaults
// =============================================================================

/// Default per-key quota (requests)
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;

/// Default per-key quota window
pub const DEFAULT_RATE_LIMIT_WINDOW: &str = "1m";

/// Guest quota (requests)
pub const DEFAULT_GUEST_RATE_LIMIT_REQUESTS: u32 = 10;

/// Guest quota window
pub const DEFAULT_GUEST_RATE_LIMIT_WINDOW: &str = "1m";

/// Capacity of the limiter configuration cache
pub const DEFAULT_LIMITER_CACHE_CAPACITY: u64 = 10_000;

/// Idle time after which a cached limiter configuration is dropped
pub const LIMITER_CACHE_IDLE_SECS: u64 = 60 * 60;

// =============================================================================
// Shutdown
// =============================================================================

/// Max time to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
