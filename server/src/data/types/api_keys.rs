//! API key records
//!
//! `ApiKeyRecord` is the strict in-process form. The store holds the flat
//! `StoredApiKey`, whose composite fields are JSON strings; conversion happens
//! at the read/write boundary so malformed data never leaves the store layer.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::data::cache::CacheError;
use crate::utils::api_key::mask_hash;

/// Lifecycle status of an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    #[default]
    Active,
    Revoked,
    Expired,
}

impl KeyStatus {
    pub const ALL: [KeyStatus; 3] = [Self::Active, Self::Revoked, Self::Expired];

    /// Parse from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "revoked" => Some(Self::Revoked),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }

    /// Only `active` can move, and only to a terminal state
    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        *self == next || *self == Self::Active
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Request quota: `requests` per `window` (e.g. `100` per `"1m"`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct RateLimitSpec {
    pub requests: u32,
    pub window: String,
}

impl RateLimitSpec {
    pub fn new(requests: u32, window: impl Into<String>) -> Self {
        Self {
            requests,
            window: window.into(),
        }
    }
}

/// Usage counters of an API key; the period is the calendar month
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Usage {
    pub total: u64,
    pub period_start: DateTime<Utc>,
    pub period_count: u64,
}

impl Usage {
    pub fn starting(period_start: DateTime<Utc>) -> Self {
        Self {
            total: 0,
            period_start,
            period_count: 0,
        }
    }
}

/// API key record
#[derive(Debug, Clone, PartialEq)]
pub struct ApiKeyRecord {
    pub key_id: String,
    /// First characters of the plaintext, for display
    pub prefix: String,
    /// HMAC of the plaintext (masked once the record leaves the manager)
    pub hashed_key: String,
    pub status: KeyStatus,
    pub plan: String,
    pub permissions: BTreeSet<String>,
    pub rate_limit: RateLimitSpec,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage: Usage,
    pub last_used_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl ApiKeyRecord {
    /// Whether the key's expiry is at or before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// Copy with the hash truncated for display
    pub fn masked(mut self) -> Self {
        self.hashed_key = mask_hash(&self.hashed_key);
        self
    }
}

/// Flat storage form of [`ApiKeyRecord`]
///
/// Timestamps are Unix milliseconds; `permissions`, `rate_limit`, `usage` and
/// `metadata` are JSON-encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredApiKey {
    pub key_id: String,
    pub prefix: String,
    pub hashed_key: String,
    pub status: String,
    pub plan: String,
    pub permissions: String,
    pub rate_limit: String,
    pub created_at: i64,
    pub created_by: String,
    pub expires_at: Option<i64>,
    pub usage: String,
    pub last_used_at: Option<i64>,
    pub description: Option<String>,
    pub metadata: Option<String>,
}

fn malformed(key_id: &str, field: &str, detail: impl fmt::Display) -> CacheError {
    CacheError::Serialization(format!(
        "malformed api key record {key_id}: field '{field}': {detail}"
    ))
}

fn timestamp(key_id: &str, field: &str, ms: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| malformed(key_id, field, ms))
}

impl TryFrom<&ApiKeyRecord> for StoredApiKey {
    type Error = CacheError;

    fn try_from(record: &ApiKeyRecord) -> Result<Self, Self::Error> {
        let encode = |field: &str, value: Result<String, serde_json::Error>| {
            value.map_err(|e| malformed(&record.key_id, field, e))
        };

        Ok(Self {
            key_id: record.key_id.clone(),
            prefix: record.prefix.clone(),
            hashed_key: record.hashed_key.clone(),
            status: record.status.as_str().to_string(),
            plan: record.plan.clone(),
            permissions: encode("permissions", serde_json::to_string(&record.permissions))?,
            rate_limit: encode("rate_limit", serde_json::to_string(&record.rate_limit))?,
            created_at: record.created_at.timestamp_millis(),
            created_by: record.created_by.clone(),
            expires_at: record.expires_at.map(|t| t.timestamp_millis()),
            usage: encode("usage", serde_json::to_string(&record.usage))?,
            last_used_at: record.last_used_at.map(|t| t.timestamp_millis()),
            description: record.description.clone(),
            metadata: record
                .metadata
                .as_ref()
                .map(|m| encode("metadata", serde_json::to_string(m)))
                .transpose()?,
        })
    }
}

impl TryFrom<StoredApiKey> for ApiKeyRecord {
    type Error = CacheError;

    fn try_from(stored: StoredApiKey) -> Result<Self, Self::Error> {
        let id = stored.key_id.as_str();

        let status = KeyStatus::parse(&stored.status)
            .ok_or_else(|| malformed(id, "status", &stored.status))?;
        let permissions: BTreeSet<String> = serde_json::from_str(&stored.permissions)
            .map_err(|e| malformed(id, "permissions", e))?;
        let rate_limit: RateLimitSpec = serde_json::from_str(&stored.rate_limit)
            .map_err(|e| malformed(id, "rate_limit", e))?;
        let usage: Usage =
            serde_json::from_str(&stored.usage).map_err(|e| malformed(id, "usage", e))?;
        let metadata = stored
            .metadata
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|e| malformed(id, "metadata", e))?;

        let created_at = timestamp(id, "created_at", stored.created_at)?;
        let expires_at = stored
            .expires_at
            .map(|ms| timestamp(id, "expires_at", ms))
            .transpose()?;
        let last_used_at = stored
            .last_used_at
            .map(|ms| timestamp(id, "last_used_at", ms))
            .transpose()?;

        Ok(Self {
            key_id: stored.key_id,
            prefix: stored.prefix,
            hashed_key: stored.hashed_key,
            status,
            plan: stored.plan,
            permissions,
            rate_limit,
            created_at,
            created_by: stored.created_by,
            expires_at,
            usage,
            last_used_at,
            description: stored.description,
            metadata,
        })
    }
}
