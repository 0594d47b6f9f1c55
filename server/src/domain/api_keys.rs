//! Legacy API key lifecycle
//!
//! Keys are opaque `kg_` strings shown to the caller exactly once. The store
//! keeps the record under its key id, an index from the keyed hash of the
//! plaintext to the key id, and one set of key ids per status.
//!
//! Status moves between the per-status sets are two separate store calls and
//! are not transactional; a crash in between leaves the id in both sets (or
//! neither), which `list` tolerates by trusting the record's own status.
//!
//! Usage lives in counters next to the record and is only folded into it when
//! a record is returned to a caller. Counting a use never rewrites the record,
//! so it cannot undo a concurrent status change.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::core::constants::{
    API_KEY_CREATE_ATTEMPTS, DEFAULT_PERMISSION, DEFAULT_PLAN, USAGE_PERIOD_TTL_SECS,
};
use crate::data::cache::{CacheError, CacheKey, CacheService};
use crate::data::types::{ApiKeyRecord, KeyStatus, RateLimitSpec, StoredApiKey, Usage};
use crate::domain::tokens::{PrincipalSource, TokenSubject};
use crate::utils::api_key::{
    ApiKeyHasher, generate_api_key, is_valid_api_key, key_id_for, key_prefix, mask_hash,
};
use crate::utils::duration::parse_expires_in;
use crate::utils::time::{month_label, month_start};

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiKeyError {
    #[error("API key not found: {0}")]
    NotFound(String),

    #[error("API key status cannot change from {from} to {to}")]
    InvalidTransition { from: KeyStatus, to: KeyStatus },

    #[error("Invalid duration '{0}', expected a value like 30s, 15m, 12h or 7d")]
    InvalidDuration(String),

    #[error("Could not allocate an unused key id after {0} attempts")]
    IdExhausted(usize),

    #[error(transparent)]
    Store(#[from] CacheError),
}

// ============================================================================
// REQUEST / RESULT TYPES
// ============================================================================

/// A freshly generated key and the identifiers derived from it
#[derive(Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub prefix: String,
    pub key_id: String,
}

impl GeneratedKey {
    pub fn new() -> Self {
        let plaintext = generate_api_key();
        Self {
            prefix: key_prefix(&plaintext),
            key_id: key_id_for(&plaintext),
            plaintext,
        }
    }
}

impl Default for GeneratedKey {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("prefix", &self.prefix)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Parameters for a new key; unset fields take the manager defaults
#[derive(Debug, Clone, Default)]
pub struct CreateApiKey {
    pub plan: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub rate_limit: Option<RateLimitSpec>,
    /// Lifetime like `30d`; unparsable or out-of-range values mean no expiry
    pub expires_in: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Owner of the key; becomes the user id of principals derived from it
    pub created_by: String,
}

/// Result of [`ApiKeyManager::create`]
pub struct CreatedApiKey {
    /// Plaintext key, never stored
    pub api_key: String,
    /// Masked record
    pub record: ApiKeyRecord,
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default)]
pub struct ApiKeyUpdate {
    pub plan: Option<String>,
    pub permissions: Option<Vec<String>>,
    pub rate_limit: Option<RateLimitSpec>,
    pub status: Option<KeyStatus>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
    /// Added to the current expiry, or to now when the key never expires
    pub extend_expires_in: Option<String>,
}

// ============================================================================
// MANAGER
// ============================================================================

/// Creates, looks up and administers legacy API keys
pub struct ApiKeyManager {
    cache: Arc<CacheService>,
    hasher: ApiKeyHasher,
    default_rate_limit: RateLimitSpec,
}

impl ApiKeyManager {
    pub fn new(
        cache: Arc<CacheService>,
        hasher: ApiKeyHasher,
        default_rate_limit: RateLimitSpec,
    ) -> Self {
        Self {
            cache,
            hasher,
            default_rate_limit,
        }
    }

    /// Generate a key and its keyed comparison hash
    pub fn generate_key(&self) -> (GeneratedKey, String) {
        let key = GeneratedKey::new();
        let hashed = self.hasher.hash(&key.plaintext);
        (key, hashed)
    }

    /// Create and persist a new key. The plaintext is returned only here.
    pub async fn create(&self, params: CreateApiKey) -> Result<CreatedApiKey, ApiKeyError> {
        let (key, hashed_key) = self.unused_key().await?;
        let now = Utc::now();

        let expires_at = params.expires_in.as_deref().and_then(|s| {
            let expires_at = expiry_after(now, s);
            if expires_at.is_none() {
                tracing::debug!(key_prefix = %key.prefix, expires_in = %s, "Unusable expires_in, key will not expire");
            }
            expires_at
        });

        let permissions: BTreeSet<String> = params
            .permissions
            .unwrap_or_else(|| vec![DEFAULT_PERMISSION.to_string()])
            .into_iter()
            .collect();

        let record = ApiKeyRecord {
            key_id: key.key_id.clone(),
            prefix: key.prefix.clone(),
            hashed_key: hashed_key.clone(),
            status: KeyStatus::Active,
            plan: params.plan.unwrap_or_else(|| DEFAULT_PLAN.to_string()),
            permissions,
            rate_limit: params
                .rate_limit
                .unwrap_or_else(|| self.default_rate_limit.clone()),
            created_at: now,
            created_by: params.created_by,
            expires_at,
            usage: Usage::starting(month_start(now)),
            last_used_at: None,
            description: params.description,
            metadata: params.metadata,
        };

        self.save(&record).await?;
        self.cache
            .set(&CacheKey::api_key_by_hash(&hashed_key), &record.key_id, None)
            .await?;
        self.cache
            .set_add(
                &CacheKey::api_keys_by_status(KeyStatus::Active.as_str()),
                &record.key_id,
            )
            .await?;

        tracing::info!(
            key_id = %record.key_id,
            key_prefix = %record.prefix,
            plan = %record.plan,
            "API key created"
        );

        Ok(CreatedApiKey {
            api_key: key.plaintext,
            record: record.masked(),
        })
    }

    /// Generate keys until one has an id and hash not seen before
    async fn unused_key(&self) -> Result<(GeneratedKey, String), ApiKeyError> {
        for _ in 0..API_KEY_CREATE_ATTEMPTS {
            let (key, hashed) = self.generate_key();
            let id_taken = self.cache.exists(&CacheKey::api_key(&key.key_id)).await?;
            let hash_taken = self
                .cache
                .exists(&CacheKey::api_key_by_hash(&hashed))
                .await?;
            if !id_taken && !hash_taken {
                return Ok((key, hashed));
            }
            tracing::warn!(key_id = %key.key_id, "Generated key collides with an existing key, retrying");
        }
        Err(ApiKeyError::IdExhausted(API_KEY_CREATE_ATTEMPTS))
    }

    /// Resolve a presented plaintext key to its active record
    ///
    /// Returns `None` for unknown, revoked and expired keys. A key found past
    /// its expiry is marked `expired` before returning.
    pub async fn find_by_api_key(
        &self,
        plaintext: &str,
    ) -> Result<Option<ApiKeyRecord>, CacheError> {
        if !is_valid_api_key(plaintext) {
            tracing::debug!(key_prefix = %key_prefix(plaintext), "Malformed API key");
            return Ok(None);
        }

        let hashed = self.hasher.hash(plaintext);
        let Some(key_id) = self
            .cache
            .get::<String>(&CacheKey::api_key_by_hash(&hashed))
            .await?
        else {
            tracing::debug!(key_hash = %mask_hash(&hashed), "Unknown API key");
            return Ok(None);
        };

        let Some(record) = self.load(&key_id).await? else {
            tracing::warn!(%key_id, key_hash = %mask_hash(&hashed), "Hash index points at a missing record");
            return Ok(None);
        };

        match record.status {
            KeyStatus::Active if self.is_expired(&record) => {
                self.mark_expired(record).await?;
                Ok(None)
            }
            KeyStatus::Active => Ok(Some(record)),
            status => {
                tracing::debug!(%key_id, %status, "API key not active");
                Ok(None)
            }
        }
    }

    /// Masked record by key id
    pub async fn get(&self, key_id: &str) -> Result<ApiKeyRecord, ApiKeyError> {
        let record = self.require(key_id).await?;
        Ok(self.with_usage(record).await?.masked())
    }

    /// Masked records, newest first, optionally filtered by status
    pub async fn list(&self, status: Option<KeyStatus>) -> Result<Vec<ApiKeyRecord>, ApiKeyError> {
        let statuses = match status {
            Some(s) => vec![s],
            None => KeyStatus::ALL.to_vec(),
        };

        let mut seen = BTreeSet::new();
        let mut records = Vec::new();
        for set_status in statuses {
            let ids = self
                .cache
                .set_members(&CacheKey::api_keys_by_status(set_status.as_str()))
                .await?;
            for key_id in ids {
                if !seen.insert(key_id.clone()) {
                    continue;
                }
                let Some(mut record) = self.load(&key_id).await? else {
                    continue;
                };
                if record.status == KeyStatus::Active && self.is_expired(&record) {
                    record = self.mark_expired(record).await?;
                }
                if status.is_none_or(|s| s == record.status) {
                    records.push(self.with_usage(record).await?.masked());
                }
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Apply a partial update and return the masked result
    pub async fn update(
        &self,
        key_id: &str,
        update: ApiKeyUpdate,
    ) -> Result<ApiKeyRecord, ApiKeyError> {
        let mut record = self.require(key_id).await?;
        let previous_status = record.status;

        if let Some(next) = update.status {
            if !record.status.can_transition_to(next) {
                return Err(ApiKeyError::InvalidTransition {
                    from: record.status,
                    to: next,
                });
            }
        }

        let expires_at = update
            .extend_expires_in
            .as_deref()
            .map(|s| {
                let base = record.expires_at.unwrap_or_else(Utc::now);
                expiry_after(base, s).ok_or_else(|| ApiKeyError::InvalidDuration(s.to_string()))
            })
            .transpose()?;

        if let Some(plan) = update.plan {
            record.plan = plan;
        }
        if let Some(permissions) = update.permissions {
            record.permissions = permissions.into_iter().collect();
        }
        if let Some(rate_limit) = update.rate_limit {
            record.rate_limit = rate_limit;
        }
        if let Some(status) = update.status {
            record.status = status;
        }
        if let Some(description) = update.description {
            record.description = Some(description);
        }
        if let Some(metadata) = update.metadata {
            record.metadata = Some(metadata);
        }
        if expires_at.is_some() {
            record.expires_at = expires_at;
        }

        self.save(&record).await?;
        if record.status != previous_status {
            self.move_status(&record.key_id, previous_status, record.status)
                .await?;
        }

        tracing::info!(%key_id, status = %record.status, "API key updated");
        Ok(self.with_usage(record).await?.masked())
    }

    /// Revoke a key. Revoking an already revoked or expired key changes nothing.
    pub async fn revoke(&self, key_id: &str) -> Result<ApiKeyRecord, ApiKeyError> {
        let mut record = self.require(key_id).await?;
        if record.status != KeyStatus::Active {
            tracing::debug!(%key_id, status = %record.status, "Revoke on inactive key is a no-op");
            return Ok(self.with_usage(record).await?.masked());
        }

        record.status = KeyStatus::Revoked;
        self.save(&record).await?;
        self.move_status(key_id, KeyStatus::Active, KeyStatus::Revoked)
            .await?;

        tracing::info!(%key_id, key_prefix = %record.prefix, "API key revoked");
        Ok(self.with_usage(record).await?.masked())
    }

    /// Count one use of a key
    ///
    /// Bumps the lifetime and monthly counters and stamps the last-use time.
    /// The record itself is left untouched.
    pub async fn record_usage(&self, key_id: &str) -> Result<(), ApiKeyError> {
        self.record_usage_at(key_id, Utc::now()).await
    }

    async fn record_usage_at(&self, key_id: &str, now: DateTime<Utc>) -> Result<(), ApiKeyError> {
        if !self.cache.exists(&CacheKey::api_key(key_id)).await? {
            return Err(ApiKeyError::NotFound(key_id.to_string()));
        }

        self.cache
            .incr(&CacheKey::api_key_usage_total(key_id), None)
            .await?;
        self.cache
            .incr(
                &CacheKey::api_key_usage_period(key_id, &month_label(now)),
                Some(Duration::from_secs(USAGE_PERIOD_TTL_SECS)),
            )
            .await?;
        self.cache
            .set(
                &CacheKey::api_key_last_used(key_id),
                &now.timestamp_millis(),
                None,
            )
            .await?;
        Ok(())
    }

    /// Fire-and-forget [`ApiKeyManager::record_usage`]
    pub fn record_usage_in_background(self: &Arc<Self>, key_id: &str) {
        let manager = Arc::clone(self);
        let key_id = key_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = manager.record_usage(&key_id).await {
                tracing::warn!(%key_id, error = %e, "Failed to record API key usage");
            }
        });
    }

    /// Whether the record's expiry has passed
    pub fn is_expired(&self, record: &ApiKeyRecord) -> bool {
        record.is_expired_at(Utc::now())
    }

    // ------------------------------------------------------------------------
    // Store access
    // ------------------------------------------------------------------------

    async fn load(&self, key_id: &str) -> Result<Option<ApiKeyRecord>, CacheError> {
        self.cache
            .get::<StoredApiKey>(&CacheKey::api_key(key_id))
            .await?
            .map(ApiKeyRecord::try_from)
            .transpose()
    }

    /// Fold the usage counters into a record for display
    async fn with_usage(&self, record: ApiKeyRecord) -> Result<ApiKeyRecord, CacheError> {
        self.with_usage_at(record, Utc::now()).await
    }

    async fn with_usage_at(
        &self,
        mut record: ApiKeyRecord,
        now: DateTime<Utc>,
    ) -> Result<ApiKeyRecord, CacheError> {
        let key_id = record.key_id.clone();
        let total = self
            .cache
            .get_counter(&CacheKey::api_key_usage_total(&key_id))
            .await?;
        let period_count = self
            .cache
            .get_counter(&CacheKey::api_key_usage_period(&key_id, &month_label(now)))
            .await?;
        let last_used = self
            .cache
            .get::<i64>(&CacheKey::api_key_last_used(&key_id))
            .await?;

        record.usage = Usage {
            total: total.map_or(record.usage.total, |n| n.max(0) as u64),
            period_start: month_start(now),
            period_count: period_count.map_or(0, |n| n.max(0) as u64),
        };
        if let Some(ms) = last_used {
            record.last_used_at = DateTime::from_timestamp_millis(ms).or(record.last_used_at);
        }
        Ok(record)
    }

    async fn require(&self, key_id: &str) -> Result<ApiKeyRecord, ApiKeyError> {
        self.load(key_id)
            .await?
            .ok_or_else(|| ApiKeyError::NotFound(key_id.to_string()))
    }

    async fn save(&self, record: &ApiKeyRecord) -> Result<(), CacheError> {
        let stored = StoredApiKey::try_from(record)?;
        self.cache
            .set(&CacheKey::api_key(&record.key_id), &stored, None)
            .await
    }

    async fn move_status(
        &self,
        key_id: &str,
        from: KeyStatus,
        to: KeyStatus,
    ) -> Result<(), CacheError> {
        self.cache
            .set_remove(&CacheKey::api_keys_by_status(from.as_str()), key_id)
            .await?;
        self.cache
            .set_add(&CacheKey::api_keys_by_status(to.as_str()), key_id)
            .await
    }

    /// Move an active key past its expiry to `expired`
    ///
    /// Re-reads the record first and leaves it alone if its status changed in
    /// the meantime, so a lazy expiry never overwrites a revocation.
    async fn mark_expired(&self, record: ApiKeyRecord) -> Result<ApiKeyRecord, CacheError> {
        let Some(mut record) = self.load(&record.key_id).await? else {
            return Ok(record);
        };
        if record.status != KeyStatus::Active {
            return Ok(record);
        }
        record.status = KeyStatus::Expired;
        self.save(&record).await?;
        self.move_status(&record.key_id, KeyStatus::Active, KeyStatus::Expired)
            .await?;
        tracing::info!(key_id = %record.key_id, "API key expired");
        Ok(record)
    }
}

/// `base + lifetime` for a duration like `30d`, or `None` when the input is
/// unparsable or the result falls outside the representable range
fn expiry_after(base: DateTime<Utc>, lifetime: &str) -> Option<DateTime<Utc>> {
    let lifetime = chrono::Duration::from_std(parse_expires_in(lifetime)?).ok()?;
    base.checked_add_signed(lifetime)
}

impl TokenSubject {
    /// Identity carried by tokens minted for a key
    pub fn from_record(record: &ApiKeyRecord, email: Option<String>) -> Self {
        Self {
            user_id: record.created_by.clone(),
            email,
            api_key_ref: record.key_id.clone(),
            plan: record.plan.clone(),
            permissions: record.permissions.iter().cloned().collect(),
            rate_limit: record.rate_limit.clone(),
        }
    }
}

#[async_trait]
impl PrincipalSource for ApiKeyManager {
    async fn current_subject(&self, api_key_ref: &str) -> Result<Option<TokenSubject>, CacheError> {
        let Some(record) = self.load(api_key_ref).await? else {
            return Ok(None);
        };
        if record.status != KeyStatus::Active || self.is_expired(&record) {
            return Ok(None);
        }
        Ok(Some(TokenSubject::from_record(&record, None)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::cache::testing::{memory_cache, slow_counter_cache};
    use chrono::TimeZone;

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    async fn manager() -> ApiKeyManager {
        ApiKeyManager::new(
            memory_cache().await,
            ApiKeyHasher::new(SECRET).unwrap(),
            RateLimitSpec::new(100, "1m"),
        )
    }

    fn params() -> CreateApiKey {
        CreateApiKey {
            created_by: "user-42".to_string(),
            ..CreateApiKey::default()
        }
    }

    #[tokio::test]
    async fn test_create_applies_defaults_and_masks() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();

        assert!(is_valid_api_key(&created.api_key));
        let record = &created.record;
        assert_eq!(record.key_id, key_id_for(&created.api_key));
        assert_eq!(record.prefix, key_prefix(&created.api_key));
        assert_eq!(record.plan, "free");
        assert_eq!(record.permissions, BTreeSet::from(["read".to_string()]));
        assert_eq!(record.rate_limit, RateLimitSpec::new(100, "1m"));
        assert_eq!(record.status, KeyStatus::Active);
        assert!(record.expires_at.is_none());
        assert_eq!(record.usage.total, 0);

        // Masked: 8 visible chars + ellipsis, never the full hash
        assert_eq!(record.hashed_key.chars().count(), 9);
        assert!(record.hashed_key.ends_with('…'));
    }

    #[tokio::test]
    async fn test_created_key_resolves_with_full_hash() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();

        let found = manager
            .find_by_api_key(&created.api_key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.key_id, created.record.key_id);
        assert_eq!(found.hashed_key, manager.hasher.hash(&created.api_key));
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_keys_resolve_to_none() {
        let manager = manager().await;
        let (unused, _) = manager.generate_key();

        assert!(manager.find_by_api_key(&unused.plaintext).await.unwrap().is_none());
        assert!(manager.find_by_api_key("not-a-key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoked_key_resolves_to_none() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();

        let revoked = manager.revoke(&created.record.key_id).await.unwrap();
        assert_eq!(revoked.status, KeyStatus::Revoked);
        assert!(manager.find_by_api_key(&created.api_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let key_id = &created.record.key_id;

        manager.revoke(key_id).await.unwrap();
        let again = manager.revoke(key_id).await.unwrap();
        assert_eq!(again.status, KeyStatus::Revoked);

        let revoked = manager.list(Some(KeyStatus::Revoked)).await.unwrap();
        assert_eq!(revoked.len(), 1);
        assert!(manager.list(Some(KeyStatus::Active)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_not_found() {
        let manager = manager().await;
        let err = manager.revoke("key_doesnotexist00").await.unwrap_err();
        assert!(matches!(err, ApiKeyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_expired_key_is_marked_lazily() {
        let manager = manager().await;
        let created = manager
            .create(CreateApiKey {
                expires_in: Some("1d".to_string()),
                ..params()
            })
            .await
            .unwrap();
        let key_id = created.record.key_id.clone();

        // Backdate the expiry
        let mut record = manager.load(&key_id).await.unwrap().unwrap();
        record.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        manager.save(&record).await.unwrap();

        assert!(manager.find_by_api_key(&created.api_key).await.unwrap().is_none());

        let stored = manager.get(&key_id).await.unwrap();
        assert_eq!(stored.status, KeyStatus::Expired);
        assert_eq!(manager.list(Some(KeyStatus::Expired)).await.unwrap().len(), 1);
        assert!(manager.list(Some(KeyStatus::Active)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unparsable_expires_in_means_no_expiry() {
        let manager = manager().await;
        let created = manager
            .create(CreateApiKey {
                expires_in: Some("soon".to_string()),
                ..params()
            })
            .await
            .unwrap();
        assert!(created.record.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_out_of_range_expires_in_means_no_expiry() {
        let manager = manager().await;
        let created = manager
            .create(CreateApiKey {
                expires_in: Some("100000000d".to_string()),
                ..params()
            })
            .await
            .unwrap();
        assert!(created.record.expires_at.is_none());
        assert_eq!(created.record.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn test_update_rejects_out_of_range_extension() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let err = manager
            .update(
                &created.record.key_id,
                ApiKeyUpdate {
                    extend_expires_in: Some("100000000d".to_string()),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiKeyError::InvalidDuration(_)));

        let unchanged = manager.get(&created.record.key_id).await.unwrap();
        assert!(unchanged.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let manager = manager().await;
        let first = manager.create(params()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = manager.create(params()).await.unwrap();

        let all = manager.list(None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.key_id.as_str()).collect();
        assert_eq!(ids, vec![second.record.key_id.as_str(), first.record.key_id.as_str()]);
        assert!(all.iter().all(|r| r.hashed_key.ends_with('…')));
    }

    #[tokio::test]
    async fn test_update_fields_and_extend_expiry() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let key_id = &created.record.key_id;

        let before = Utc::now();
        let updated = manager
            .update(
                key_id,
                ApiKeyUpdate {
                    plan: Some("pro".to_string()),
                    permissions: Some(vec!["read".to_string(), "write".to_string()]),
                    rate_limit: Some(RateLimitSpec::new(1000, "1h")),
                    extend_expires_in: Some("7d".to_string()),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.plan, "pro");
        assert!(updated.permissions.contains("write"));
        assert_eq!(updated.rate_limit.window, "1h");
        let expires = updated.expires_at.unwrap();
        assert!(expires >= before + chrono::Duration::days(7));

        // Extending again adds to the existing expiry
        let extended = manager
            .update(
                key_id,
                ApiKeyUpdate {
                    extend_expires_in: Some("1d".to_string()),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(extended.expires_at.unwrap(), expires + chrono::Duration::days(1));
    }

    #[tokio::test]
    async fn test_update_rejects_reverse_transition() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let key_id = &created.record.key_id;

        manager.revoke(key_id).await.unwrap();
        let err = manager
            .update(
                key_id,
                ApiKeyUpdate {
                    status: Some(KeyStatus::Active),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiKeyError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_update_status_moves_set_membership() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();

        manager
            .update(
                &created.record.key_id,
                ApiKeyUpdate {
                    status: Some(KeyStatus::Expired),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(manager.list(Some(KeyStatus::Expired)).await.unwrap().len(), 1);
        assert!(manager.list(Some(KeyStatus::Active)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_rejects_bad_extension() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let err = manager
            .update(
                &created.record.key_id,
                ApiKeyUpdate {
                    extend_expires_in: Some("a while".to_string()),
                    ..ApiKeyUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiKeyError::InvalidDuration(_)));
    }

    #[tokio::test]
    async fn test_record_usage_resets_on_new_month() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let key_id = &created.record.key_id;

        let march = Utc.with_ymd_and_hms(2026, 3, 30, 12, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2026, 4, 2, 8, 0, 0).unwrap();

        manager.record_usage_at(key_id, march).await.unwrap();
        manager.record_usage_at(key_id, march).await.unwrap();
        manager.record_usage_at(key_id, april).await.unwrap();

        let stored = manager.load(key_id).await.unwrap().unwrap();
        assert_eq!(stored.usage.total, 0);

        let in_april = manager.with_usage_at(stored.clone(), april).await.unwrap();
        assert_eq!(in_april.usage.total, 3);
        assert_eq!(in_april.usage.period_count, 1);
        assert_eq!(
            in_april.usage.period_start,
            Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(in_april.last_used_at, Some(april));

        let in_march = manager.with_usage_at(stored, march).await.unwrap();
        assert_eq!(in_march.usage.period_count, 2);
    }

    #[tokio::test]
    async fn test_record_usage_unknown_key_is_not_found() {
        let manager = manager().await;
        let err = manager.record_usage("key_0000000000000000").await.unwrap_err();
        assert!(matches!(err, ApiKeyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_usage_does_not_undo_concurrent_revoke() {
        let manager = Arc::new(ApiKeyManager::new(
            slow_counter_cache(Duration::from_millis(30)),
            ApiKeyHasher::new(SECRET).unwrap(),
            RateLimitSpec::new(100, "1m"),
        ));
        let created = manager.create(params()).await.unwrap();
        let key_id = created.record.key_id.clone();

        // Usage is counted while the revoke lands
        let usage = {
            let manager = Arc::clone(&manager);
            let key_id = key_id.clone();
            tokio::spawn(async move { manager.record_usage(&key_id).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.revoke(&key_id).await.unwrap();
        usage.await.unwrap().unwrap();

        let record = manager.get(&key_id).await.unwrap();
        assert_eq!(record.status, KeyStatus::Revoked);
        assert_eq!(record.usage.total, 1);
        assert!(record.last_used_at.is_some());
        assert!(manager.find_by_api_key(&created.api_key).await.unwrap().is_none());
        assert_eq!(manager.list(Some(KeyStatus::Revoked)).await.unwrap().len(), 1);
        assert!(manager.list(Some(KeyStatus::Active)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lazy_expiry_keeps_revocation() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let key_id = created.record.key_id.clone();

        let stale = manager.load(&key_id).await.unwrap().unwrap();
        manager.revoke(&key_id).await.unwrap();

        let result = manager.mark_expired(stale).await.unwrap();
        assert_eq!(result.status, KeyStatus::Revoked);
        assert_eq!(manager.get(&key_id).await.unwrap().status, KeyStatus::Revoked);
        assert!(manager.list(Some(KeyStatus::Expired)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_principal_source_only_serves_active_keys() {
        let manager = manager().await;
        let created = manager.create(params()).await.unwrap();
        let key_id = created.record.key_id.clone();

        let subject = manager.current_subject(&key_id).await.unwrap().unwrap();
        assert_eq!(subject.user_id, "user-42");
        assert_eq!(subject.api_key_ref, key_id);
        assert_eq!(subject.permissions, vec!["read".to_string()]);

        manager.revoke(&key_id).await.unwrap();
        assert!(manager.current_subject(&key_id).await.unwrap().is_none());
        assert!(manager.current_subject("key_missing").await.unwrap().is_none());
    }

    #[test]
    fn test_generated_key_debug_hides_plaintext() {
        let key = GeneratedKey::new();
        assert!(!format!("{:?}", key).contains(&key.plaintext));
    }
}
