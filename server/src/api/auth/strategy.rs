//! Credential strategies, tried in order by the resolver

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Query;
use axum::http::request::Parts;
use axum::http::{HeaderName, header};
use chrono::Utc;

use super::error::AuthError;
use crate::core::config::AuthConfig;
use crate::core::constants::LEGACY_QUERY_PARAM;
use crate::data::cache::CacheError;
use crate::data::types::{ApiKeyRecord, Principal};
use crate::domain::{ApiKeyManager, TokenIssuer, VerifyOutcome};
use crate::utils::api_key::{extract_legacy_key, key_prefix};

/// What a strategy made of the request
#[derive(Debug)]
pub enum StrategyOutcome {
    /// The request carries no credential of this kind
    NotPresent,
    /// A credential was found and refused
    Rejected(AuthError),
    Authenticated {
        principal: Principal,
        is_legacy_auth: bool,
    },
}

#[async_trait]
pub trait CredentialStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Store failures are returned as errors and must not be read as a rejection
    async fn authenticate(&self, parts: &Parts) -> Result<StrategyOutcome, CacheError>;
}

// ============================================================================
// Bearer tokens
// ============================================================================

pub struct BearerStrategy {
    tokens: Arc<TokenIssuer>,
}

impl BearerStrategy {
    pub fn new(tokens: Arc<TokenIssuer>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl CredentialStrategy for BearerStrategy {
    fn name(&self) -> &'static str {
        "bearer"
    }

    async fn authenticate(&self, parts: &Parts) -> Result<StrategyOutcome, CacheError> {
        let Some(token) = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
        else {
            return Ok(StrategyOutcome::NotPresent);
        };

        if token.is_empty() {
            return Ok(StrategyOutcome::Rejected(AuthError::invalid("empty_bearer_token")));
        }

        Ok(match self.tokens.verify_token(token).await? {
            VerifyOutcome::Valid(claims) => StrategyOutcome::Authenticated {
                principal: Principal::from(*claims),
                is_legacy_auth: false,
            },
            VerifyOutcome::Expired => StrategyOutcome::Rejected(AuthError::expired()),
            VerifyOutcome::Revoked => StrategyOutcome::Rejected(AuthError::revoked()),
            VerifyOutcome::Invalid => {
                StrategyOutcome::Rejected(AuthError::invalid("invalid_bearer_token"))
            }
        })
    }
}

// ============================================================================
// Legacy API keys
// ============================================================================

/// Looks for a key in the dedicated header, then the query string (when
/// enabled), then a raw `Authorization` value
pub struct LegacyKeyStrategy {
    keys: Arc<ApiKeyManager>,
    header: HeaderName,
    allow_query_key: bool,
    context_ttl_secs: i64,
    issuer: String,
    audience: String,
}

impl LegacyKeyStrategy {
    pub fn new(keys: Arc<ApiKeyManager>, config: &AuthConfig) -> anyhow::Result<Self> {
        let header = HeaderName::from_bytes(config.legacy_header.as_bytes())
            .map_err(|e| anyhow::anyhow!("Invalid legacy header '{}': {}", config.legacy_header, e))?;
        Ok(Self {
            keys,
            header,
            allow_query_key: config.allow_query_key,
            context_ttl_secs: config.legacy_context_ttl_secs as i64,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }

    fn candidate(&self, parts: &Parts) -> Option<String> {
        if let Some(key) = parts
            .headers
            .get(&self.header)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Some(key.to_string());
        }

        if self.allow_query_key {
            let from_query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(mut params)| params.remove(LEGACY_QUERY_PARAM))
                .filter(|v| !v.is_empty());
            if from_query.is_some() {
                return from_query;
            }
        }

        parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(extract_legacy_key)
    }

    fn principal(&self, record: &ApiKeyRecord) -> Principal {
        let now = Utc::now().timestamp();
        Principal {
            user_id: record.created_by.clone(),
            email: None,
            api_key_ref: record.key_id.clone(),
            plan: record.plan.clone(),
            rate_limit: record.rate_limit.clone(),
            permissions: record.permissions.iter().cloned().collect(),
            issued_at: now,
            expires_at: now + self.context_ttl_secs,
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        }
    }
}

#[async_trait]
impl CredentialStrategy for LegacyKeyStrategy {
    fn name(&self) -> &'static str {
        "legacy_api_key"
    }

    async fn authenticate(&self, parts: &Parts) -> Result<StrategyOutcome, CacheError> {
        let Some(key) = self.candidate(parts) else {
            return Ok(StrategyOutcome::NotPresent);
        };

        let Some(record) = self.keys.find_by_api_key(&key).await? else {
            tracing::debug!(key_prefix = %key_prefix(&key), "Legacy key rejected");
            return Ok(StrategyOutcome::Rejected(AuthError::invalid(
                "unknown_or_inactive_api_key",
            )));
        };

        self.keys.record_usage_in_background(&record.key_id);

        Ok(StrategyOutcome::Authenticated {
            principal: self.principal(&record),
            is_legacy_auth: true,
        })
    }
}
