//! Bearer token issuance, verification, rotation and revocation
//!
//! Access and refresh tokens are HS256 JWTs. Each refresh token has a
//! server-side record keyed by `(user_id, jti)`; rotation deletes that record
//! and only the caller whose delete removed it gets a new pair. Revoked
//! tokens are remembered by SHA-256 of their text until they would have
//! expired anyway.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::core::config::AuthConfig;
use crate::core::constants::{TOKEN_KIND_ACCESS, TOKEN_KIND_REFRESH, TOKEN_TYPE_BEARER};
use crate::data::cache::{CacheError, CacheKey, CacheService};
use crate::data::types::{Principal, RateLimitSpec};
use crate::utils::crypto::sha256_hex;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("Token has expired")]
    Expired,

    #[error("Token has been revoked")]
    Revoked,

    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("API key behind this token is no longer active")]
    SubjectInactive,

    #[error("Failed to sign token: {0}")]
    Signing(String),

    #[error(transparent)]
    Store(#[from] CacheError),
}

/// Identity and entitlements a token pair is minted for
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSubject {
    pub user_id: String,
    pub email: Option<String>,
    pub api_key_ref: String,
    pub plan: String,
    pub permissions: Vec<String>,
    pub rate_limit: RateLimitSpec,
}

/// Supplies the current entitlements behind an API key at refresh time
#[async_trait]
pub trait PrincipalSource: Send + Sync {
    /// `None` when the key is gone or no longer active
    async fn current_subject(&self, api_key_ref: &str) -> Result<Option<TokenSubject>, CacheError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub key_ref: String,
    pub plan: String,
    pub permissions: Vec<String>,
    pub rate_limit: RateLimitSpec,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

impl From<AccessClaims> for Principal {
    fn from(claims: AccessClaims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            api_key_ref: claims.key_ref,
            plan: claims.plan,
            rate_limit: claims.rate_limit,
            permissions: claims.permissions,
            issued_at: claims.iat,
            expires_at: claims.exp,
            issuer: claims.iss,
            audience: claims.aud,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

/// Expiry read without verifying the signature
#[derive(Debug, Deserialize)]
struct UnverifiedClaims {
    exp: i64,
}

/// Outstanding refresh token record
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RefreshRecord {
    api_key_ref: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    pub token_type: String,
}

/// Result of checking an access token
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyOutcome {
    Valid(Box<AccessClaims>),
    Expired,
    Revoked,
    Invalid,
}

pub struct TokenIssuer {
    cache: Arc<CacheService>,
    principals: Arc<dyn PrincipalSource>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenIssuer {
    pub fn new(
        cache: Arc<CacheService>,
        principals: Arc<dyn PrincipalSource>,
        signing_secret: &[u8],
        config: &AuthConfig,
    ) -> Self {
        Self {
            cache,
            principals,
            encoding_key: EncodingKey::from_secret(signing_secret),
            decoding_key: DecodingKey::from_secret(signing_secret),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_ttl: Duration::from_secs(config.access_ttl_secs),
            refresh_ttl: Duration::from_secs(config.refresh_ttl_secs),
        }
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Mint an access/refresh pair and record the refresh token
    pub async fn generate_tokens(&self, subject: TokenSubject) -> Result<TokenPair, TokenError> {
        let iat = Utc::now().timestamp();
        let access = AccessClaims {
            sub: subject.user_id.clone(),
            email: subject.email.clone(),
            key_ref: subject.api_key_ref.clone(),
            plan: subject.plan,
            permissions: subject.permissions,
            rate_limit: subject.rate_limit,
            token_type: TOKEN_KIND_ACCESS.to_string(),
            iat,
            exp: iat + self.access_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };
        let refresh = RefreshClaims {
            sub: subject.user_id.clone(),
            token_type: TOKEN_KIND_REFRESH.to_string(),
            iat,
            exp: iat + self.refresh_ttl.as_secs() as i64,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let access_token = self.sign(&access)?;
        let refresh_token = self.sign(&refresh)?;

        let record = RefreshRecord {
            api_key_ref: subject.api_key_ref,
            email: subject.email,
        };
        self.cache
            .set(
                &CacheKey::refresh_token(&refresh.sub, &refresh.jti),
                &record,
                Some(self.refresh_ttl),
            )
            .await?;

        tracing::debug!(
            user_id = %access.sub,
            key_ref = %record.api_key_ref,
            "Token pair issued"
        );

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_ttl.as_secs(),
            token_type: TOKEN_TYPE_BEARER.to_string(),
        })
    }

    /// Check an access token
    ///
    /// The blacklist is consulted first, but a revoked token past its own
    /// expiry still reports `Expired`. Store failures are returned as errors.
    pub async fn verify_token(&self, token: &str) -> Result<VerifyOutcome, CacheError> {
        let blacklisted = self
            .cache
            .exists(&CacheKey::token_blacklist(&sha256_hex(token)))
            .await?;
        if blacklisted {
            let expired = read_unverified(token)
                .map(|claims| claims.exp <= Utc::now().timestamp())
                .unwrap_or(false);
            return Ok(if expired {
                VerifyOutcome::Expired
            } else {
                VerifyOutcome::Revoked
            });
        }

        let claims = match decode::<AccessClaims>(token, &self.decoding_key, &self.validation()) {
            Ok(data) => data.claims,
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                return Ok(VerifyOutcome::Expired);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Access token rejected");
                return Ok(VerifyOutcome::Invalid);
            }
        };

        if claims.token_type != TOKEN_KIND_ACCESS {
            tracing::debug!(token_type = %claims.token_type, "Not an access token");
            return Ok(VerifyOutcome::Invalid);
        }

        Ok(VerifyOutcome::Valid(Box::new(claims)))
    }

    /// Exchange a refresh token for a fresh pair
    ///
    /// The refresh token is single use. Entitlements come from the API key as
    /// it is now, not as it was when the pair was minted.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        let claims = decode::<RefreshClaims>(refresh_token, &self.decoding_key, &self.validation())
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(e.to_string()),
            })?
            .claims;

        if claims.token_type != TOKEN_KIND_REFRESH {
            return Err(TokenError::Invalid("not a refresh token".to_string()));
        }

        let record_key = CacheKey::refresh_token(&claims.sub, &claims.jti);
        let Some(record) = self.cache.get::<RefreshRecord>(&record_key).await? else {
            tracing::debug!(user_id = %claims.sub, "Refresh token already used or revoked");
            return Err(TokenError::Revoked);
        };

        let Some(mut subject) = self.principals.current_subject(&record.api_key_ref).await? else {
            tracing::info!(user_id = %claims.sub, key_ref = %record.api_key_ref, "Refresh denied, key inactive");
            return Err(TokenError::SubjectInactive);
        };

        if !self.cache.delete(&record_key).await? {
            tracing::debug!(user_id = %claims.sub, "Lost refresh race");
            return Err(TokenError::Revoked);
        }

        subject.user_id = claims.sub;
        subject.email = record.email;
        self.generate_tokens(subject).await
    }

    /// Blacklist a token for the rest of its lifetime
    ///
    /// Already expired tokens are left alone. The marker never outlives the
    /// longest lifetime this issuer grants, whatever `exp` the token claims.
    /// Revoking a genuine refresh token also drops its record so it can no
    /// longer be rotated.
    pub async fn revoke_token(&self, token: &str) -> Result<(), TokenError> {
        let claims = read_unverified(token)
            .ok_or_else(|| TokenError::Invalid("malformed token".to_string()))?;

        let remaining = claims.exp - Utc::now().timestamp();
        if remaining <= 0 {
            tracing::debug!("Revoke of expired token ignored");
            return Ok(());
        }
        let ttl = Duration::from_secs(remaining as u64).min(self.access_ttl.max(self.refresh_ttl));

        self.cache
            .set(
                &CacheKey::token_blacklist(&sha256_hex(token)),
                &true,
                Some(ttl),
            )
            .await?;

        match decode::<RefreshClaims>(token, &self.decoding_key, &self.validation()) {
            Ok(data) if data.claims.token_type == TOKEN_KIND_REFRESH => {
                let refresh = data.claims;
                self.cache
                    .delete(&CacheKey::refresh_token(&refresh.sub, &refresh.jti))
                    .await?;
                tracing::info!(user_id = %refresh.sub, "Refresh token revoked");
            }
            _ => tracing::info!(ttl_secs = ttl.as_secs(), "Token revoked"),
        }
        Ok(())
    }
}

fn read_unverified(token: &str) -> Option<UnverifiedClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims::<&str>(&[]);

    decode::<UnverifiedClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}
