//! Request authentication: credentials, permissions, quota

use std::sync::Arc;

use axum::http::request::Parts;
use chrono::Utc;

use super::context::{AuthContext, AuthRequirements};
use super::error::{AuthError, request_id_from};
use super::strategy::{CredentialStrategy, StrategyOutcome};
use crate::api::rate_limit::client_ip;
use crate::core::config::AuthConfig;
use crate::core::constants::{DEFAULT_PERMISSION, GUEST_API_KEY_REF, GUEST_PLAN, GUEST_USER_ID};
use crate::data::cache::RateLimiter;
use crate::data::types::{Principal, RateLimitSpec};

pub struct AuthResolver {
    strategies: Vec<Arc<dyn CredentialStrategy>>,
    /// `None` disables quota enforcement
    limiter: Option<Arc<RateLimiter>>,
    guest_limit: RateLimitSpec,
    guest_ttl_secs: i64,
    issuer: String,
    audience: String,
}

impl AuthResolver {
    pub fn new(
        strategies: Vec<Arc<dyn CredentialStrategy>>,
        limiter: Option<Arc<RateLimiter>>,
        guest_limit: RateLimitSpec,
        config: &AuthConfig,
    ) -> Self {
        Self {
            strategies,
            limiter,
            guest_limit,
            guest_ttl_secs: config.legacy_context_ttl_secs as i64,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        }
    }

    /// Authenticate a request against `requirements`
    ///
    /// Strategies run in order and the first success wins. If none succeeds
    /// and the route requires authentication, a credential that was presented
    /// and refused is reported in preference to "missing". Otherwise the caller
    /// becomes a guest. Store failures are errors either way.
    pub async fn authenticate(
        &self,
        parts: &Parts,
        requirements: &AuthRequirements,
    ) -> Result<AuthContext, AuthError> {
        let request_id = request_id_from(&parts.headers);

        let mut rejection: Option<AuthError> = None;
        let mut authenticated = None;
        for strategy in &self.strategies {
            match strategy.authenticate(parts).await {
                Ok(StrategyOutcome::Authenticated {
                    principal,
                    is_legacy_auth,
                }) => {
                    authenticated = Some((principal, is_legacy_auth));
                    break;
                }
                Ok(StrategyOutcome::Rejected(err)) => {
                    tracing::debug!(
                        %request_id,
                        strategy = strategy.name(),
                        code = err.kind.code(),
                        "Credential rejected"
                    );
                    rejection.get_or_insert(err);
                }
                Ok(StrategyOutcome::NotPresent) => {}
                Err(e) => {
                    tracing::error!(
                        %request_id,
                        strategy = strategy.name(),
                        error = %e,
                        "Credential lookup failed"
                    );
                    return Err(AuthError::internal().with_request_id(request_id));
                }
            }
        }

        let (principal, is_legacy_auth, quota_key) = match (authenticated, rejection) {
            (Some((principal, is_legacy_auth)), _) => {
                let key = format!("key:{}", principal.api_key_ref);
                (principal, is_legacy_auth, key)
            }
            (None, Some(err)) if requirements.require_auth => {
                return Err(err.with_request_id(request_id));
            }
            (None, None) if requirements.require_auth => {
                return Err(AuthError::missing().with_request_id(request_id));
            }
            (None, rejection) => {
                if let Some(err) = rejection {
                    tracing::debug!(
                        %request_id,
                        code = err.kind.code(),
                        "Refused credential on optional route, continuing as guest"
                    );
                }
                let key = format!("ip:{}", client_ip(parts));
                (self.guest_principal(), false, key)
            }
        };

        if !principal.has_any_permission(&requirements.permissions) {
            tracing::debug!(
                %request_id,
                user_id = %principal.user_id,
                required = ?requirements.permissions,
                "Insufficient permissions"
            );
            return Err(
                AuthError::insufficient_permissions(&requirements.permissions)
                    .with_request_id(request_id),
            );
        }

        let rate_limit = match &self.limiter {
            Some(limiter) => {
                let spec = requirements
                    .custom_rate_limit
                    .as_ref()
                    .unwrap_or(&principal.rate_limit);
                let result = limiter.limit(&quota_key, spec).await.map_err(|e| {
                    tracing::error!(%request_id, error = %e, "Rate limit check failed");
                    AuthError::internal().with_request_id(request_id.clone())
                })?;
                if !result.allowed {
                    tracing::debug!(%request_id, %quota_key, "Quota exhausted");
                    return Err(AuthError::rate_limited(result).with_request_id(request_id));
                }
                Some(result)
            }
            None => None,
        };

        tracing::debug!(
            %request_id,
            user_id = %principal.user_id,
            is_legacy_auth,
            "Request authenticated"
        );

        Ok(AuthContext {
            request_id,
            principal,
            is_legacy_auth,
            rate_limit,
        })
    }

    fn guest_principal(&self) -> Principal {
        let now = Utc::now().timestamp();
        Principal {
            user_id: GUEST_USER_ID.to_string(),
            email: None,
            api_key_ref: GUEST_API_KEY_REF.to_string(),
            plan: GUEST_PLAN.to_string(),
            rate_limit: self.guest_limit.clone(),
            permissions: vec![DEFAULT_PERMISSION.to_string()],
            issued_at: now,
            expires_at: now + self.guest_ttl_secs,
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
        }
    }
}
