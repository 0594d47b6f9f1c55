//! Authenticated request context and per-route requirements

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Serialize;
use utoipa::ToSchema;

use super::error::{AuthError, request_id_from};
use crate::data::cache::RateLimitResult;
use crate::data::types::{Principal, RateLimitSpec};

/// Result of gateway authentication, stored in request extensions
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthContext {
    pub request_id: String,
    pub principal: Principal,
    /// Authenticated by a legacy API key rather than a bearer token
    pub is_legacy_auth: bool,
    /// Quota state after this request; absent when limiting is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitResult>,
}

impl AuthContext {
    pub fn is_guest(&self) -> bool {
        self.principal.user_id == crate::core::constants::GUEST_USER_ID
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<AuthContext>().cloned().ok_or_else(|| {
            tracing::error!("AuthContext requested on a route without the gateway layer");
            AuthError::internal().with_request_id(request_id_from(&parts.headers))
        })
    }
}

/// What a route demands of its caller
#[derive(Debug, Clone, Default)]
pub struct AuthRequirements {
    /// Reject unauthenticated callers instead of treating them as guests
    pub require_auth: bool,
    /// Any one of these grants access; empty means no check
    pub permissions: Vec<String>,
    /// Overrides the principal's own quota
    pub custom_rate_limit: Option<RateLimitSpec>,
}

impl AuthRequirements {
    pub fn required() -> Self {
        Self {
            require_auth: true,
            ..Self::default()
        }
    }

    pub fn optional() -> Self {
        Self::default()
    }

    pub fn with_permissions(mut self, permissions: &[&str]) -> Self {
        self.permissions = permissions.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn with_rate_limit(mut self, spec: RateLimitSpec) -> Self {
        self.custom_rate_limit = Some(spec);
        self
    }
}
