//! Authenticated principal

use serde::Serialize;
use utoipa::ToSchema;

use super::RateLimitSpec;

/// The caller a request was authenticated as
///
/// Built from verified bearer-token claims, from a legacy API key record, or
/// synthesized for guests. Timestamps are Unix seconds.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Key id the identity derives from
    pub api_key_ref: String,
    pub plan: String,
    pub rate_limit: RateLimitSpec,
    pub permissions: Vec<String>,
    pub issued_at: i64,
    pub expires_at: i64,
    pub issuer: String,
    pub audience: String,
}

impl Principal {
    /// Any-of check; an empty requirement always passes
    pub fn has_any_permission(&self, required: &[String]) -> bool {
        required.is_empty() || required.iter().any(|p| self.permissions.contains(p))
    }
}
