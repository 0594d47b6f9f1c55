//! Admin API key types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::data::cache::WindowSpec;
use crate::data::types::{ApiKeyRecord, KeyStatus, RateLimitSpec, Usage};
use crate::domain::{ApiKeyUpdate, CreateApiKey};

fn validate_rate_limit(spec: &RateLimitSpec) -> Result<(), ValidationError> {
    if spec.requests == 0 {
        return Err(ValidationError::new("rate_limit_requests")
            .with_message("rate_limit.requests must be at least 1".into()));
    }
    if WindowSpec::parse(spec.requests, &spec.window).is_none() {
        return Err(ValidationError::new("rate_limit_window").with_message(
            format!(
                "rate_limit.window '{}' is invalid, expected e.g. 30s, 1m, 1h, 1d",
                spec.window
            )
            .into(),
        ));
    }
    Ok(())
}

fn validate_permissions(permissions: &[String]) -> Result<(), ValidationError> {
    if permissions.iter().any(|p| p.trim().is_empty()) {
        return Err(ValidationError::new("permissions_empty")
            .with_message("permissions cannot contain empty entries".into()));
    }
    Ok(())
}

/// Request body for creating an API key
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateApiKeyRequest {
    /// Owner of the key (1-128 characters); principals from this key use it as user id
    #[validate(length(min = 1, max = 128, message = "created_by must be 1-128 characters"))]
    pub created_by: String,

    /// Plan name (default: free)
    #[validate(length(min = 1, max = 64, message = "plan must be 1-64 characters"))]
    pub plan: Option<String>,

    /// Granted permissions (default: ["read"])
    #[validate(custom(function = "validate_permissions"))]
    pub permissions: Option<Vec<String>>,

    /// Quota (default: server default quota)
    #[validate(custom(function = "validate_rate_limit"))]
    pub rate_limit: Option<RateLimitSpec>,

    /// Lifetime like `30d`; omitted or unparsable means no expiry
    pub expires_in: Option<String>,

    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

impl From<CreateApiKeyRequest> for CreateApiKey {
    fn from(req: CreateApiKeyRequest) -> Self {
        Self {
            plan: req.plan,
            permissions: req.permissions,
            rate_limit: req.rate_limit,
            expires_in: req.expires_in,
            description: req.description,
            metadata: req.metadata,
            created_by: req.created_by,
        }
    }
}

/// Request body for updating an API key; omitted fields are unchanged
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct UpdateApiKeyRequest {
    #[validate(length(min = 1, max = 64, message = "plan must be 1-64 characters"))]
    pub plan: Option<String>,

    #[validate(custom(function = "validate_permissions"))]
    pub permissions: Option<Vec<String>>,

    #[validate(custom(function = "validate_rate_limit"))]
    pub rate_limit: Option<RateLimitSpec>,

    /// Only `active` keys may change status
    pub status: Option<KeyStatus>,

    #[validate(length(max = 500, message = "description must be at most 500 characters"))]
    pub description: Option<String>,

    pub metadata: Option<serde_json::Value>,

    /// Added to the current expiry (or to now when the key never expires)
    pub extend_expires_in: Option<String>,
}

impl From<UpdateApiKeyRequest> for ApiKeyUpdate {
    fn from(req: UpdateApiKeyRequest) -> Self {
        Self {
            plan: req.plan,
            permissions: req.permissions,
            rate_limit: req.rate_limit,
            status: req.status,
            description: req.description,
            metadata: req.metadata,
            extend_expires_in: req.extend_expires_in,
        }
    }
}

/// Query params for listing keys
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ListApiKeysQuery {
    /// Only keys in this status
    pub status: Option<KeyStatus>,
}

/// Request body for minting tokens on behalf of a key
#[derive(Debug, Default, Deserialize, Validate, ToSchema)]
pub struct IssueTokensRequest {
    /// Email claim to embed in the tokens
    #[validate(email(message = "email must be a valid address"))]
    pub email: Option<String>,
}

/// API key as returned by the admin API (hash masked, no plaintext)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiKeyDto {
    pub key_id: String,
    pub prefix: String,
    /// Truncated keyed hash
    pub hashed_key: String,
    pub status: KeyStatus,
    pub plan: String,
    pub permissions: Vec<String>,
    pub rate_limit: RateLimitSpec,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub usage: Usage,
    pub last_used_at: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl From<ApiKeyRecord> for ApiKeyDto {
    fn from(record: ApiKeyRecord) -> Self {
        Self {
            key_id: record.key_id,
            prefix: record.prefix,
            hashed_key: record.hashed_key,
            status: record.status,
            plan: record.plan,
            permissions: record.permissions.into_iter().collect(),
            rate_limit: record.rate_limit,
            created_at: record.created_at,
            created_by: record.created_by,
            expires_at: record.expires_at,
            usage: record.usage,
            last_used_at: record.last_used_at,
            description: record.description,
            metadata: record.metadata,
        }
    }
}

/// Response when creating an API key (includes the plaintext, shown only once)
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateApiKeyResponse {
    /// Full API key, never stored and never shown again
    pub api_key: String,
    pub key: ApiKeyDto,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_validation() {
        let req: CreateApiKeyRequest = serde_json::from_value(serde_json::json!({
            "created_by": "owner-1",
            "rate_limit": { "requests": 10, "window": "1h" },
            "permissions": ["read", "write"]
        }))
        .unwrap();
        assert!(req.validate().is_ok());

        let req: CreateApiKeyRequest = serde_json::from_value(serde_json::json!({
            "created_by": "owner-1",
            "rate_limit": { "requests": 10, "window": "forever" }
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateApiKeyRequest = serde_json::from_value(serde_json::json!({
            "created_by": "",
        }))
        .unwrap();
        assert!(req.validate().is_err());

        let req: CreateApiKeyRequest = serde_json::from_value(serde_json::json!({
            "created_by": "owner-1",
            "permissions": ["read", " "]
        }))
        .unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_update_request_status_parses_lowercase() {
        let req: UpdateApiKeyRequest =
            serde_json::from_value(serde_json::json!({ "status": "revoked" })).unwrap();
        assert_eq!(req.status, Some(KeyStatus::Revoked));
        let update = ApiKeyUpdate::from(req);
        assert_eq!(update.status, Some(KeyStatus::Revoked));
        assert!(update.plan.is_none());
    }
}
