//! Gateway authentication errors

use axum::Json;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::rate_limit::add_rate_limit_headers;
use crate::data::cache::RateLimitResult;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    CredentialMissing,
    CredentialInvalid,
    CredentialExpired,
    CredentialRevoked,
    InsufficientPermissions,
    RateLimitExceeded,
    InternalAuthError,
}

impl AuthErrorKind {
    /// Wire code; missing and invalid credentials share one
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialMissing | Self::CredentialInvalid => "credential_missing_or_invalid",
            Self::CredentialExpired => "credential_expired",
            Self::CredentialRevoked => "credential_revoked",
            Self::InsufficientPermissions => "insufficient_permissions",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::InternalAuthError => "internal_auth_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::CredentialMissing
            | Self::CredentialInvalid
            | Self::CredentialExpired
            | Self::CredentialRevoked => StatusCode::UNAUTHORIZED,
            Self::InsufficientPermissions => StatusCode::FORBIDDEN,
            Self::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            Self::InternalAuthError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error body returned by the gateway
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub request_id: String,
    /// RFC 3339
    pub timestamp: String,
}

/// Authentication/authorization failure at the gateway boundary
#[derive(Debug)]
pub struct AuthError {
    pub kind: AuthErrorKind,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: Option<String>,
    pub rate_limit: Option<RateLimitResult>,
}

impl AuthError {
    fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
            request_id: None,
            rate_limit: None,
        }
    }

    pub fn missing() -> Self {
        Self {
            details: Some(json!({ "reason": "missing" })),
            ..Self::new(AuthErrorKind::CredentialMissing, "Authentication required")
        }
    }

    pub fn invalid(reason: &str) -> Self {
        Self {
            details: Some(json!({ "reason": reason })),
            ..Self::new(AuthErrorKind::CredentialInvalid, "Invalid credential")
        }
    }

    pub fn expired() -> Self {
        Self::new(AuthErrorKind::CredentialExpired, "Credential has expired")
    }

    pub fn revoked() -> Self {
        Self::new(AuthErrorKind::CredentialRevoked, "Credential has been revoked")
    }

    pub fn insufficient_permissions(required: &[String]) -> Self {
        Self {
            details: Some(json!({ "required": required })),
            ..Self::new(
                AuthErrorKind::InsufficientPermissions,
                "Credential lacks a required permission",
            )
        }
    }

    pub fn rate_limited(result: RateLimitResult) -> Self {
        Self {
            details: Some(json!({
                "limit": result.limit,
                "resetAt": result.reset_at,
            })),
            rate_limit: Some(result),
            ..Self::new(AuthErrorKind::RateLimitExceeded, "Rate limit exceeded")
        }
    }

    pub fn internal() -> Self {
        Self::new(
            AuthErrorKind::InternalAuthError,
            "Authentication is temporarily unavailable",
        )
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let request_id = self
            .request_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let body = AuthErrorBody {
            code: self.kind.code().to_string(),
            message: self.message,
            details: self.details,
            request_id: request_id.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };

        let mut response = (self.kind.status(), Json(body)).into_response();
        let headers = response.headers_mut();
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, v);
        }
        if let Some(result) = &self.rate_limit {
            add_rate_limit_headers(headers, result);
        }
        response
    }
}

/// Caller-supplied `X-Request-Id`, or a fresh UUID v4
pub fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty() && s.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}
