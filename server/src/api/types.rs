//! Shared API types
//!
//! Error responses for the admin and token endpoints. Gateway failures use
//! [`crate::api::auth::AuthError`] instead.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::domain::ApiKeyError;

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    BadRequest { code: String, message: String },
    NotFound { code: String, message: String },
    Conflict { code: String, message: String },
    ServiceUnavailable { message: String },
    Internal { message: String },
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotFound {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: message.into(),
        }
    }
}

impl From<ApiKeyError> for ApiError {
    fn from(e: ApiKeyError) -> Self {
        match e {
            ApiKeyError::NotFound(key_id) => {
                Self::not_found("KEY_NOT_FOUND", format!("API key not found: {}", key_id))
            }
            ApiKeyError::InvalidTransition { .. } => {
                Self::conflict("INVALID_STATUS_TRANSITION", e.to_string())
            }
            ApiKeyError::InvalidDuration(_) => Self::bad_request("INVALID_DURATION", e.to_string()),
            ApiKeyError::IdExhausted(_) => {
                tracing::error!(error = %e, "API key creation failed");
                Self::internal("Could not allocate an API key")
            }
            ApiKeyError::Store(e) => {
                tracing::error!(error = %e, "Key store error");
                Self::internal("Key store operation failed")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match self {
            Self::BadRequest { code, message } => {
                (StatusCode::BAD_REQUEST, "bad_request", code, message)
            }
            Self::NotFound { code, message } => (StatusCode::NOT_FOUND, "not_found", code, message),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, "conflict", code, message),
            Self::ServiceUnavailable { message } => (
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "SERVICE_UNAVAILABLE".to_string(),
                message,
            ),
            Self::Internal { message } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "INTERNAL".to_string(),
                message,
            ),
        };
        (
            status,
            Json(serde_json::json!({
                "error": error_type,
                "code": code,
                "message": message
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CacheError;
    use crate::data::types::KeyStatus;

    #[test]
    fn test_api_key_error_mapping() {
        let status = |e: ApiKeyError| ApiError::from(e).into_response().status();

        assert_eq!(
            status(ApiKeyError::NotFound("key_x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(ApiKeyError::InvalidTransition {
                from: KeyStatus::Revoked,
                to: KeyStatus::Active
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(ApiKeyError::InvalidDuration("soon".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ApiKeyError::Store(CacheError::Timeout {
                op: "get",
                timeout_ms: 500
            })),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
