//! Token endpoints: rotation and revocation

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use crate::api::auth::{AuthError, request_id_from};
use crate::api::extractors::ValidatedJson;
use crate::domain::{TokenError, TokenIssuer, TokenPair};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "refreshToken cannot be empty"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RevokeRequest {
    #[validate(length(min = 1, message = "token cannot be empty"))]
    pub token: String,
}

/// Create token routes
pub fn routes(tokens: Arc<TokenIssuer>) -> Router {
    Router::new()
        .route("/refresh", post(refresh))
        .route("/revoke", post(revoke))
        .with_state(tokens)
}

fn token_error(e: TokenError, request_id: String) -> AuthError {
    let err = match e {
        TokenError::Expired => AuthError::expired(),
        TokenError::Revoked => AuthError::revoked(),
        TokenError::SubjectInactive => AuthError::revoked(),
        TokenError::Invalid(reason) => {
            tracing::debug!(%request_id, %reason, "Token rejected");
            AuthError::invalid("invalid_token")
        }
        TokenError::Signing(_) | TokenError::Store(_) => {
            tracing::error!(%request_id, error = %e, "Token operation failed");
            AuthError::internal()
        }
    };
    err.with_request_id(request_id)
}

/// Exchange a refresh token for a new pair
///
/// The refresh token is single use; the new access token carries the API
/// key's current entitlements.
#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired, revoked or already used"),
        (status = 500, description = "Key store unavailable")
    )
)]
pub async fn refresh(
    State(tokens): State<Arc<TokenIssuer>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    let request_id = request_id_from(&headers);
    let pair = tokens
        .refresh_access_token(&req.refresh_token)
        .await
        .map_err(|e| token_error(e, request_id))?;
    Ok(Json(pair))
}

/// Revoke an access or refresh token until it would have expired
#[utoipa::path(
    post,
    path = "/api/v1/auth/revoke",
    tag = "auth",
    request_body = RevokeRequest,
    responses(
        (status = 204, description = "Token revoked (or already expired)"),
        (status = 401, description = "Token is not a well-formed JWT"),
        (status = 500, description = "Key store unavailable")
    )
)]
pub async fn revoke(
    State(tokens): State<Arc<TokenIssuer>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<RevokeRequest>,
) -> Result<StatusCode, AuthError> {
    let request_id = request_id_from(&headers);
    tokens
        .revoke_token(&req.token)
        .await
        .map_err(|e| token_error(e, request_id))?;
    Ok(StatusCode::NO_CONTENT)
}
