//! Admin API key endpoints
//!
//! Mounted under `/api/v1/admin/keys` behind the admin token:
//! - POST / - Create key (returns plaintext once)
//! - GET / - List keys (masked), optionally by `?status=`
//! - GET /{key_id} - Get key (masked)
//! - PATCH /{key_id} - Update key
//! - DELETE /{key_id} - Revoke key
//! - POST /{key_id}/tokens - Mint a token pair for the key

pub mod types;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::api::extractors::{KeyPath, ValidatedJson, ValidatedQuery};
use crate::api::types::ApiError;
use crate::domain::{ApiKeyManager, PrincipalSource, TokenError, TokenIssuer, TokenPair};

use types::{
    ApiKeyDto, CreateApiKeyRequest, CreateApiKeyResponse, IssueTokensRequest, ListApiKeysQuery,
    UpdateApiKeyRequest,
};

/// Shared state for the admin key endpoints
#[derive(Clone)]
pub struct ApiKeysState {
    pub keys: Arc<ApiKeyManager>,
    pub tokens: Arc<TokenIssuer>,
}

/// Build admin key routes
pub fn routes(keys: Arc<ApiKeyManager>, tokens: Arc<TokenIssuer>) -> Router<()> {
    let state = ApiKeysState { keys, tokens };

    Router::new()
        .route("/", get(list_api_keys).post(create_api_key))
        .route(
            "/{key_id}",
            get(get_api_key).patch(update_api_key).delete(revoke_api_key),
        )
        .route("/{key_id}/tokens", post(issue_tokens))
        .with_state(state)
}

/// Create a new API key
///
/// Returns the full plaintext key, shown only once.
#[utoipa::path(
    post,
    path = "/api/v1/admin/keys",
    tag = "api-keys",
    request_body = CreateApiKeyRequest,
    responses(
        (status = 201, body = CreateApiKeyResponse, description = "Key created"),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Missing or wrong admin token"),
        (status = 503, description = "Admin API disabled"),
    ),
    security(("admin" = [])),
)]
pub async fn create_api_key(
    State(state): State<ApiKeysState>,
    ValidatedJson(req): ValidatedJson<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ApiError> {
    let created = state.keys.create(req.into()).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            api_key: created.api_key,
            key: created.record.into(),
        }),
    ))
}

/// List API keys, newest first
#[utoipa::path(
    get,
    path = "/api/v1/admin/keys",
    tag = "api-keys",
    params(("status" = Option<String>, Query, description = "active, revoked or expired")),
    responses(
        (status = 200, body = Vec<ApiKeyDto>, description = "List of API keys"),
        (status = 400, description = "Unknown status"),
        (status = 401, description = "Missing or wrong admin token"),
    ),
    security(("admin" = [])),
)]
pub async fn list_api_keys(
    State(state): State<ApiKeysState>,
    ValidatedQuery(query): ValidatedQuery<ListApiKeysQuery>,
) -> Result<Json<Vec<ApiKeyDto>>, ApiError> {
    let keys = state.keys.list(query.status).await?;
    Ok(Json(keys.into_iter().map(ApiKeyDto::from).collect()))
}

/// Get one API key
#[utoipa::path(
    get,
    path = "/api/v1/admin/keys/{key_id}",
    tag = "api-keys",
    params(("key_id" = String, Path, description = "Key id")),
    responses(
        (status = 200, body = ApiKeyDto, description = "API key"),
        (status = 404, description = "Key not found"),
    ),
    security(("admin" = [])),
)]
pub async fn get_api_key(
    State(state): State<ApiKeysState>,
    path: KeyPath,
) -> Result<Json<ApiKeyDto>, ApiError> {
    let record = state.keys.get(&path.key_id).await?;
    Ok(Json(record.into()))
}

/// Update an API key
#[utoipa::path(
    patch,
    path = "/api/v1/admin/keys/{key_id}",
    tag = "api-keys",
    params(("key_id" = String, Path, description = "Key id")),
    request_body = UpdateApiKeyRequest,
    responses(
        (status = 200, body = ApiKeyDto, description = "Updated key"),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Key not found"),
        (status = 409, description = "Status change not allowed"),
    ),
    security(("admin" = [])),
)]
pub async fn update_api_key(
    State(state): State<ApiKeysState>,
    path: KeyPath,
    ValidatedJson(req): ValidatedJson<UpdateApiKeyRequest>,
) -> Result<Json<ApiKeyDto>, ApiError> {
    let record = state.keys.update(&path.key_id, req.into()).await?;
    Ok(Json(record.into()))
}

/// Revoke an API key
///
/// Revoking a key that is already revoked or expired returns it unchanged.
#[utoipa::path(
    delete,
    path = "/api/v1/admin/keys/{key_id}",
    tag = "api-keys",
    params(("key_id" = String, Path, description = "Key id")),
    responses(
        (status = 200, body = ApiKeyDto, description = "Revoked key"),
        (status = 404, description = "Key not found"),
    ),
    security(("admin" = [])),
)]
pub async fn revoke_api_key(
    State(state): State<ApiKeysState>,
    path: KeyPath,
) -> Result<Json<ApiKeyDto>, ApiError> {
    let record = state.keys.revoke(&path.key_id).await?;
    Ok(Json(record.into()))
}

/// Mint an access/refresh pair carrying the key's current entitlements
#[utoipa::path(
    post,
    path = "/api/v1/admin/keys/{key_id}/tokens",
    tag = "api-keys",
    params(("key_id" = String, Path, description = "Key id")),
    request_body = IssueTokensRequest,
    responses(
        (status = 200, body = TokenPair, description = "Token pair"),
        (status = 404, description = "Key not found"),
        (status = 409, description = "Key is revoked or expired"),
    ),
    security(("admin" = [])),
)]
pub async fn issue_tokens(
    State(state): State<ApiKeysState>,
    path: KeyPath,
    ValidatedJson(req): ValidatedJson<IssueTokensRequest>,
) -> Result<Json<TokenPair>, ApiError> {
    let subject = state
        .keys
        .current_subject(&path.key_id)
        .await
        .map_err(|e| {
            tracing::error!(key_id = %path.key_id, error = %e, "Key lookup failed");
            ApiError::internal("Key store operation failed")
        })?;

    let Some(mut subject) = subject else {
        // Distinguish a missing key from an inactive one
        state.keys.get(&path.key_id).await?;
        return Err(ApiError::conflict(
            "KEY_INACTIVE",
            format!("API key {} is revoked or expired", path.key_id),
        ));
    };
    subject.email = req.email;

    let pair = state.tokens.generate_tokens(subject).await.map_err(|e| {
        tracing::error!(key_id = %path.key_id, error = %e, "Token issuance failed");
        match e {
            TokenError::Store(_) => ApiError::internal("Key store operation failed"),
            _ => ApiError::internal("Token issuance failed"),
        }
    })?;

    tracing::info!(key_id = %path.key_id, "Issued token pair for API key");
    Ok(Json(pair))
}
