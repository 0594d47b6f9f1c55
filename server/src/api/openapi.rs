//! OpenAPI specification

use axum::http::header;
use axum::response::{IntoResponse, Json};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::api::auth::{AuthContext, AuthErrorBody};
use crate::api::routes::{api_keys, auth, health, whoami};
use crate::data::cache::RateLimitResult;
use crate::data::types::{KeyStatus, Principal, RateLimitSpec, Usage};
use crate::domain::TokenPair;

/// Registers the admin bearer scheme referenced by the admin endpoints
struct AdminSecurity;

impl Modify for AdminSecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Keygate API",
        version = env!("CARGO_PKG_VERSION"),
        description = "Authentication and quota gateway for API keys and bearer tokens"
    ),
    modifiers(&AdminSecurity),
    tags(
        (name = "health", description = "Health check endpoint"),
        (name = "auth", description = "Token rotation, revocation and caller introspection"),
        (name = "api-keys", description = "API key administration")
    ),
    paths(
        // Health
        health::health,
        // Auth
        whoami::whoami,
        whoami::me,
        auth::refresh,
        auth::revoke,
        // API Keys
        api_keys::create_api_key,
        api_keys::list_api_keys,
        api_keys::get_api_key,
        api_keys::update_api_key,
        api_keys::revoke_api_key,
        api_keys::issue_tokens,
    ),
    components(schemas(
        // Health
        health::HealthResponse,
        health::StoreHealth,
        // Auth
        AuthContext,
        AuthErrorBody,
        Principal,
        RateLimitResult,
        TokenPair,
        auth::RefreshRequest,
        auth::RevokeRequest,
        // API Keys
        KeyStatus,
        RateLimitSpec,
        Usage,
        api_keys::types::ApiKeyDto,
        api_keys::types::CreateApiKeyRequest,
        api_keys::types::CreateApiKeyResponse,
        api_keys::types::UpdateApiKeyRequest,
        api_keys::types::ListApiKeysQuery,
        api_keys::types::IssueTokensRequest,
    ))
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
pub async fn openapi_json() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Json(ApiDoc::openapi()),
    )
}
