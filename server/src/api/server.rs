//! API server initialization

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;

use tower_http::compression::CompressionLayer;

use super::auth::{AdminState, AuthRequirements, GatewayState, gateway, require_admin};
use super::middleware;
use super::openapi::openapi_json;
use super::routes::{api_keys, auth, health, whoami};
use crate::core::CoreApp;
use crate::core::constants::{AUTH_BODY_LIMIT, DEFAULT_BODY_LIMIT};

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Returns CoreApp for graceful shutdown
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;

        // Clone shutdown before moving app
        let shutdown = app.shutdown.clone();

        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let addr = SocketAddr::new(host.parse()?, port);

        let router = router(&app);

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(%addr, backend = app.cache.backend_name(), "Keygate listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(app)
    }
}

/// Build the full HTTP surface
pub fn router(app: &CoreApp) -> Router {
    // Gateway-protected introspection (guests allowed)
    let whoami_routes = Router::new()
        .route("/api/v1/whoami", get(whoami::whoami))
        .route_layer(axum::middleware::from_fn_with_state(
            GatewayState::new(app.resolver.clone(), AuthRequirements::optional()),
            gateway,
        ));

    // Same, credential required
    let me_routes = Router::new()
        .route("/api/v1/me", get(whoami::me))
        .route_layer(axum::middleware::from_fn_with_state(
            GatewayState::new(app.resolver.clone(), AuthRequirements::required()),
            gateway,
        ));

    // Token rotation and revocation (credential travels in the body)
    let auth_routes =
        auth::routes(app.tokens.clone()).layer(DefaultBodyLimit::max(AUTH_BODY_LIMIT));

    // Admin key management behind the operator token
    let admin_routes = api_keys::routes(app.api_keys.clone(), app.tokens.clone())
        .layer(axum::middleware::from_fn_with_state(
            AdminState {
                token: app.config.secrets.admin_token.as_deref().map(Arc::from),
            },
            require_admin,
        ))
        .layer(DefaultBodyLimit::max(AUTH_BODY_LIMIT));

    let health_routes = Router::new()
        .route("/api/v1/health", get(health::health))
        .with_state(app.cache.clone());

    Router::new()
        .route("/api/openapi.json", get(openapi_json))
        .merge(health_routes)
        .merge(whoami_routes)
        .merge(me_routes)
        .nest("/api/v1/auth", auth_routes)
        .nest("/api/v1/admin/keys", admin_routes)
        .fallback(middleware::handle_404)
        .layer(CompressionLayer::new())
        .layer(middleware::cors(
            &app.config.server.cors_origin,
            &app.config.auth.legacy_header,
        ))
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::core::config::{
        AppConfig, AuthConfig, CacheConfig, RateLimitConfig, SecretsConfig, ServerConfig,
    };
    use crate::core::shutdown::ShutdownService;

    const ADMIN_TOKEN: &str = "test-admin-token-0123456789abcdef";

    fn test_config(admin_token: Option<&str>) -> AppConfig {
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 5390,
                cors_origin: "*".to_string(),
            },
            auth: AuthConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cache: CacheConfig::default(),
            secrets: SecretsConfig {
                jwt_secret: Some("server-test-jwt-secret-0123456789abcdef".to_string()),
                api_key_secret: Some("server-test-key-secret-0123456789abcdef".to_string()),
                admin_token: admin_token.map(String::from),
            },
        }
    }

    async fn test_router(admin_token: Option<&str>) -> Router {
        let app = CoreApp::init(test_config(admin_token), ShutdownService::new())
            .await
            .unwrap();
        router(&app)
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get_req(uri: &str) -> axum::http::request::Builder {
        Request::builder().method("GET").uri(uri)
    }

    fn admin(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", ADMIN_TOKEN))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn create_key(router: &Router, body: Value) -> (String, String) {
        let (status, created) = send(router, admin("POST", "/api/v1/admin/keys", body)).await;
        assert_eq!(status, StatusCode::CREATED);
        (
            created["api_key"].as_str().unwrap().to_string(),
            created["key"]["key_id"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_health_reports_store() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (status, body) = send(
            &router,
            get_req("/api/v1/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"]["backend"], "memory");
        assert_eq!(body["store"]["healthy"], true);
    }

    #[tokio::test]
    async fn test_openapi_document() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (status, body) = send(
            &router,
            get_req("/api/openapi.json").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "Keygate API");
        assert!(body["paths"]["/api/v1/admin/keys/{key_id}/tokens"].is_object());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (status, _) = send(&router, get_req("/nope").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_admin_requires_token() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (status, body) = send(
            &router,
            get_req("/api/v1/admin/keys").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "credential_missing_or_invalid");

        let (status, _) = send(
            &router,
            get_req("/api/v1/admin/keys")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_disabled_without_token() {
        let router = test_router(None).await;
        let (status, body) = send(&router, admin("GET", "/api/v1/admin/keys", json!({}))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "SERVICE_UNAVAILABLE");
    }

    #[tokio::test]
    async fn test_admin_key_lifecycle() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (api_key, key_id) = create_key(
            &router,
            json!({ "created_by": "owner-1", "plan": "pro", "permissions": ["read", "write"] }),
        )
        .await;
        assert!(api_key.starts_with("kg_"));

        let uri = format!("/api/v1/admin/keys/{}", key_id);
        let (status, body) = send(&router, admin("GET", &uri, json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"], "pro");
        assert_eq!(body["status"], "active");
        assert!(body.get("api_key").is_none());

        let (status, body) = send(&router, admin("PATCH", &uri, json!({ "plan": "team" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["plan"], "team");

        let (status, body) = send(&router, admin("DELETE", &uri, json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "revoked");

        // Revoked keys cannot come back
        let (status, body) =
            send(&router, admin("PATCH", &uri, json!({ "status": "active" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "INVALID_STATUS_TRANSITION");

        let (status, body) = send(
            &router,
            admin("GET", "/api/v1/admin/keys?status=revoked", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = send(
            &router,
            admin("GET", "/api/v1/admin/keys/key_0000000000000000", json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "KEY_NOT_FOUND");

        let (status, body) =
            send(&router, admin("GET", "/api/v1/admin/keys/not-a-key", json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_KEY_ID");
    }

    #[tokio::test]
    async fn test_create_key_validation() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (status, body) = send(
            &router,
            admin(
                "POST",
                "/api/v1/admin/keys",
                json!({ "created_by": "owner-1", "rate_limit": { "requests": 5, "window": "soon" } }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_whoami_with_legacy_key_and_guest() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (api_key, key_id) = create_key(&router, json!({ "created_by": "owner-1" })).await;

        let (status, body) = send(
            &router,
            get_req("/api/v1/whoami")
                .header("x-api-key", &api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isLegacyAuth"], true);
        assert_eq!(body["principal"]["userId"], "owner-1");
        assert_eq!(body["principal"]["apiKeyRef"], key_id);

        let (status, body) = send(
            &router,
            get_req("/api/v1/whoami").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["principal"]["userId"], "guest");
        assert_eq!(body["rateLimit"]["limit"], 10);

        let uri = format!("/api/v1/admin/keys/{}", key_id);
        send(&router, admin("DELETE", &uri, json!({}))).await;

        // A revoked key is refused where auth is required and ignored where it is optional
        let (status, body) = send(
            &router,
            get_req("/api/v1/me")
                .header("x-api-key", &api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "credential_missing_or_invalid");

        let (status, body) = send(
            &router,
            get_req("/api/v1/whoami")
                .header("x-api-key", &api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["principal"]["userId"], "guest");
    }

    #[tokio::test]
    async fn test_me_requires_credential() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (status, body) = send(&router, get_req("/api/v1/me").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["details"]["reason"], "missing");

        let (api_key, _) = create_key(&router, json!({ "created_by": "owner-1" })).await;
        let (status, body) = send(
            &router,
            get_req("/api/v1/me")
                .header("x-api-key", &api_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["principal"]["userId"], "owner-1");
    }

    #[tokio::test]
    async fn test_gateway_errors_carry_cors_headers() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let origin = "https://app.example.com";

        let response = router
            .clone()
            .oneshot(
                get_req("/api/v1/me")
                    .header(header::ORIGIN, origin)
                    .header(header::AUTHORIZATION, "Bearer garbage")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        // Guests get 10 requests per minute
        let mut last = None;
        for _ in 0..11 {
            let response = router
                .clone()
                .oneshot(
                    get_req("/api/v1/whoami")
                        .header(header::ORIGIN, origin)
                        .header("x-forwarded-for", "203.0.113.9")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            last = Some(response);
        }
        let response = last.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_token_issue_refresh_revoke() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (_, key_id) = create_key(&router, json!({ "created_by": "owner-1" })).await;

        let uri = format!("/api/v1/admin/keys/{}/tokens", key_id);
        let (status, pair) = send(
            &router,
            admin("POST", &uri, json!({ "email": "owner@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pair["tokenType"], "Bearer");
        let access = pair["accessToken"].as_str().unwrap().to_string();
        let refresh = pair["refreshToken"].as_str().unwrap().to_string();

        let bearer = |token: &str| {
            get_req("/api/v1/me")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send(&router, bearer(&access)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isLegacyAuth"], false);
        assert_eq!(body["principal"]["email"], "owner@example.com");

        // Refresh tokens are single use
        let (status, rotated) = send(
            &router,
            post_json("/api/v1/auth/refresh", json!({ "refreshToken": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(rotated["accessToken"].is_string());
        let (status, body) = send(
            &router,
            post_json("/api/v1/auth/refresh", json!({ "refreshToken": refresh })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "credential_revoked");

        let (status, _) = send(
            &router,
            post_json("/api/v1/auth/revoke", json!({ "token": access })),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, body) = send(&router, bearer(&access)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "credential_revoked");
    }

    #[tokio::test]
    async fn test_issue_tokens_for_revoked_key_conflicts() {
        let router = test_router(Some(ADMIN_TOKEN)).await;
        let (_, key_id) = create_key(&router, json!({ "created_by": "owner-1" })).await;
        send(
            &router,
            admin("DELETE", &format!("/api/v1/admin/keys/{}", key_id), json!({})),
        )
        .await;

        let (status, body) = send(
            &router,
            admin(
                "POST",
                &format!("/api/v1/admin/keys/{}/tokens", key_id),
                json!({}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "KEY_INACTIVE");
    }
}
