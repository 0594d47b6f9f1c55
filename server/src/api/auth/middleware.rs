//! Gateway and admin middleware

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::context::AuthRequirements;
use super::error::{AuthError, request_id_from};
use super::resolver::AuthResolver;
use crate::api::rate_limit::add_rate_limit_headers;
use crate::api::types::ApiError;
use crate::utils::crypto::constant_time_eq;

/// Shared state for the gateway middleware
#[derive(Clone)]
pub struct GatewayState {
    pub resolver: Arc<AuthResolver>,
    pub requirements: Arc<AuthRequirements>,
}

impl GatewayState {
    pub fn new(resolver: Arc<AuthResolver>, requirements: AuthRequirements) -> Self {
        Self {
            resolver,
            requirements: Arc::new(requirements),
        }
    }
}

/// Authenticate, authorize and meter the request
///
/// Injects `AuthContext` into request extensions and copies the quota state
/// onto the downstream response as `X-RateLimit-*` headers.
pub async fn gateway(State(state): State<GatewayState>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();

    let ctx = match state
        .resolver
        .authenticate(&parts, &state.requirements)
        .await
    {
        Ok(ctx) => ctx,
        Err(e) => return e.into_response(),
    };

    let rate_limit = ctx.rate_limit.clone();
    parts.extensions.insert(ctx);

    let mut response = next.run(Request::from_parts(parts, body)).await;
    if let Some(result) = &rate_limit {
        add_rate_limit_headers(response.headers_mut(), result);
    }
    response
}

/// Shared state for the admin middleware
#[derive(Clone)]
pub struct AdminState {
    /// `None` disables the admin API
    pub token: Option<Arc<str>>,
}

/// Require `Authorization: Bearer <admin token>`
pub async fn require_admin(
    State(state): State<AdminState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.token.as_deref() else {
        return ApiError::service_unavailable("Admin API is disabled: no admin token configured")
            .into_response();
    };

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match presented {
        Some(token) if constant_time_eq(token, expected) => next.run(request).await,
        Some(_) => {
            tracing::warn!("Rejected admin request with wrong token");
            AuthError::invalid("invalid_admin_token")
                .with_request_id(request_id_from(request.headers()))
                .into_response()
        }
        None => AuthError::missing()
            .with_request_id(request_id_from(request.headers()))
            .into_response(),
    }
}
