//! Health check endpoint

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::CacheService;

#[derive(Serialize, ToSchema)]
pub struct StoreHealth {
    pub backend: &'static str,
    pub healthy: bool,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store: StoreHealth,
}

/// Health check endpoint
///
/// Answers 503 when the key store is unreachable, since every credential
/// lookup would fail closed.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse),
        (status = 503, description = "Key store unreachable", body = HealthResponse)
    )
)]
pub async fn health(State(cache): State<Arc<CacheService>>) -> impl IntoResponse {
    let healthy = match cache.health_check().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Key store health check failed");
            false
        }
    };

    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(HealthResponse {
            status: label,
            version: env!("CARGO_PKG_VERSION"),
            store: StoreHealth {
                backend: cache.backend_name(),
                healthy,
            },
        }),
    )
}
