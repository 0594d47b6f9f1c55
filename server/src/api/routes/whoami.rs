//! Echo the resolved caller

use axum::Json;

use crate::api::auth::AuthContext;

/// Return the context the gateway resolved for this request
///
/// Callers without a usable credential get a synthesized guest principal.
#[utoipa::path(
    get,
    path = "/api/v1/whoami",
    tag = "auth",
    responses(
        (status = 200, description = "Resolved caller or guest", body = AuthContext),
        (status = 429, description = "Rate limit exceeded")
    )
)]
pub async fn whoami(ctx: AuthContext) -> Json<AuthContext> {
    tracing::debug!(
        request_id = %ctx.request_id,
        user_id = %ctx.principal.user_id,
        guest = ctx.is_guest(),
        "whoami"
    );
    Json(ctx)
}

/// Same as [`whoami`], but a credential is required
#[utoipa::path(
    get,
    path = "/api/v1/me",
    tag = "auth",
    responses(
        (status = 200, description = "Authenticated caller", body = AuthContext),
        (status = 401, description = "Credential missing, invalid, expired or revoked"),
        (status = 429, description = "Rate limit exceeded")
    )
)]
pub async fn me(ctx: AuthContext) -> Json<AuthContext> {
    Json(ctx)
}
