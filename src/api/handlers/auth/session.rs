//! Session lifecycle: refresh, logout, and the current-user view.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use crate::api::handlers::error_json;

use super::gate::require_user;
use super::state::AuthState;
use super::storage;
use super::types::{
    LogoutRequest, MessageResponse, PublicUser, RefreshRequest, RefreshResponse, UserResponse,
};

/// Exchange a live refresh token for a fresh access token.
///
/// The token must validate cryptographically AND still be a member of the
/// user's live set; both failures collapse into one 401 message.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New access token", body = RefreshResponse),
        (status = 400, description = "Missing refresh token"),
        (status = 401, description = "Invalid or expired refresh token")
    ),
    tag = "auth"
)]
pub async fn refresh(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RefreshRequest>>,
) -> impl IntoResponse {
    let request: RefreshRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let token = request.refresh_token.trim();
    if token.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing refresh token");
    }

    let Ok(claims) = auth_state.tokens().validate_refresh_token(token) else {
        return error_json(StatusCode::UNAUTHORIZED, "Invalid or expired refresh token");
    };
    let Ok(user_id) = claims.user_id() else {
        return error_json(StatusCode::UNAUTHORIZED, "Invalid or expired refresh token");
    };

    match storage::refresh_token_live(&pool, user_id, token).await {
        Ok(true) => {}
        Ok(false) => {
            // Revoked, rotated away, or never ours.
            return error_json(StatusCode::UNAUTHORIZED, "Invalid or expired refresh token");
        }
        Err(err) => {
            error!("refresh token check failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Refresh failed");
        }
    }

    match auth_state.tokens().issue_access_token(user_id) {
        Ok(access_token) => (
            StatusCode::OK,
            Json(RefreshResponse {
                success: true,
                access_token,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("access token issue failed: {err}");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Refresh failed")
        }
    }
}

/// Revoke the submitted refresh token for the acting user. Idempotent.
#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authorized")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let request: LogoutRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let token = request.refresh_token.trim();
    if token.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "Missing refresh token");
    }

    // Scoped to the acting user; one account cannot revoke another's
    // sessions even with a stolen token string.
    if let Err(err) = storage::revoke_refresh_token(&pool, user.id, token).await {
        error!("logout revocation failed: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Logout failed");
    }

    (StatusCode::OK, Json(MessageResponse::new("Logged out"))).into_response()
}

/// The acting user's own profile view.
#[utoipa::path(
    get,
    path = "/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authorized")
    ),
    security(("bearer_auth" = [])),
    tag = "auth"
)]
pub async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => (
            StatusCode::OK,
            Json(UserResponse {
                success: true,
                user: PublicUser::from(&user),
            }),
        )
            .into_response(),
        Err(response) => response,
    }
}
