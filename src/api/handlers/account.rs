//! Account deletion.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::auth::gate::require_user;
use super::auth::state::AuthState;
use super::auth::storage;
use super::auth::types::MessageResponse;
use super::error_json;

/// Delete the acting user's account.
///
/// Content cleanup runs first and must succeed; only then is the user row
/// removed (refresh tokens cascade with it). Cleanup is idempotent, so a
/// failure after partial completion is safe to retry.
#[utoipa::path(
    delete,
    path = "/v1/users/me",
    responses(
        (status = 200, description = "Account deleted", body = MessageResponse),
        (status = 401, description = "Not authorized")
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn delete_account(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    if let Err(err) = auth_state.cleanup().purge_user(user.id) {
        error!("content cleanup failed, aborting account deletion: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Account deletion failed");
    }

    if let Err(err) = storage::delete_user(&pool, user.id).await {
        error!("account deletion failed: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Account deletion failed");
    }

    info!(user_id = %user.id, "account deleted");
    (
        StatusCode::OK,
        Json(MessageResponse::new("Account deleted")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::super::auth::state::test_support::auth_state;
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn delete_account_requires_authentication() -> Result<()> {
        let pool = PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/poemvy_test")?;
        let response = delete_account(
            HeaderMap::new(),
            Extension(pool),
            Extension(auth_state()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
