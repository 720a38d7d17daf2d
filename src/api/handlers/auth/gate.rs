//! Session gate: resolves a bearer access token to a live account.

use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::error;

use super::state::AuthState;
use super::storage::{self, AuthUser};
use super::utils::extract_bearer_token;
use crate::api::handlers::error_json;

/// Authenticate a request or produce the 401/500 response to return.
///
/// A token is accepted only when its signature and expiry check out, the
/// account still exists, and the token was issued after the last password
/// change. Tokens minted before a password rotation are dead even though
/// their signature is still valid.
pub async fn require_user(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<AuthUser, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(error_json(
            StatusCode::UNAUTHORIZED,
            "Not authorized, no token provided",
        ));
    };

    let Ok(claims) = state.tokens().validate_access_token(&token) else {
        return Err(error_json(
            StatusCode::UNAUTHORIZED,
            "Not authorized, token failed",
        ));
    };

    let Ok(user_id) = claims.user_id() else {
        return Err(error_json(
            StatusCode::UNAUTHORIZED,
            "Not authorized, token failed",
        ));
    };

    let user = match storage::lookup_user(pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return Err(error_json(StatusCode::UNAUTHORIZED, "User not found"));
        }
        Err(err) => {
            error!("session gate lookup failed: {err}");
            return Err(error_json(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server error in auth middleware",
            ));
        }
    };

    if let Some(changed_at) = user.password_changed_at {
        if issued_before_password_change(claims.issued_at(), changed_at) {
            return Err(error_json(
                StatusCode::UNAUTHORIZED,
                "Password was changed. Please login again.",
            ));
        }
    }

    Ok(user)
}

/// A token predating the last password rotation is dead even though its
/// signature still verifies. An unparseable issue time fails closed.
fn issued_before_password_change(
    issued_at: Option<DateTime<Utc>>,
    changed_at: DateTime<Utc>,
) -> bool {
    issued_at.is_none_or(|at| at < changed_at)
}

/// Best-effort authentication for endpoints that personalize public data.
pub async fn optional_user(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Option<AuthUser> {
    require_user(headers, pool, state).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::state::test_support::auth_state;
    use axum::http::HeaderValue;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/poemvy_test")
            .expect("lazy pool")
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = auth_state();
        let pool = lazy_pool();
        let result = require_user(&HeaderMap::new(), &pool, &state).await;
        let response = result.err().expect("missing token rejected");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_token_is_unauthorized() {
        let state = auth_state();
        let pool = lazy_pool();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer not-a-jwt"),
        );
        let result = require_user(&headers, &pool, &state).await;
        let response = result.err().expect("malformed token rejected");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn pre_rotation_token_is_stale() {
        let changed_at = Utc::now();
        let before = changed_at - chrono::Duration::minutes(1);
        assert!(issued_before_password_change(Some(before), changed_at));
    }

    #[test]
    fn post_rotation_token_is_fresh() {
        let changed_at = Utc::now();
        let after = changed_at + chrono::Duration::minutes(1);
        assert!(!issued_before_password_change(Some(after), changed_at));
    }

    #[test]
    fn unparseable_issue_time_fails_closed() {
        assert!(issued_before_password_change(None, Utc::now()));
    }

    #[tokio::test]
    async fn optional_user_degrades_to_none() {
        let state = auth_state();
        let pool = lazy_pool();
        assert!(
            optional_user(&HeaderMap::new(), &pool, &state)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn refresh_token_is_rejected_as_access() {
        let state = auth_state();
        let pool = lazy_pool();
        let token = state
            .tokens()
            .issue_refresh_token(uuid::Uuid::new_v4())
            .expect("issue refresh token");
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).expect("header value"),
        );
        let result = require_user(&headers, &pool, &state).await;
        let response = result.err().expect("refresh token rejected");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
