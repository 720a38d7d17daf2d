//! Login endpoint.
//!
//! Unknown emails and wrong passwords are indistinguishable from the
//! outside. Verified users with correct credentials get a session;
//! unverified users get the 403 signal and a fresh code, best effort.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, warn};

use crate::api::handlers::error_json;
use crate::password::verify_password;

use super::otp::OtpPurpose;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::signup::{issue_and_send, start_session};
use super::state::AuthState;
use super::storage;
use super::types::{AuthResponse, LoginRequest};
use super::utils::{extract_client_ip, normalize_email, valid_email};

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = AuthResponse),
        (status = 401, description = "Invalid email or password"),
        (status = 403, description = "Email verification required"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) || request.password.is_empty() {
        // Malformed credentials get the same answer as wrong ones.
        return error_json(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Login)
            == RateLimitDecision::Limited
    {
        return error_json(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later",
        );
    }

    let record = match storage::lookup_login_record(&pool, &email).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            return error_json(StatusCode::UNAUTHORIZED, "Invalid email or password");
        }
        Err(err) => {
            error!("login lookup failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    };

    if !verify_password(&request.password, &record.password_hash) {
        return error_json(StatusCode::UNAUTHORIZED, "Invalid email or password");
    }

    if !record.is_email_verified {
        // Correct credentials, but no session until the email is proven.
        // Re-deliver a code so the client can jump straight to the verify
        // screen; delivery failure does not change the response.
        if let Err(err) = issue_and_send(
            &pool,
            &auth_state,
            &email,
            OtpPurpose::EmailVerification,
            Some(record.id),
        )
        .await
        {
            warn!("login verification re-delivery failed: {err}");
        }
        return (
            StatusCode::FORBIDDEN,
            Json(json!({
                "error": "Please verify your email to continue",
                "requiresEmailVerification": true,
            })),
        )
            .into_response();
    }

    let user = match storage::lookup_user(&pool, record.id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            return error_json(StatusCode::UNAUTHORIZED, "Invalid email or password");
        }
        Err(err) => {
            error!("login user load failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Login failed");
        }
    };

    if let Err(err) = storage::stamp_last_login(&pool, user.id).await {
        // Login still succeeds; the timestamp is informational.
        warn!("failed to stamp last login: {err}");
    }

    match start_session(&pool, &auth_state, &user).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("login session issue failed: {err}");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Login failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::state::test_support::auth_state;
    use super::*;
    use anyhow::Result;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> Result<PgPool> {
        Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/poemvy_test")?)
    }

    #[tokio::test]
    async fn login_missing_payload() -> Result<()> {
        let response = login(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn login_malformed_email_is_generic_unauthorized() -> Result<()> {
        let response = login(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                email: "not-an-email".to_string(),
                password: "whatever-pw".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn login_empty_password_is_generic_unauthorized() -> Result<()> {
        let response = login(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(LoginRequest {
                email: "ada@example.com".to_string(),
                password: String::new(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
