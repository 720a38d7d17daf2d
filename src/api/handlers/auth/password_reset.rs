//! Password reset via emailed one-time code.
//!
//! The request leg is response-identical whether or not the email has an
//! account. The confirm leg rotates the hash and revokes every refresh
//! session in one transaction.

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
use crate::password::hash_password;

use super::otp::{self, OtpOutcome, OtpPurpose};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::signup::issue_and_send;
use super::state::AuthState;
use super::storage;
use super::types::{MessageResponse, PasswordResetConfirm, PasswordResetRequest};
use super::utils::{
    MIN_PASSWORD_LENGTH, extract_client_ip, normalize_email, valid_code, valid_email,
};

/// Request a reset code. The response never reveals whether the email is
/// registered; codes are issued and mailed only when it is.
#[utoipa::path(
    post,
    path = "/v1/auth/request-password-reset",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Accepted (opaque)", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn request_password_reset(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordResetRequest>>,
) -> impl IntoResponse {
    let request: PasswordResetRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let opaque = || {
        (
            StatusCode::OK,
            Json(MessageResponse::new(
                "If that email is registered, a reset code has been sent.",
            )),
        )
            .into_response()
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return opaque();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::PasswordReset)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::PasswordReset)
            == RateLimitDecision::Limited
    {
        // Limited requests stay opaque too.
        return opaque();
    }

    match storage::lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) => {
            if let Err(err) = issue_and_send(
                &pool,
                &auth_state,
                &email,
                OtpPurpose::PasswordReset,
                Some(user.id),
            )
            .await
            {
                // Swallowed so timing/content cannot distinguish accounts.
                error!("password reset dispatch failed: {err}");
            }
        }
        Ok(None) => {}
        Err(err) => {
            error!("password reset lookup failed: {err}");
        }
    }

    opaque()
}

/// Consume a reset code and set the new password, stranding all existing
/// refresh sessions.
#[utoipa::path(
    post,
    path = "/v1/auth/reset-password",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password reset", body = MessageResponse),
        (status = 400, description = "Invalid code or weak password")
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    payload: Option<Json<PasswordResetConfirm>>,
) -> impl IntoResponse {
    let request: PasswordResetConfirm = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return error_json(StatusCode::BAD_REQUEST, "Invalid email address");
    }
    let code = request.code.trim();
    if !valid_code(code) {
        return error_json(StatusCode::BAD_REQUEST, "Please provide a valid 6-digit code");
    }
    if request.new_password.len() < MIN_PASSWORD_LENGTH {
        return error_json(
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters",
        );
    }
    if request.new_password != request.confirm_password {
        return error_json(StatusCode::BAD_REQUEST, "Passwords do not match");
    }

    let user_id = match otp::verify(&pool, &email, OtpPurpose::PasswordReset, code).await {
        Ok(OtpOutcome::Verified { user_id: Some(id) }) => id,
        Ok(OtpOutcome::Verified { user_id: None }) => {
            // A reset code is always bound to an account at issue time.
            return error_json(StatusCode::BAD_REQUEST, "Invalid or expired code");
        }
        Ok(outcome) => {
            let message = outcome.rejection().unwrap_or("Invalid or expired code");
            return error_json(StatusCode::BAD_REQUEST, message);
        }
        Err(err) => {
            error!("password reset code check failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password reset failed");
        }
    };

    let password_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("password hashing failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password reset failed");
        }
    };

    if let Err(err) = storage::set_password_and_revoke_sessions(&pool, user_id, &password_hash).await
    {
        error!("password reset update failed: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password reset failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse::new(
            "Password has been reset. Please login with your new password.",
        )),
    )
        .into_response()
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
    async fn request_reset_is_opaque_for_invalid_email() -> Result<()> {
        let response = request_password_reset(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(PasswordResetRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn reset_rejects_short_password_before_code_check() -> Result<()> {
        let response = reset_password(
            Extension(lazy_pool()?),
            Some(Json(PasswordResetConfirm {
                email: "ada@example.com".to_string(),
                code: "123456".to_string(),
                new_password: "short".to_string(),
                confirm_password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_rejects_password_mismatch() -> Result<()> {
        let response = reset_password(
            Extension(lazy_pool()?),
            Some(Json(PasswordResetConfirm {
                email: "ada@example.com".to_string(),
                code: "123456".to_string(),
                new_password: "long-enough-pw".to_string(),
                confirm_password: "different-pw-entirely".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn reset_rejects_malformed_code() -> Result<()> {
        let response = reset_password(
            Extension(lazy_pool()?),
            Some(Json(PasswordResetConfirm {
                email: "ada@example.com".to_string(),
                code: "abc".to_string(),
                new_password: "long-enough-pw".to_string(),
                confirm_password: "long-enough-pw".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}
