//! Authenticated email change.
//!
//! The code is scoped to the NEW address with the acting user's id bound
//! to it, so possession of the code proves control of the inbox being
//! adopted, not the one being left behind.

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
use crate::password::verify_password;

use super::gate::require_user;
use super::otp::{self, OtpOutcome, OtpPurpose};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::signup::issue_and_send;
use super::state::AuthState;
use super::storage::{self, UpdateEmailOutcome};
use super::types::{EmailChangeConfirm, EmailChangeRequest, MessageResponse};
use super::utils::{extract_client_ip, normalize_email, valid_code, valid_email};

/// Start an email change: re-verify the password, reject taken targets,
/// and mail a code to the new address.
#[utoipa::path(
    post,
    path = "/v1/users/email-change/request",
    request_body = EmailChangeRequest,
    responses(
        (status = 200, description = "Code sent to the new address", body = MessageResponse),
        (status = 400, description = "Invalid or already-registered email"),
        (status = 401, description = "Not authorized or wrong password"),
        (status = 429, description = "Rate limited")
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn request_email_change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailChangeRequest>>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let request: EmailChangeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let new_email = normalize_email(&request.new_email);
    if !valid_email(&new_email) {
        return error_json(StatusCode::BAD_REQUEST, "Invalid email address");
    }
    if new_email == user.email {
        return error_json(StatusCode::BAD_REQUEST, "This is already your email address");
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::EmailChange)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&user.email, RateLimitAction::EmailChange)
            == RateLimitDecision::Limited
    {
        return error_json(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later",
        );
    }

    let stored_hash = match storage::lookup_password_hash(&pool, user.id).await {
        Ok(Some(hash)) => hash,
        Ok(None) => return error_json(StatusCode::UNAUTHORIZED, "User not found"),
        Err(err) => {
            error!("email change hash lookup failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Email change failed");
        }
    };
    if !verify_password(&request.password, &stored_hash) {
        return error_json(StatusCode::UNAUTHORIZED, "Password is incorrect");
    }

    match storage::email_registered(&pool, &new_email).await {
        Ok(true) => {
            return error_json(StatusCode::BAD_REQUEST, "Email is already registered");
        }
        Ok(false) => {}
        Err(err) => {
            error!("email change availability check failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Email change failed");
        }
    }

    if let Err(err) = issue_and_send(
        &pool,
        &auth_state,
        &new_email,
        OtpPurpose::EmailChange,
        Some(user.id),
    )
    .await
    {
        error!("email change dispatch failed: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Email change failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse::new(
            "A confirmation code has been sent to your new email address.",
        )),
    )
        .into_response()
}

/// Finish an email change: consume the code bound to this account and
/// point the account at the new, now-verified address.
#[utoipa::path(
    post,
    path = "/v1/users/email-change/confirm",
    request_body = EmailChangeConfirm,
    responses(
        (status = 200, description = "Email updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired code"),
        (status = 401, description = "Not authorized")
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn confirm_email_change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<EmailChangeConfirm>>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let request: EmailChangeConfirm = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let code = request.code.trim();
    if !valid_code(code) {
        return error_json(StatusCode::BAD_REQUEST, "Please provide a valid 6-digit code");
    }

    // The code row carries the new address; find it via the user binding.
    let pending = match otp::pending_email_for_user(&pool, user.id, OtpPurpose::EmailChange).await {
        Ok(Some(email)) => email,
        Ok(None) => return error_json(StatusCode::BAD_REQUEST, "Invalid or expired code"),
        Err(err) => {
            error!("email change pending lookup failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Email change failed");
        }
    };

    match otp::verify(&pool, &pending, OtpPurpose::EmailChange, code).await {
        Ok(OtpOutcome::Verified { user_id }) => {
            if user_id != Some(user.id) {
                return error_json(StatusCode::BAD_REQUEST, "Invalid or expired code");
            }
        }
        Ok(outcome) => {
            let message = outcome.rejection().unwrap_or("Invalid or expired code");
            return error_json(StatusCode::BAD_REQUEST, message);
        }
        Err(err) => {
            error!("email change code check failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Email change failed");
        }
    }

    match storage::update_email_verified(&pool, user.id, &pending).await {
        Ok(UpdateEmailOutcome::Updated) => (
            StatusCode::OK,
            Json(MessageResponse::new("Email address updated.")),
        )
            .into_response(),
        Ok(UpdateEmailOutcome::Conflict) => {
            // Someone registered the address between request and confirm.
            error_json(StatusCode::BAD_REQUEST, "Email is already registered")
        }
        Err(err) => {
            error!("email change update failed: {err}");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Email change failed")
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
    async fn request_requires_authentication() -> Result<()> {
        let response = request_email_change(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(EmailChangeRequest {
                new_email: "new@example.com".to_string(),
                password: "current-pw".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn confirm_requires_authentication() -> Result<()> {
        let response = confirm_email_change(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(EmailChangeConfirm {
                code: "123456".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }
}
