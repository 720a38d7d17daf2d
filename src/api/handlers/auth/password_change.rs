//! Authenticated password change, gated by a re-check of the current
//! password and an emailed confirmation code.

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
use crate::password::{hash_password, verify_password};

use super::gate::require_user;
use super::otp::{self, OtpOutcome, OtpPurpose};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::signup::issue_and_send;
use super::state::AuthState;
use super::storage;
use super::types::{MessageResponse, PasswordChangeConfirm, PasswordChangeRequest};
use super::utils::{MIN_PASSWORD_LENGTH, extract_client_ip, valid_code};

/// Start a password change: re-verify the current password, then mail a
/// confirmation code to the account email.
#[utoipa::path(
    post,
    path = "/v1/users/password-change/request",
    request_body = PasswordChangeRequest,
    responses(
        (status = 200, description = "Code sent", body = MessageResponse),
        (status = 401, description = "Not authorized or wrong password"),
        (status = 429, description = "Rate limited")
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn request_password_change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordChangeRequest>>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let request: PasswordChangeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::PasswordChange)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&user.email, RateLimitAction::PasswordChange)
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
            error!("password change hash lookup failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password change failed");
        }
    };
    if !verify_password(&request.current_password, &stored_hash) {
        return error_json(StatusCode::UNAUTHORIZED, "Current password is incorrect");
    }

    if let Err(err) = issue_and_send(
        &pool,
        &auth_state,
        &user.email,
        OtpPurpose::PasswordChange,
        Some(user.id),
    )
    .await
    {
        error!("password change dispatch failed: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password change failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse::new(
            "A confirmation code has been sent to your email.",
        )),
    )
        .into_response()
}

/// Finish a password change: consume the code, rotate the hash, and
/// revoke every refresh session.
#[utoipa::path(
    post,
    path = "/v1/users/password-change/confirm",
    request_body = PasswordChangeConfirm,
    responses(
        (status = 200, description = "Password changed", body = MessageResponse),
        (status = 400, description = "Invalid code or weak password"),
        (status = 401, description = "Not authorized")
    ),
    security(("bearer_auth" = [])),
    tag = "users"
)]
pub async fn confirm_password_change(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<PasswordChangeConfirm>>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &pool, &auth_state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let request: PasswordChangeConfirm = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

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

    match otp::verify(&pool, &user.email, OtpPurpose::PasswordChange, code).await {
        Ok(OtpOutcome::Verified { user_id }) => {
            // The code must belong to the acting account.
            if user_id != Some(user.id) {
                return error_json(StatusCode::BAD_REQUEST, "Invalid or expired code");
            }
        }
        Ok(outcome) => {
            let message = outcome.rejection().unwrap_or("Invalid or expired code");
            return error_json(StatusCode::BAD_REQUEST, message);
        }
        Err(err) => {
            error!("password change code check failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password change failed");
        }
    }

    let password_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("password hashing failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password change failed");
        }
    };

    if let Err(err) =
        storage::set_password_and_revoke_sessions(&pool, user.id, &password_hash).await
    {
        error!("password change update failed: {err}");
        return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Password change failed");
    }

    (
        StatusCode::OK,
        Json(MessageResponse::new(
            "Password changed. Please login again with your new password.",
        )),
    )
        .into_response()
}
