//! Signup and email verification endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

use crate::api::email::{MailPurpose, OtpMail};
use crate::api::handlers::error_json;
use crate::password::hash_password;

use super::otp::{self, OtpOutcome, OtpPurpose};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{self, CreateUserOutcome, NewUser};
use super::types::{
    AuthResponse, MessageResponse, PublicUser, ResendVerificationRequest, SignupRequest,
    VerifyEmailRequest,
};
use super::utils::{
    MAX_DISPLAY_NAME_LENGTH, MIN_PASSWORD_LENGTH, extract_client_ip, normalize_email,
    normalize_username, valid_code, valid_email, valid_username,
};

const SAGA_RETRIES: u32 = 3;

/// Register a new, unverified account and send a verification code.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created, verification pending", body = MessageResponse),
        (status = 400, description = "Validation failure or duplicate username/email"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn signup(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let display_name = request.display_name.trim().to_string();
    let username = normalize_username(&request.username);
    let email = normalize_email(&request.email);

    if display_name.is_empty() || username.is_empty() || email.is_empty() {
        return error_json(StatusCode::BAD_REQUEST, "All fields are required");
    }
    if display_name.chars().count() > MAX_DISPLAY_NAME_LENGTH {
        return error_json(
            StatusCode::BAD_REQUEST,
            "Display name must be 50 characters or fewer",
        );
    }
    if !valid_username(&username) {
        return error_json(
            StatusCode::BAD_REQUEST,
            "Username must be 3-30 characters of lowercase letters, numbers, and underscores",
        );
    }
    if !valid_email(&email) {
        return error_json(StatusCode::BAD_REQUEST, "Invalid email address");
    }
    if request.password.len() < MIN_PASSWORD_LENGTH {
        return error_json(
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters",
        );
    }
    if request.password != request.confirm_password {
        return error_json(StatusCode::BAD_REQUEST, "Passwords do not match");
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Signup)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Signup)
            == RateLimitDecision::Limited
    {
        return error_json(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later",
        );
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("password hashing failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Signup failed");
        }
    };

    let user_id = match storage::create_user(
        &pool,
        &NewUser {
            display_name,
            username,
            email: email.clone(),
            password_hash,
        },
    )
    .await
    {
        Ok(CreateUserOutcome::Created(id)) => id,
        Ok(CreateUserOutcome::Conflict) => return duplicate_identity(),
        Err(err) => {
            error!("signup insert failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Signup failed");
        }
    };

    // Issue the code and dispatch mail; if either fails the account must
    // not remain in a state the user cannot verify, so unwind it fully
    // before reporting the failure.
    match issue_and_send(&pool, &auth_state, &email, OtpPurpose::EmailVerification, Some(user_id))
        .await
    {
        Ok(()) => (
            StatusCode::CREATED,
            Json(MessageResponse::new(
                "Account created. Please check your email for a verification code.",
            )),
        )
            .into_response(),
        Err(err) => {
            error!("signup verification dispatch failed: {err}");
            compensate_signup(&pool, user_id, &email).await;
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Signup failed")
        }
    }
}

/// Duplicate username/email is a request error like any other validation
/// failure; which identity collided is not reported.
fn duplicate_identity() -> axum::response::Response {
    error_json(StatusCode::BAD_REQUEST, "Username or email already exists")
}

/// Issue an OTP and hand it to the mailer. The plaintext code lives only
/// on this stack frame.
pub(super) async fn issue_and_send(
    pool: &PgPool,
    auth_state: &AuthState,
    email: &str,
    purpose: OtpPurpose,
    user_id: Option<uuid::Uuid>,
) -> anyhow::Result<()> {
    let code = otp::issue(pool, email, purpose, user_id).await?;
    let mail_purpose = match purpose {
        OtpPurpose::EmailVerification => MailPurpose::EmailVerification,
        OtpPurpose::PasswordReset => MailPurpose::PasswordReset,
        OtpPurpose::EmailChange => MailPurpose::EmailChange,
        OtpPurpose::PasswordChange => MailPurpose::PasswordChange,
    };
    auth_state.mailer().send(&OtpMail {
        to_email: email.to_string(),
        purpose: mail_purpose,
        code,
        expires_minutes: purpose.ttl_minutes(),
    })
}

/// Unwind a half-finished signup: delete the user row, then any codes, in
/// that order so a retry can never find a code without its user. Each step
/// is retried a few times; a final failure is logged and left for the
/// lazy-expiry path to clean up.
async fn compensate_signup(pool: &PgPool, user_id: uuid::Uuid, email: &str) {
    for attempt in 1..=SAGA_RETRIES {
        match storage::delete_user(pool, user_id).await {
            Ok(()) => break,
            Err(err) if attempt == SAGA_RETRIES => {
                error!("signup compensation could not delete user: {err}");
                return;
            }
            Err(err) => {
                warn!("signup compensation retrying user delete: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    for attempt in 1..=SAGA_RETRIES {
        match otp::delete_codes_for_email(pool, email, OtpPurpose::EmailVerification).await {
            Ok(()) => return,
            Err(err) if attempt == SAGA_RETRIES => {
                error!("signup compensation could not delete codes: {err}");
            }
            Err(err) => {
                warn!("signup compensation retrying code delete: {err}");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
}

/// Consume a verification code, activate the account, and start a session.
#[utoipa::path(
    post,
    path = "/v1/auth/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified, session issued", body = AuthResponse),
        (status = 400, description = "Invalid or expired code"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
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

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::VerifyEmail)
            == RateLimitDecision::Limited
    {
        return error_json(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many requests. Please try again later",
        );
    }

    match otp::verify(&pool, &email, OtpPurpose::EmailVerification, code).await {
        Ok(OtpOutcome::Verified { .. }) => {}
        Ok(outcome) => {
            if let Some(message) = outcome.rejection() {
                return error_json(StatusCode::BAD_REQUEST, message);
            }
            return error_json(StatusCode::BAD_REQUEST, "Invalid or expired code");
        }
        Err(err) => {
            error!("verify-email code check failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    }

    let user = match storage::mark_email_verified(&pool, &email).await {
        Ok(Some(user)) => user,
        Ok(None) => return error_json(StatusCode::BAD_REQUEST, "Invalid or expired code"),
        Err(err) => {
            error!("verify-email activation failed: {err}");
            return error_json(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed");
        }
    };

    match start_session(&pool, &auth_state, &user).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => {
            error!("verify-email session issue failed: {err}");
            error_json(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed")
        }
    }
}

/// Mint the access/refresh pair and persist the refresh digest.
pub(super) async fn start_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &storage::AuthUser,
) -> anyhow::Result<AuthResponse> {
    let access_token = auth_state.tokens().issue_access_token(user.id)?;
    let refresh_token = auth_state.tokens().issue_refresh_token(user.id)?;
    let ttl_days = auth_state.tokens().refresh_ttl().num_days().max(1);
    storage::add_refresh_token(pool, user.id, &refresh_token, ttl_days).await?;
    Ok(AuthResponse {
        success: true,
        user: PublicUser::from(user),
        access_token,
        refresh_token,
    })
}

/// Re-send a verification code. Always responds generically so callers
/// cannot probe which addresses hold accounts.
#[utoipa::path(
    post,
    path = "/v1/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Accepted (opaque)", body = MessageResponse)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return error_json(StatusCode::BAD_REQUEST, "Missing payload"),
    };

    let opaque = || {
        (
            StatusCode::OK,
            Json(MessageResponse::new(
                "If that email needs verification, a new code has been sent.",
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
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ResendVerification)
            == RateLimitDecision::Limited
    {
        // Opaque even when limited.
        return opaque();
    }

    match storage::lookup_user_by_email(&pool, &email).await {
        Ok(Some(user)) if !user.is_email_verified => {
            if let Err(err) = issue_and_send(
                &pool,
                &auth_state,
                &email,
                OtpPurpose::EmailVerification,
                Some(user.id),
            )
            .await
            {
                error!("resend verification dispatch failed: {err}");
            }
        }
        Ok(_) => {}
        Err(err) => {
            error!("resend verification lookup failed: {err}");
        }
    }

    opaque()
}
