//! Request and response bodies for the auth endpoints.
//!
//! Clients speak camelCase JSON. Successful responses carry
//! `"success": true` plus payload fields; failures are
//! `{"error": "<message>"}` built by [`crate::api::handlers::error_json`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::storage::AuthUser;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub display_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct VerifyEmailRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetConfirm {
    pub email: String,
    pub code: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeRequest {
    pub current_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PasswordChangeConfirm {
    pub code: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmailChangeRequest {
    pub new_email: String,
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct EmailChangeConfirm {
    pub code: String,
}

/// Account fields safe to show to the account owner.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub display_name: String,
    pub email: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_email_verified: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&AuthUser> for PublicUser {
    fn from(user: &AuthUser) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            bio: user.bio.clone(),
            avatar_url: user.avatar_url.clone(),
            is_email_verified: user.is_email_verified,
            last_login: user.last_login,
            created_at: user.created_at,
        }
    }
}

/// Login/verify response carrying the session pair.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub success: bool,
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Refresh hands back a new access token only; the refresh token itself
/// stays valid until logout, revocation, or expiry.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub access_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserResponse {
    pub success: bool,
    pub user: PublicUser,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn signup_request_uses_camel_case() {
        let parsed: SignupRequest = serde_json::from_value(serde_json::json!({
            "displayName": "Ada",
            "username": "ada",
            "email": "ada@example.com",
            "password": "secret-pw",
            "confirmPassword": "secret-pw",
        }))
        .expect("parse signup request");
        assert_eq!(parsed.display_name, "Ada");
        assert_eq!(parsed.confirm_password, "secret-pw");
    }

    #[test]
    fn auth_response_serializes_camel_case_tokens() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            display_name: "Ada".to_string(),
            username: "ada".to_string(),
            email: "ada@example.com".to_string(),
            bio: None,
            avatar_url: None,
            is_email_verified: true,
            password_changed_at: None,
            last_login: None,
            created_at: Utc::now(),
        };
        let response = AuthResponse {
            success: true,
            user: PublicUser::from(&user),
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
        };
        let value = serde_json::to_value(&response).expect("serialize auth response");
        assert_eq!(value["success"], true);
        assert_eq!(value["accessToken"], "a");
        assert_eq!(value["refreshToken"], "r");
        assert_eq!(value["user"]["isEmailVerified"], true);
        assert!(value["user"].get("passwordHash").is_none());
    }

    #[test]
    fn refresh_request_field_is_camel_case() {
        let parsed: RefreshRequest =
            serde_json::from_value(serde_json::json!({ "refreshToken": "abc" }))
                .expect("parse refresh request");
        assert_eq!(parsed.refresh_token, "abc");
    }
}
