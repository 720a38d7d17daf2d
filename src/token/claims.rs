use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TokenError;

/// Which class of token a set of claims belongs to.
///
/// Encoded in the `typ` claim so a refresh token can never be replayed as an
/// access token even if the secrets were shared (they are not).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both token classes: user id, issue time, and expiry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Claims {
    /// User id as a string, per JWT convention.
    pub sub: String,
    /// Issue time (unix seconds); compared against `password_changed_at`.
    pub iat: i64,
    /// Expiry (unix seconds); enforced during decoding.
    pub exp: i64,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
}

impl Claims {
    /// Parse the subject back into a user id.
    ///
    /// # Errors
    /// Returns `TokenError::Invalid` if the subject is not a UUID.
    pub fn user_id(&self) -> Result<Uuid, TokenError> {
        Uuid::parse_str(&self.sub).map_err(|_| TokenError::Invalid)
    }

    /// Issue time as a timestamp, or `None` if `iat` is out of range.
    #[must_use]
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn user_id_round_trips() {
        let id = Uuid::new_v4();
        let claims = Claims {
            sub: id.to_string(),
            iat: 0,
            exp: 0,
            token_type: TokenType::Access,
        };
        assert_eq!(claims.user_id(), Ok(id));
    }

    #[test]
    fn user_id_rejects_non_uuid() {
        let claims = Claims {
            sub: "42".to_string(),
            iat: 0,
            exp: 0,
            token_type: TokenType::Access,
        };
        assert_eq!(claims.user_id(), Err(TokenError::Invalid));
    }

    #[test]
    fn issued_at_rejects_out_of_range() {
        let claims = Claims {
            sub: Uuid::nil().to_string(),
            iat: i64::MAX,
            exp: 0,
            token_type: TokenType::Refresh,
        };
        assert!(claims.issued_at().is_none());
    }

    #[test]
    fn token_type_serializes_lowercase() {
        let value = serde_json::to_value(TokenType::Refresh).ok();
        assert_eq!(value, Some(serde_json::json!("refresh")));
    }
}
