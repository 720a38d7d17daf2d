use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use uuid::Uuid;

use super::{Claims, TokenType};

/// Minimum length for either signing secret, in bytes.
pub const MIN_SECRET_LENGTH: usize = 32;

const DEFAULT_ACCESS_TTL_MINUTES: i64 = 15;
const DEFAULT_REFRESH_TTL_DAYS: i64 = 30;

/// Token validation/issuance failures.
///
/// `Expired` and `Invalid` are deliberately the only two validation
/// outcomes; callers collapse them into one generic message for clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Invalid,
    Configuration(String),
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expired => write!(f, "token expired"),
            Self::Invalid => write!(f, "token invalid"),
            Self::Configuration(msg) => write!(f, "token configuration error: {msg}"),
        }
    }
}

impl std::error::Error for TokenError {}

/// Signing secrets and lifetimes for both token classes.
#[derive(Clone)]
pub struct TokenConfig {
    access_secret: SecretString,
    refresh_secret: SecretString,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"***")
            .field("refresh_secret", &"***")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish()
    }
}

impl TokenConfig {
    /// Create a config with default lifetimes (15 minute access, 30 day refresh).
    ///
    /// # Errors
    /// Returns `TokenError::Configuration` if either secret is shorter than
    /// [`MIN_SECRET_LENGTH`] bytes or both secrets are identical.
    pub fn new(
        access_secret: SecretString,
        refresh_secret: SecretString,
    ) -> Result<Self, TokenError> {
        for (name, secret) in [
            ("access token secret", &access_secret),
            ("refresh token secret", &refresh_secret),
        ] {
            if secret.expose_secret().len() < MIN_SECRET_LENGTH {
                return Err(TokenError::Configuration(format!(
                    "{name} must be at least {MIN_SECRET_LENGTH} bytes"
                )));
            }
        }
        // Shared secrets would collapse the two token classes into one.
        if access_secret.expose_secret() == refresh_secret.expose_secret() {
            return Err(TokenError::Configuration(
                "access and refresh token secrets must differ".to_string(),
            ));
        }
        Ok(Self {
            access_secret,
            refresh_secret,
            access_ttl: Duration::minutes(DEFAULT_ACCESS_TTL_MINUTES),
            refresh_ttl: Duration::days(DEFAULT_REFRESH_TTL_DAYS),
        })
    }

    #[must_use]
    pub fn with_access_ttl_minutes(mut self, minutes: i64) -> Self {
        self.access_ttl = Duration::minutes(minutes.max(1));
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_days(mut self, days: i64) -> Self {
        self.refresh_ttl = Duration::days(days.max(1));
        self
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }
}

/// Issues and validates both token classes with independent keys.
pub struct TokenService {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(config: TokenConfig) -> Self {
        let access = config.access_secret.expose_secret().as_bytes();
        let refresh = config.refresh_secret.expose_secret().as_bytes();
        Self {
            access_encoding: EncodingKey::from_secret(access),
            access_decoding: DecodingKey::from_secret(access),
            refresh_encoding: EncodingKey::from_secret(refresh),
            refresh_decoding: DecodingKey::from_secret(refresh),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    /// Mint a short-lived access token for the user.
    ///
    /// # Errors
    /// Returns `TokenError::Invalid` if signing fails.
    pub fn issue_access_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.issue(user_id, TokenType::Access)
    }

    /// Mint a refresh token for the user. The caller is responsible for
    /// persisting its hash so it can later be revoked.
    ///
    /// # Errors
    /// Returns `TokenError::Invalid` if signing fails.
    pub fn issue_refresh_token(&self, user_id: Uuid) -> Result<String, TokenError> {
        self.issue(user_id, TokenType::Refresh)
    }

    fn issue(&self, user_id: Uuid, token_type: TokenType) -> Result<String, TokenError> {
        let now = Utc::now();
        let (key, ttl) = match token_type {
            TokenType::Access => (&self.access_encoding, self.access_ttl),
            TokenType::Refresh => (&self.refresh_encoding, self.refresh_ttl),
        };
        let claims = Claims {
            sub: user_id.to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            token_type,
        };
        jsonwebtoken::encode(&Header::default(), &claims, key).map_err(|_| TokenError::Invalid)
    }

    /// Validate an access token: signature, expiry, and token class.
    ///
    /// # Errors
    /// `Expired` for an expired signature, `Invalid` for everything else,
    /// including refresh tokens presented as access tokens.
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate(token, &self.access_decoding, TokenType::Access)
    }

    /// Validate a refresh token cryptographically. Membership in the user's
    /// live token set is checked separately by the storage layer.
    ///
    /// # Errors
    /// `Expired` for an expired signature, `Invalid` for everything else.
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, TokenError> {
        self.validate(token, &self.refresh_decoding, TokenType::Refresh)
    }

    fn validate(
        &self,
        token: &str,
        key: &DecodingKey,
        expected: TokenType,
    ) -> Result<Claims, TokenError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = jsonwebtoken::decode::<Claims>(token, key, &validation).map_err(|err| {
            match err.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        if data.claims.token_type != expected {
            return Err(TokenError::Invalid);
        }
        Ok(data.claims)
    }

    #[must_use]
    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    #[must_use]
    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TokenConfig {
        TokenConfig::new(
            SecretString::from("access-secret-32-bytes-long-0001".to_string()),
            SecretString::from("refresh-secret-32-bytes-long-001".to_string()),
        )
        .expect("valid config")
    }

    #[test]
    fn access_token_round_trips() -> Result<(), TokenError> {
        let service = TokenService::new(config());
        let user_id = Uuid::new_v4();
        let token = service.issue_access_token(user_id)?;
        let claims = service.validate_access_token(&token)?;
        assert_eq!(claims.user_id()?, user_id);
        assert_eq!(claims.token_type, TokenType::Access);
        Ok(())
    }

    #[test]
    fn refresh_token_round_trips() -> Result<(), TokenError> {
        let service = TokenService::new(config());
        let user_id = Uuid::new_v4();
        let token = service.issue_refresh_token(user_id)?;
        let claims = service.validate_refresh_token(&token)?;
        assert_eq!(claims.user_id()?, user_id);
        assert_eq!(claims.token_type, TokenType::Refresh);
        Ok(())
    }

    #[test]
    fn classes_are_not_interchangeable() -> Result<(), TokenError> {
        let service = TokenService::new(config());
        let user_id = Uuid::new_v4();
        let access = service.issue_access_token(user_id)?;
        let refresh = service.issue_refresh_token(user_id)?;
        assert_eq!(
            service.validate_access_token(&refresh),
            Err(TokenError::Invalid)
        );
        assert_eq!(
            service.validate_refresh_token(&access),
            Err(TokenError::Invalid)
        );
        Ok(())
    }

    #[test]
    fn wrong_secret_is_invalid() -> Result<(), TokenError> {
        let service = TokenService::new(config());
        let other = TokenService::new(
            TokenConfig::new(
                SecretString::from("access-secret-32-bytes-long-0002".to_string()),
                SecretString::from("refresh-secret-32-bytes-long-002".to_string()),
            )
            .expect("valid config"),
        );
        let token = service.issue_access_token(Uuid::new_v4())?;
        assert_eq!(
            other.validate_access_token(&token),
            Err(TokenError::Invalid)
        );
        Ok(())
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let service = TokenService::new(config());
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            iat: Utc::now().timestamp() - 7200,
            exp: Utc::now().timestamp() - 3600,
            token_type: TokenType::Access,
        };
        let key = EncodingKey::from_secret(b"access-secret-32-bytes-long-0001");
        let token =
            jsonwebtoken::encode(&Header::default(), &claims, &key).expect("encode test token");
        assert_eq!(
            service.validate_access_token(&token),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn short_secret_is_rejected() {
        let result = TokenConfig::new(
            SecretString::from("short".to_string()),
            SecretString::from("refresh-secret-32-bytes-long-001".to_string()),
        );
        assert!(matches!(result, Err(TokenError::Configuration(_))));
    }

    #[test]
    fn identical_secrets_are_rejected() {
        let result = TokenConfig::new(
            SecretString::from("same-secret-32-bytes-long-000001".to_string()),
            SecretString::from("same-secret-32-bytes-long-000001".to_string()),
        );
        assert!(matches!(result, Err(TokenError::Configuration(_))));
    }

    #[test]
    fn ttl_overrides_apply() {
        let config = config()
            .with_access_ttl_minutes(5)
            .with_refresh_ttl_days(7);
        assert_eq!(config.access_ttl(), Duration::minutes(5));
        assert_eq!(config.refresh_ttl(), Duration::days(7));
    }

    #[test]
    fn garbage_token_is_invalid() {
        let service = TokenService::new(config());
        assert_eq!(
            service.validate_access_token("not-a-token"),
            Err(TokenError::Invalid)
        );
    }
}
