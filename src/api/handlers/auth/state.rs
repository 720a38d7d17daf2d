//! Shared state handed to auth handlers via an axum `Extension`.

use std::sync::Arc;

use crate::api::cleanup::ContentCleanup;
use crate::api::email::MailSender;
use crate::api::handlers::auth::rate_limit::RateLimiter;
use crate::token::TokenService;

/// Deployment-level knobs for the auth flows.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    frontend_base_url: Option<String>,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Origin allowed by CORS and used in outbound mail links.
    #[must_use]
    pub fn with_frontend_base_url(mut self, url: impl Into<String>) -> Self {
        self.frontend_base_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> Option<&str> {
        self.frontend_base_url.as_deref()
    }
}

/// Everything the auth handlers need beyond the database pool.
pub struct AuthState {
    config: AuthConfig,
    tokens: TokenService,
    mailer: Arc<dyn MailSender>,
    rate_limiter: Arc<dyn RateLimiter>,
    cleanup: Arc<dyn ContentCleanup>,
}

impl AuthState {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        tokens: TokenService,
        mailer: Arc<dyn MailSender>,
        rate_limiter: Arc<dyn RateLimiter>,
        cleanup: Arc<dyn ContentCleanup>,
    ) -> Self {
        Self {
            config,
            tokens,
            mailer,
            rate_limiter,
            cleanup,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn mailer(&self) -> &dyn MailSender {
        self.mailer.as_ref()
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    #[must_use]
    pub fn cleanup(&self) -> &dyn ContentCleanup {
        self.cleanup.as_ref()
    }
}
