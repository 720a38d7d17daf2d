use crate::api;
use crate::api::cleanup::LogContentCleanup;
use crate::api::email::LogMailSender;
use crate::api::handlers::auth::rate_limit::WindowRateLimiter;
use crate::api::handlers::auth::state::{AuthConfig, AuthState};
use crate::token::{TokenConfig, TokenService};
use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub access_token_secret: SecretString,
    pub refresh_token_secret: SecretString,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub frontend_base_url: Option<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the token secrets are invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let token_config = TokenConfig::new(args.access_token_secret, args.refresh_token_secret)
        .context("Invalid token configuration")?
        .with_access_ttl_minutes(args.access_token_ttl_minutes)
        .with_refresh_ttl_days(args.refresh_token_ttl_days);

    let mut auth_config = AuthConfig::new();
    if let Some(url) = args.frontend_base_url {
        auth_config = auth_config.with_frontend_base_url(url);
    }

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        TokenService::new(token_config),
        Arc::new(LogMailSender),
        Arc::new(WindowRateLimiter::new()),
        Arc::new(LogContentCleanup),
    ));

    api::new(args.port, args.dsn, auth_state).await
}
