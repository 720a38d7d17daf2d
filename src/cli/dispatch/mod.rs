//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::auth;
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        access_token_secret: auth_opts.access_token_secret,
        refresh_token_secret: auth_opts.refresh_token_secret,
        access_token_ttl_minutes: auth_opts.access_token_ttl_minutes,
        refresh_token_ttl_days: auth_opts.refresh_token_ttl_days,
        frontend_base_url: auth_opts.frontend_base_url,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_token_secret_required() {
        temp_env::with_vars(
            [
                ("POEMVY_ACCESS_TOKEN_SECRET", None::<&str>),
                (
                    "POEMVY_REFRESH_TOKEN_SECRET",
                    Some("refresh-secret-32-bytes-long-001"),
                ),
                ("POEMVY_DSN", Some("postgres://user@localhost:5432/poemvy")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches =
                    command.get_matches_from(vec!["poemvy", "--access-token-secret", " "]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(
                        err.to_string()
                            .contains("missing required argument: --access-token-secret")
                    );
                }
            },
        );
    }

    #[test]
    fn server_action_from_matches() {
        temp_env::with_vars(
            [
                (
                    "POEMVY_ACCESS_TOKEN_SECRET",
                    Some("access-secret-32-bytes-long-0001"),
                ),
                (
                    "POEMVY_REFRESH_TOKEN_SECRET",
                    Some("refresh-secret-32-bytes-long-001"),
                ),
                ("POEMVY_DSN", Some("postgres://user@localhost:5432/poemvy")),
                ("POEMVY_PORT", Some("9000")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec!["poemvy"]);
                let action = handler(&matches).expect("server action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 9000);
                assert_eq!(args.access_token_ttl_minutes, 15);
                assert_eq!(args.refresh_token_ttl_days, 30);
            },
        );
    }
}
