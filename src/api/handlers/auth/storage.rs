//! Persistence for accounts and refresh sessions.
//!
//! Every query carries a `db.query` span. Refresh tokens are stored as
//! sha256 digests; the raw JWT never reaches the database. Password
//! rotation and session revocation happen in one transaction so a
//! crash cannot leave old sessions alive under a new password.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::{hash_token, is_unique_violation};

/// Account fields exposed to handlers. The password hash is deliberately
/// absent; use [`lookup_login_record`] or [`lookup_password_hash`] where
/// it is needed.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub id: Uuid,
    pub display_name: String,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    pub is_email_verified: bool,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The minimum needed to decide a login attempt.
pub struct LoginRecord {
    pub id: Uuid,
    pub password_hash: String,
    pub is_email_verified: bool,
}

pub struct NewUser {
    pub display_name: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

pub enum CreateUserOutcome {
    Created(Uuid),
    /// Username or email already taken. Which one is not reported.
    Conflict,
}

pub enum UpdateEmailOutcome {
    Updated,
    Conflict,
}

const USER_COLUMNS: &str = "id, display_name, username, email, bio, avatar_url, \
     is_email_verified, password_changed_at, last_login, created_at";

fn user_from_row(row: &sqlx::postgres::PgRow) -> AuthUser {
    AuthUser {
        id: row.get("id"),
        display_name: row.get("display_name"),
        username: row.get("username"),
        email: row.get("email"),
        bio: row.get("bio"),
        avatar_url: row.get("avatar_url"),
        is_email_verified: row.get("is_email_verified"),
        password_changed_at: row.get("password_changed_at"),
        last_login: row.get("last_login"),
        created_at: row.get("created_at"),
    }
}

/// Insert a new unverified account. Uniqueness is left to the database
/// constraints so concurrent signups race safely.
pub(super) async fn create_user(pool: &PgPool, user: &NewUser) -> Result<CreateUserOutcome> {
    let query = r"
        INSERT INTO users (display_name, username, email, password_hash)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(&user.display_name)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(pool)
        .instrument(span)
        .await;

    match result {
        Ok(row) => Ok(CreateUserOutcome::Created(row.get("id"))),
        Err(err) if is_unique_violation(&err) => Ok(CreateUserOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(super) async fn lookup_login_record(
    pool: &PgPool,
    email: &str,
) -> Result<Option<LoginRecord>> {
    let query = "SELECT id, password_hash, is_email_verified FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login record")?;

    Ok(row.map(|row| LoginRecord {
        id: row.get("id"),
        password_hash: row.get("password_hash"),
        is_email_verified: row.get("is_email_verified"),
    }))
}

pub(super) async fn lookup_user(pool: &PgPool, id: Uuid) -> Result<Option<AuthUser>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by id")?;

    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn lookup_user_by_email(pool: &PgPool, email: &str) -> Result<Option<AuthUser>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn lookup_password_hash(pool: &PgPool, id: Uuid) -> Result<Option<String>> {
    let query = "SELECT password_hash FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup password hash")?;

    Ok(row.map(|row| row.get("password_hash")))
}

pub(super) async fn email_registered(pool: &PgPool, email: &str) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1) AS present";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check email registration")?;
    Ok(row.get("present"))
}

/// Flip the verified flag after a successful code check. Also stamps
/// `last_login` because verification logs the user in.
pub(super) async fn mark_email_verified(pool: &PgPool, email: &str) -> Result<Option<AuthUser>> {
    let query = format!(
        "UPDATE users SET is_email_verified = TRUE, last_login = NOW(), updated_at = NOW() \
         WHERE email = $1 RETURNING {USER_COLUMNS}"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;

    Ok(row.as_ref().map(user_from_row))
}

pub(super) async fn stamp_last_login(pool: &PgPool, id: Uuid) -> Result<()> {
    let query = "UPDATE users SET last_login = NOW() WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to stamp last login")?;
    Ok(())
}

/// Record a freshly issued refresh token, stored as a digest.
pub(super) async fn add_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &str,
    ttl_days: i64,
) -> Result<()> {
    let token_hash = hash_token(token);
    let query = r"
        INSERT INTO refresh_tokens (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 day'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&token_hash)
        .bind(ttl_days)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to store refresh token")?;
    Ok(())
}

/// A refresh token is live when its digest is on record and unexpired.
/// Revoked or rotated-away tokens simply have no row.
pub(super) async fn refresh_token_live(pool: &PgPool, user_id: Uuid, token: &str) -> Result<bool> {
    let token_hash = hash_token(token);
    let query = r"
        SELECT EXISTS(
            SELECT 1 FROM refresh_tokens
            WHERE user_id = $1 AND token_hash = $2 AND expires_at > NOW()
        ) AS live
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(&token_hash)
        .fetch_one(pool)
        .instrument(span)
        .await
        .context("failed to check refresh token")?;
    Ok(row.get("live"))
}

/// Drop a single refresh session. Unknown tokens are a no-op so logout
/// stays idempotent.
pub(super) async fn revoke_refresh_token(pool: &PgPool, user_id: Uuid, token: &str) -> Result<()> {
    let token_hash = hash_token(token);
    let query = "DELETE FROM refresh_tokens WHERE user_id = $1 AND token_hash = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(&token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke refresh token")?;
    Ok(())
}

/// Rotate the password and revoke every refresh session in one
/// transaction. `password_changed_at` moves forward so access tokens
/// issued before this moment fail the session gate.
pub(super) async fn set_password_and_revoke_sessions(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<()> {
    let mut tx = pool
        .begin()
        .await
        .context("begin password rotation transaction")?;

    let query = r"
        UPDATE users
        SET password_hash = $2, password_changed_at = NOW(), updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;

    let query = "DELETE FROM refresh_tokens WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to revoke refresh sessions")?;

    tx.commit().await.context("commit password rotation")?;
    Ok(())
}

/// Point the account at a new, verified email address.
pub(super) async fn update_email_verified(
    pool: &PgPool,
    user_id: Uuid,
    new_email: &str,
) -> Result<UpdateEmailOutcome> {
    let query = r"
        UPDATE users
        SET email = $2, is_email_verified = TRUE, updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(new_email)
        .execute(pool)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(UpdateEmailOutcome::Updated),
        Err(err) if is_unique_violation(&err) => Ok(UpdateEmailOutcome::Conflict),
        Err(err) => Err(err).context("failed to update email"),
    }
}

/// Remove the user row. Refresh tokens cascade via the FK.
pub(crate) async fn delete_user(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "DELETE FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user")?;
    Ok(())
}
