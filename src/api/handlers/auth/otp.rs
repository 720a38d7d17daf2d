//! One-time-code store: purpose-scoped, hashed, attempt-capped codes.
//!
//! Only a sha256 digest of the 6-digit code is persisted; the plaintext is
//! returned once for mail dispatch and then dropped. Expiry is enforced
//! lazily at read time (expired rows are pruned when observed), and both
//! the attempt increment and the consumption are single guarded statements
//! so concurrent verifies can neither double-succeed nor under-count.

use anyhow::{Context, Result};
use rand::Rng;
use rand::rngs::OsRng;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::utils::hash_token;

/// Wrong guesses allowed before a code is invalidated server-side.
pub(super) const MAX_ATTEMPTS: i32 = 5;

/// The flow a code is valid for. Codes are never cross-usable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OtpPurpose {
    EmailVerification,
    PasswordReset,
    EmailChange,
    PasswordChange,
}

impl OtpPurpose {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
            Self::EmailChange => "email_change",
            Self::PasswordChange => "password_change",
        }
    }

    /// Email-change codes get a longer window; everything else is 5 minutes.
    pub(crate) fn ttl_minutes(self) -> i64 {
        match self {
            Self::EmailChange => 10,
            _ => 5,
        }
    }
}

/// Result of a verification attempt.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum OtpOutcome {
    /// Code matched and was consumed exactly once.
    Verified { user_id: Option<Uuid> },
    /// No code on record for this (email, purpose).
    NotFound,
    /// Code existed but its window has passed; the row was pruned.
    Expired,
    /// Code was already consumed (possibly by a concurrent request).
    AlreadyUsed,
    /// The attempt ceiling was reached; the code is dead before expiry.
    TooManyAttempts,
    /// Wrong code; the attempt counter was bumped.
    Mismatch,
}

impl OtpOutcome {
    /// Client-facing message for a failed attempt, `None` on success.
    /// NotFound/Expired/AlreadyUsed collapse into one message so a caller
    /// cannot probe code state.
    pub(super) fn rejection(&self) -> Option<&'static str> {
        match self {
            Self::Verified { .. } => None,
            Self::NotFound | Self::Expired | Self::AlreadyUsed => Some("Invalid or expired code"),
            Self::TooManyAttempts => Some("Too many attempts. Please request a new code"),
            Self::Mismatch => Some("Invalid code"),
        }
    }
}

/// Generate a uniformly random 6-digit code from the OS RNG.
pub(super) fn generate_code() -> String {
    let value: u32 = OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}

/// Issue a fresh code for (email, purpose), displacing any prior code for
/// the same pair so at most one valid code exists at a time.
///
/// Returns the plaintext code solely for transmission to the user.
pub(super) async fn issue(
    pool: &PgPool,
    email: &str,
    purpose: OtpPurpose,
    user_id: Option<Uuid>,
) -> Result<String> {
    let code = generate_code();
    let code_hash = hash_token(&code);

    let mut tx = pool.begin().await.context("begin otp issue transaction")?;

    let query = "DELETE FROM otp_codes WHERE email = $1 AND purpose = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete prior otp codes")?;

    let query = r"
        INSERT INTO otp_codes (email, purpose, user_id, code_hash, expires_at)
        VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 minute'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .bind(user_id)
        .bind(&code_hash)
        .bind(purpose.ttl_minutes())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert otp code")?;

    tx.commit().await.context("commit otp issue transaction")?;

    Ok(code)
}

/// Verify a candidate code against the stored one for (email, purpose).
///
/// Consumption is exactly-once: the success path flips `used` with a
/// guarded UPDATE, so a concurrent duplicate observes `AlreadyUsed`.
pub(super) async fn verify(
    pool: &PgPool,
    email: &str,
    purpose: OtpPurpose,
    candidate: &str,
) -> Result<OtpOutcome> {
    let query = r"
        SELECT id, user_id, code_hash, used, attempts, expires_at <= NOW() AS expired
        FROM otp_codes
        WHERE email = $1 AND purpose = $2
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup otp code")?;

    let Some(row) = row else {
        return Ok(OtpOutcome::NotFound);
    };

    let id: Uuid = row.get("id");
    let user_id: Option<Uuid> = row.get("user_id");
    let code_hash: Vec<u8> = row.get("code_hash");
    let used: bool = row.get("used");
    let attempts: i32 = row.get("attempts");
    let expired: bool = row.get("expired");

    if used {
        return Ok(OtpOutcome::AlreadyUsed);
    }
    if expired {
        delete_code(pool, id).await?;
        return Ok(OtpOutcome::Expired);
    }
    if attempts >= MAX_ATTEMPTS {
        delete_code(pool, id).await?;
        return Ok(OtpOutcome::TooManyAttempts);
    }

    if hash_token(candidate) != code_hash {
        return record_mismatch(pool, id).await;
    }

    // Guarded consumption: only one concurrent verify can flip `used`.
    let query = r"
        UPDATE otp_codes
        SET used = TRUE
        WHERE id = $1
          AND used = FALSE
          AND attempts < $2
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let consumed = sqlx::query(query)
        .bind(id)
        .bind(MAX_ATTEMPTS)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to consume otp code")?;

    if consumed.is_none() {
        return Ok(OtpOutcome::AlreadyUsed);
    }

    delete_code(pool, id).await?;
    Ok(OtpOutcome::Verified { user_id })
}

/// Atomic attempt bump; the ceiling check uses the returned value so two
/// concurrent wrong guesses cannot under-count.
async fn record_mismatch(pool: &PgPool, id: Uuid) -> Result<OtpOutcome> {
    let query = r"
        UPDATE otp_codes
        SET attempts = attempts + 1
        WHERE id = $1 AND used = FALSE
        RETURNING attempts
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to record otp mismatch")?;

    let Some(row) = row else {
        // Consumed concurrently between our read and this update.
        return Ok(OtpOutcome::AlreadyUsed);
    };

    let attempts: i32 = row.get("attempts");
    if attempts >= MAX_ATTEMPTS {
        delete_code(pool, id).await?;
        return Ok(OtpOutcome::TooManyAttempts);
    }
    Ok(OtpOutcome::Mismatch)
}

async fn delete_code(pool: &PgPool, id: Uuid) -> Result<()> {
    let query = "DELETE FROM otp_codes WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete otp code")?;
    Ok(())
}

/// Find the email a user has a pending code for, newest first. Email
/// change binds the code to the new address, so the confirm leg resolves
/// the target through this lookup.
pub(super) async fn pending_email_for_user(
    pool: &PgPool,
    user_id: Uuid,
    purpose: OtpPurpose,
) -> Result<Option<String>> {
    let query = r"
        SELECT email FROM otp_codes
        WHERE user_id = $1 AND purpose = $2 AND used = FALSE AND expires_at > NOW()
        ORDER BY created_at DESC
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(purpose.as_str())
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup pending otp email")?;
    Ok(row.map(|row| row.get("email")))
}

/// Best-effort removal of all codes for an email/purpose, used by the
/// signup compensation saga and account deletion.
pub(super) async fn delete_codes_for_email(
    pool: &PgPool,
    email: &str,
    purpose: OtpPurpose,
) -> Result<()> {
    let query = "DELETE FROM otp_codes WHERE email = $1 AND purpose = $2";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(purpose.as_str())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete otp codes for email")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use sqlx::postgres::PgPoolOptions;

    async fn migrated_pool() -> Result<PgPool> {
        let dsn = std::env::var("POEMVY_TEST_DSN").context("POEMVY_TEST_DSN not set")?;
        Ok(PgPoolOptions::new().max_connections(2).connect(&dsn).await?)
    }

    fn unique_email() -> String {
        format!("{}@example.com", Uuid::new_v4().simple())
    }

    /// Any 6-digit string other than the issued code.
    fn wrong_code(code: &str) -> &'static str {
        if code == "000000" { "000001" } else { "000000" }
    }

    #[tokio::test]
    #[ignore = "needs POEMVY_TEST_DSN pointing at a migrated database"]
    async fn verify_consumes_exactly_once() -> Result<()> {
        let pool = migrated_pool().await?;
        let email = unique_email();

        let code = issue(&pool, &email, OtpPurpose::PasswordReset, None).await?;
        let first = verify(&pool, &email, OtpPurpose::PasswordReset, &code).await?;
        assert_eq!(first, OtpOutcome::Verified { user_id: None });

        // The consumed row is gone; replaying the same code finds nothing.
        let second = verify(&pool, &email, OtpPurpose::PasswordReset, &code).await?;
        assert_eq!(second, OtpOutcome::NotFound);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "needs POEMVY_TEST_DSN pointing at a migrated database"]
    async fn attempt_ceiling_kills_the_code_early() -> Result<()> {
        let pool = migrated_pool().await?;
        let email = unique_email();

        let code = issue(&pool, &email, OtpPurpose::EmailVerification, None).await?;
        let wrong = wrong_code(&code);

        for _ in 0..(MAX_ATTEMPTS - 1) {
            let outcome = verify(&pool, &email, OtpPurpose::EmailVerification, wrong).await?;
            assert_eq!(outcome, OtpOutcome::Mismatch);
        }
        let outcome = verify(&pool, &email, OtpPurpose::EmailVerification, wrong).await?;
        assert_eq!(outcome, OtpOutcome::TooManyAttempts);

        // Even the right code is dead once the ceiling was hit.
        let outcome = verify(&pool, &email, OtpPurpose::EmailVerification, &code).await?;
        assert_eq!(outcome, OtpOutcome::NotFound);
        Ok(())
    }

    #[tokio::test]
    #[ignore = "needs POEMVY_TEST_DSN pointing at a migrated database"]
    async fn reissue_displaces_the_prior_code() -> Result<()> {
        let pool = migrated_pool().await?;
        let email = unique_email();

        let first = issue(&pool, &email, OtpPurpose::PasswordReset, None).await?;
        let second = issue(&pool, &email, OtpPurpose::PasswordReset, None).await?;

        if first != second {
            let outcome = verify(&pool, &email, OtpPurpose::PasswordReset, &first).await?;
            assert_eq!(outcome, OtpOutcome::Mismatch);
        }
        let outcome = verify(&pool, &email, OtpPurpose::PasswordReset, &second).await?;
        assert_eq!(outcome, OtpOutcome::Verified { user_id: None });
        Ok(())
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..64 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|byte| byte.is_ascii_digit()));
        }
    }

    #[test]
    fn ttl_is_longer_for_email_change() {
        assert_eq!(OtpPurpose::EmailChange.ttl_minutes(), 10);
        assert_eq!(OtpPurpose::EmailVerification.ttl_minutes(), 5);
        assert_eq!(OtpPurpose::PasswordReset.ttl_minutes(), 5);
        assert_eq!(OtpPurpose::PasswordChange.ttl_minutes(), 5);
    }

    #[test]
    fn purposes_have_distinct_labels() {
        let labels = [
            OtpPurpose::EmailVerification.as_str(),
            OtpPurpose::PasswordReset.as_str(),
            OtpPurpose::EmailChange.as_str(),
            OtpPurpose::PasswordChange.as_str(),
        ];
        for (index, label) in labels.iter().enumerate() {
            for other in &labels[index + 1..] {
                assert_ne!(label, other);
            }
        }
    }

    #[test]
    fn rejection_messages_do_not_leak_state() {
        assert_eq!(
            OtpOutcome::NotFound.rejection(),
            OtpOutcome::Expired.rejection()
        );
        assert_eq!(
            OtpOutcome::NotFound.rejection(),
            OtpOutcome::AlreadyUsed.rejection()
        );
        assert!(OtpOutcome::Verified { user_id: None }.rejection().is_none());
        assert!(OtpOutcome::TooManyAttempts.rejection().is_some());
    }
}
