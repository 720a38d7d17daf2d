//! Password hashing and verification.
//!
//! Passwords are hashed with Argon2id and stored as PHC strings. The raw
//! password is only held long enough to hash or verify; it is never logged
//! and never compared in plaintext.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordVerifier,
    password_hash::{PasswordHash, PasswordHasher, SaltString, rand_core::OsRng},
};

/// Hash a password with Argon2id and a fresh random salt.
///
/// # Errors
/// Returns an error if hashing fails (e.g. invalid parameters).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a candidate password against a stored PHC hash.
///
/// Unparseable hashes and mismatches both return `false`; the caller only
/// learns pass/fail, never why.
#[must_use]
pub fn verify_password(candidate: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(candidate.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn hash_and_verify_round_trip() -> Result<()> {
        let hash = hash_password("longpass1")?;
        assert!(verify_password("longpass1", &hash));
        Ok(())
    }

    #[test]
    fn verify_rejects_wrong_password() -> Result<()> {
        let hash = hash_password("longpass1")?;
        // One character off must fail like any other wrong password.
        assert!(!verify_password("longpass2", &hash));
        assert!(!verify_password("", &hash));
        Ok(())
    }

    #[test]
    fn hash_is_not_plaintext() -> Result<()> {
        let hash = hash_password("longpass1")?;
        assert_ne!(hash, "longpass1");
        assert!(hash.starts_with("$argon2id$"));
        Ok(())
    }

    #[test]
    fn hashes_are_salted() -> Result<()> {
        let first = hash_password("longpass1")?;
        let second = hash_password("longpass1")?;
        assert_ne!(first, second);
        Ok(())
    }

    #[test]
    fn verify_rejects_garbage_hash() {
        assert!(!verify_password("longpass1", "not-a-phc-string"));
    }
}
