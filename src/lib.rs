//! # Poemvy (Authentication & Account Core)
//!
//! `poemvy` is the authentication and credential-verification core of the
//! Poemvy poem-sharing service. It handles signup, email verification via
//! 6-digit one-time codes, login, password reset and change, email change,
//! and JWT-based session management with access/refresh token pairs.
//!
//! ## Accounts & Verification
//!
//! - **Normalization:** Usernames and emails are lowercased and trimmed
//!   before every uniqueness check (`[a-z0-9_]{3,30}` for usernames).
//! - **Verification-gated sessions:** A freshly signed-up account holds no
//!   session; the first access/refresh pair is minted when the emailed
//!   code is consumed. Login against an unverified account re-delivers a
//!   code and returns the `requiresEmailVerification` signal instead.
//! - **One-time codes:** Codes are stored as sha256 digests, expire after
//!   5 minutes (10 for email change), die after 5 wrong attempts, and are
//!   consumed exactly once.
//!
//! ## Sessions
//!
//! Access tokens are short-lived stateless JWTs; refresh tokens are JWTs
//! whose sha256 digest must also be on record, so they can be revoked.
//! Password change and reset rotate the hash and revoke every refresh
//! session in one transaction, and access tokens issued before the change
//! are rejected by the session gate.

pub mod api;
pub mod cli;
pub mod password;
pub mod token;
