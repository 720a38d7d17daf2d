//! Authentication and account flows.
//!
//! Signup, email verification via one-time codes, login, session
//! refresh/logout, password reset, and password/email change. All
//! verification codes and refresh tokens are stored hashed.

pub mod email_change;
pub mod gate;
pub mod login;
pub mod password_change;
pub mod password_reset;
pub mod rate_limit;
pub mod session;
pub mod signup;
pub mod state;
pub mod types;

pub mod storage;

pub(crate) mod otp;
pub(crate) mod utils;
