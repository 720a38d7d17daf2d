//! Signed access and refresh tokens.
//!
//! Access tokens are short-lived and validated statelessly. Refresh tokens
//! are longer-lived and must additionally match a live row in the
//! `refresh_tokens` table before they are honored. Each class is signed
//! with an independent secret so leaking one cannot forge the other.

mod claims;
mod service;

pub use claims::{Claims, TokenType};
pub use service::{MIN_SECRET_LENGTH, TokenConfig, TokenError, TokenService};
