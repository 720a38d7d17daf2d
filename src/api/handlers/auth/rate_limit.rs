//! Rate limiting primitives for auth flows.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Signup,
    Login,
    VerifyEmail,
    ResendVerification,
    PasswordReset,
    PasswordChange,
    EmailChange,
}

impl RateLimitAction {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "signup",
            Self::Login => "login",
            Self::VerifyEmail => "verify_email",
            Self::ResendVerification => "resend_verification",
            Self::PasswordReset => "password_reset",
            Self::PasswordChange => "password_change",
            Self::EmailChange => "email_change",
        }
    }

    /// Window length and request ceiling per action.
    /// Auth attempts 5 per 15 min, OTP verification 10 per 15 min,
    /// reset/change requests 3 per hour.
    const fn limits(self) -> (Duration, u32) {
        match self {
            Self::Signup | Self::Login => (Duration::from_secs(15 * 60), 5),
            Self::VerifyEmail => (Duration::from_secs(15 * 60), 10),
            Self::ResendVerification => (Duration::from_secs(15 * 60), 5),
            Self::PasswordReset | Self::PasswordChange | Self::EmailChange => {
                (Duration::from_secs(60 * 60), 3)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window in-memory limiter keyed by (subject, action).
///
/// Good enough for a single instance; swap the trait implementation for a
/// shared store when running more than one replica.
#[derive(Debug, Default)]
pub struct WindowRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
}

impl WindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, key: String, action: RateLimitAction) -> RateLimitDecision {
        let (window, max_requests) = action.limits();
        let now = Instant::now();
        let Ok(mut windows) = self.windows.lock() else {
            // A poisoned lock should not lock everyone out.
            return RateLimitDecision::Allowed;
        };
        // Opportunistic pruning keeps the map from growing unbounded.
        if windows.len() > 4096 {
            windows.retain(|_, entry| now.duration_since(entry.started) < window);
        }
        let entry = windows.entry(key).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count = entry.count.saturating_add(1);
        if entry.count > max_requests {
            RateLimitDecision::Limited
        } else {
            RateLimitDecision::Allowed
        }
    }
}

impl RateLimiter for WindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Requests without a resolvable client IP are not limited by IP.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        self.check(format!("ip:{ip}:{}", action.as_str()), action)
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(format!("email:{email}:{}", action.as_str()), action)
    }
}
