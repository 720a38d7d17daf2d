//! Outbound mail contract for one-time codes.
//!
//! The auth flows hand a fully rendered [`OtpMail`] to a [`MailSender`].
//! The sender decides how to deliver (SMTP, API, etc.) and returns
//! `Ok`/`Err`; a failed send is fatal to the triggering flow except where
//! enumeration resistance requires an opaque response (password-reset
//! request, resend-verification).
//!
//! The default sender for local dev is [`LogMailSender`], which logs the
//! recipient and purpose. The code itself is never logged anywhere.

use anyhow::Result;
use tracing::info;

/// Which flow a code belongs to; drives the subject and body copy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MailPurpose {
    EmailVerification,
    PasswordReset,
    EmailChange,
    PasswordChange,
}

impl MailPurpose {
    #[must_use]
    pub fn subject(self) -> &'static str {
        match self {
            Self::EmailVerification => "Your Poemvy Verification Code",
            Self::PasswordReset => "Password Reset Code - Poemvy",
            Self::EmailChange => "Email Change Code - Poemvy",
            Self::PasswordChange => "Password Change Code - Poemvy",
        }
    }

    #[must_use]
    pub fn intro(self) -> &'static str {
        match self {
            Self::EmailVerification => "Your verification code is:",
            Self::PasswordReset => {
                "You requested to reset your password. Use the code below to continue:"
            }
            Self::EmailChange => {
                "You requested to change your email address. Use the code below to confirm it:"
            }
            Self::PasswordChange => {
                "You requested to change your password. Use the code below to continue:"
            }
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::PasswordReset => "password_reset",
            Self::EmailChange => "email_change",
            Self::PasswordChange => "password_change",
        }
    }
}

/// A rendered one-time-code message ready for delivery.
#[derive(Clone, Debug)]
pub struct OtpMail {
    pub to_email: String,
    pub purpose: MailPurpose,
    /// Raw 6-digit code. Only ever transmitted to the user; never stored
    /// or logged by any sender implementation.
    pub code: String,
    pub expires_minutes: i64,
}

impl OtpMail {
    /// Plain-text body sent alongside any HTML template the sender adds.
    #[must_use]
    pub fn render_text(&self) -> String {
        format!(
            "{intro}\n\n{code}\n\nThis code will expire in {minutes} minutes.\n\
             Do not share this code with anyone.\n\
             If you didn't request this code, you can safely ignore this email.",
            intro = self.purpose.intro(),
            code = self.code,
            minutes = self.expires_minutes,
        )
    }
}

/// Mail delivery abstraction used by the auth flows.
pub trait MailSender: Send + Sync {
    /// Deliver a message or return an error so the flow can compensate.
    ///
    /// # Errors
    /// Returns an error when the message could not be handed to transport.
    fn send(&self, mail: &OtpMail) -> Result<()>;
}

/// Local dev sender that logs delivery metadata instead of sending email.
/// The code is redacted; only recipient and purpose are visible.
#[derive(Clone, Debug)]
pub struct LogMailSender;

impl MailSender for LogMailSender {
    fn send(&self, mail: &OtpMail) -> Result<()> {
        info!(
            to_email = %mail.to_email,
            purpose = mail.purpose.as_str(),
            expires_minutes = mail.expires_minutes,
            "otp mail send stub (code redacted)"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_text_contains_code_and_expiry() {
        let mail = OtpMail {
            to_email: "a@x.com".to_string(),
            purpose: MailPurpose::EmailVerification,
            code: "123456".to_string(),
            expires_minutes: 5,
        };
        let body = mail.render_text();
        assert!(body.contains("123456"));
        assert!(body.contains("expire in 5 minutes"));
        assert!(body.contains("Your verification code is:"));
    }

    #[test]
    fn subjects_vary_by_purpose() {
        assert_ne!(
            MailPurpose::EmailVerification.subject(),
            MailPurpose::PasswordReset.subject()
        );
        assert!(MailPurpose::PasswordReset.subject().contains("Password Reset"));
    }

    #[test]
    fn log_sender_accepts_mail() {
        let mail = OtpMail {
            to_email: "a@x.com".to_string(),
            purpose: MailPurpose::PasswordChange,
            code: "000000".to_string(),
            expires_minutes: 5,
        };
        assert!(LogMailSender.send(&mail).is_ok());
    }
}
