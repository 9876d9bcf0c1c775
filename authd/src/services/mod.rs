//! Services layer for authd.
//!
//! Business logic for account sign-up, confirmation, password reset and
//! token issuance.

pub mod auth;
pub mod clock;
pub mod confirmation;
pub mod email;
pub mod error;
pub mod rules;
pub mod tokens;

pub use auth::{AuthService, AuthSettings, ConfirmationSettings, PasswordSettings};
pub use clock::{Clock, ManualClock, SystemClock};
pub use confirmation::ConfirmationLedger;
pub use email::{LogMailer, MailError, MailRequest, Mailer, RecordingMailer, SmtpMailer};
pub use error::{AuthError, ErrorKind};
pub use rules::{FieldErrors, FieldRules};
pub use tokens::{AccessClaims, JwtSigner, Signer, Token, TokenIssuer};

/// Outcome of presenting a single-use credential.
///
/// `Refused` still keeps the writes made while handling it (a consumed
/// refresh token, a regenerated confirmation), so the caller commits before
/// reporting the error.
#[derive(Debug)]
pub enum Redeemed<T> {
    Accepted(T),
    Refused(AuthError),
}
