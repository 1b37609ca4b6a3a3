//! Mail delivery seam.

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::MailJob;

/// Errors raised while delivering mail.
#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Sends one-time-password mails.
pub trait Mailer: Send + Sync + 'static {
    fn send_otp<'a>(&'a self, mail: &'a MailJob) -> BoxFuture<'a, Result<(), MailError>>;
}

/// Mailer that only logs what it would send.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMailer;

impl Mailer for TracingMailer {
    fn send_otp<'a>(&'a self, mail: &'a MailJob) -> BoxFuture<'a, Result<(), MailError>> {
        Box::pin(async move {
            if !mail.email.contains('@') {
                return Err(MailError::InvalidRecipient(mail.email.clone()));
            }
            tracing::info!("Sending OTP mail to {} <{}>", mail.name, mail.email);
            Ok(())
        })
    }
}
