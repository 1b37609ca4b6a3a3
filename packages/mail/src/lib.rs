//! The mail queue: one-time-password mails sent in the background.
//!
//! ```ignore
//! let queue = mail::mail_queue(channel, Arc::new(TracingMailer));
//! manager.start_and_register(queue.clone()).await?;
//! mail::send_otp(&queue, "Ada", "ada@example.com", "424242").await?;
//! ```

mod mailer;
mod processor;

use std::sync::Arc;

use queue_core::{Job, JobOptions, QueueChannel, QueueResult};
use queues::QueueService;
use serde::{Deserialize, Serialize};

pub use mailer::{MailError, Mailer, TracingMailer};
pub use processor::MailProcessor;

/// Name of the mail queue.
pub const MAIL_QUEUE: &str = "mail";

/// Delivery attempts per OTP mail.
pub const OTP_ATTEMPTS: u32 = 3;

/// Fixed delay before an OTP mail is retried.
pub const OTP_BACKOFF_MS: u64 = 2_000;

/// Payload of a mail job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailJob {
    pub name: String,
    pub email: String,
    pub otp: String,
}

pub type MailQueue = QueueService<MailJob>;

/// Build the mail queue service over a channel named [`MAIL_QUEUE`].
pub fn mail_queue<M: Mailer>(channel: Arc<dyn QueueChannel>, mailer: Arc<M>) -> Arc<MailQueue> {
    Arc::new(QueueService::new(channel).with_processor(Arc::new(MailProcessor::new(mailer))))
}

/// Queue an OTP mail.
pub async fn send_otp(
    queue: &MailQueue,
    name: impl Into<String>,
    email: impl Into<String>,
    otp: impl Into<String>,
) -> QueueResult<Job> {
    let mail = MailJob {
        name: name.into(),
        email: email.into(),
        otp: otp.into(),
    };
    let options = JobOptions::new()
        .with_attempts(OTP_ATTEMPTS)
        .with_backoff_ms(OTP_BACKOFF_MS);
    queue.add_job(&mail, options).await
}
