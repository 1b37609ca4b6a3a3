//! Worker-side processing of mail jobs.

use std::sync::Arc;

use queue_core::{Job, JobProcessor, JobResult, ProcessFuture};

use crate::{MailJob, Mailer};

/// Delivers the mail described by each job's payload.
pub struct MailProcessor<M> {
    mailer: Arc<M>,
}

impl<M: Mailer> MailProcessor<M> {
    pub fn new(mailer: Arc<M>) -> Self {
        Self { mailer }
    }
}

impl<M: Mailer> JobProcessor for MailProcessor<M> {
    fn process(&self, job: &Job) -> ProcessFuture {
        let mailer = self.mailer.clone();
        let mail = job.payload_as::<MailJob>();
        let id = job.id;
        Box::pin(async move {
            let mail = mail.map_err(|e| format!("Malformed mail payload: {}", e))?;
            mailer.send_otp(&mail).await.map_err(|e| e.to_string())?;
            tracing::debug!("Mail job {} delivered to {}", id, mail.email);
            Ok(JobResult::new(format!("OTP sent to {}", mail.email)))
        })
    }
}
