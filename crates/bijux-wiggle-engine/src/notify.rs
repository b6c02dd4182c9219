// SPDX-License-Identifier: Apache-2.0

use bijux_wiggle_model::{JobContext, JobId, JobStatus};

/// Outbound notifications about a job. Rendering and delivery (email, web)
/// belong to the implementor.
pub trait Notifier: Send + Sync {
    fn acknowledged(&self, job_id: JobId, description: &str, emails: &[String]);
    fn finished(&self, context: &JobContext, status: JobStatus, url: Option<&str>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn acknowledged(&self, job_id: JobId, description: &str, emails: &[String]) {
        tracing::info!(job_id = job_id.0, description, recipients = emails.len(), "job acknowledged");
    }

    fn finished(&self, context: &JobContext, status: JobStatus, url: Option<&str>) {
        tracing::info!(
            job_id = context.job_id.0,
            status = status.as_str(),
            location = %context.destination,
            url = url.unwrap_or_default(),
            recipients = context.emails.len(),
            "job finished"
        );
    }
}
