use async_trait::async_trait;
use shared::{JobEnvelope, JobType, NotificationJob};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::error::{JobFailure, QueueError};
use crate::queue::{submit, JobContext, JobHandler, JobQueue};

pub const BLACKLISTED_NUMBERS: [&str; 2] = ["4153518780", "4153518781"];

/// Enqueues one `push_notification_code` job per entry.
pub async fn create_push_notifications_jobs(
    queue: &dyn JobQueue,
    jobs: &[NotificationJob],
) -> Result<Vec<Uuid>, QueueError> {
    let mut ids = Vec::with_capacity(jobs.len());
    for job in jobs {
        let id = submit(queue, JobType::PushNotificationCode, job).await?;
        info!("Notification job created: {}", id);
        ids.push(id);
    }
    Ok(ids)
}

pub struct NotificationWorker {
    blacklist: HashSet<String>,
}

impl NotificationWorker {
    pub fn new<I, S>(blacklist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            blacklist: blacklist.into_iter().map(Into::into).collect(),
        }
    }

    pub fn send_notification(&self, job: &NotificationJob, ctx: &JobContext) -> Result<(), JobFailure> {
        ctx.progress(0, 100);

        if self.blacklist.contains(&job.phone_number) {
            return Err(JobFailure::terminal(format!(
                "Phone number {} is blacklisted",
                job.phone_number
            )));
        }

        ctx.progress(50, 100);
        info!(
            "Sending notification to {}, with message: {}",
            job.phone_number, job.message
        );
        Ok(())
    }
}

impl Default for NotificationWorker {
    fn default() -> Self {
        Self::new(BLACKLISTED_NUMBERS)
    }
}

#[async_trait]
impl JobHandler for NotificationWorker {
    async fn handle(&self, job: &JobEnvelope, ctx: &JobContext) -> Result<(), JobFailure> {
        let notification: NotificationJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobFailure::terminal(format!("Invalid notification payload: {}", e)))?;
        self.send_notification(&notification, ctx)
    }
}
