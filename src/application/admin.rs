use crate::config::CleanConfig;
use crate::error::Result;
use crate::queue::{FinishedBucket, JobQueueRef, QueueCounts};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

/// Number of history entries removed by [`QueueAdmin::clean`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub completed: usize,
    pub failed: usize,
}

/// Operational controls over one queue.
pub struct QueueAdmin {
    queue: JobQueueRef,
    clean: CleanConfig,
}

impl QueueAdmin {
    pub fn new(queue: JobQueueRef, clean: CleanConfig) -> Self {
        Self { queue, clean }
    }

    pub async fn status(&self) -> Result<QueueCounts> {
        self.queue.counts().await
    }

    /// Stops new jobs from starting; active jobs run to completion.
    pub async fn pause(&self) -> Result<()> {
        self.queue.pause().await
    }

    pub async fn resume(&self) -> Result<()> {
        self.queue.resume().await
    }

    /// Sweeps the completed history, then the failed history.
    pub async fn clean(&self) -> Result<CleanReport> {
        let grace = Duration::from_millis(self.clean.grace_ms);
        let completed = self
            .queue
            .clean(grace, self.clean.limit, FinishedBucket::Completed)
            .await?;
        let failed = self
            .queue
            .clean(grace, self.clean.limit, FinishedBucket::Failed)
            .await?;

        let report = CleanReport {
            completed: completed.len(),
            failed: failed.len(),
        };
        info!(queue = %self.queue.name(), completed = report.completed, failed = report.failed, "Queue history cleaned");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PaymentId;
    use crate::queue::{
        InMemoryJobQueue, JobFailure, JobOptions, JobPayload, JobQueue, NotificationJob,
        NotificationType, PAYMENT_QUEUE,
    };
    use serde_json::json;
    use std::sync::Arc;

    fn payload() -> JobPayload {
        JobPayload::SendNotification(NotificationJob {
            notification_type: NotificationType::PaymentFailure,
            payment_id: PaymentId::new(),
            recipient: None,
            amount: None,
        })
    }

    async fn finish(queue: &InMemoryJobQueue, succeed: bool) {
        queue.add(payload(), JobOptions::default()).await.unwrap();
        let job = queue.next().await.unwrap();
        if succeed {
            queue.complete(job.lease(), json!({ "success": true })).await.unwrap();
        } else {
            queue
                .fail(job.lease(), JobFailure::fatal("boom"))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_clean_sweeps_completed_then_failed() {
        let queue = Arc::new(InMemoryJobQueue::new(PAYMENT_QUEUE));
        finish(&queue, true).await;
        finish(&queue, true).await;
        finish(&queue, false).await;

        let admin = QueueAdmin::new(queue.clone(), CleanConfig::default());
        let report = admin.clean().await.unwrap();

        assert_eq!(
            report,
            CleanReport {
                completed: 2,
                failed: 1
            }
        );
        let counts = admin.status().await.unwrap();
        assert_eq!((counts.completed, counts.failed), (0, 0));
    }

    #[tokio::test]
    async fn test_clean_honours_limit() {
        let queue = Arc::new(InMemoryJobQueue::new(PAYMENT_QUEUE));
        for _ in 0..3 {
            finish(&queue, true).await;
        }
        let admin = QueueAdmin::new(
            queue.clone(),
            CleanConfig {
                grace_ms: 0,
                limit: 2,
            },
        );
        assert_eq!(admin.clean().await.unwrap().completed, 2);
        assert_eq!(admin.status().await.unwrap().completed, 1);
    }

    #[tokio::test]
    async fn test_pause_and_resume_are_reflected_in_status() {
        let queue = Arc::new(InMemoryJobQueue::new(PAYMENT_QUEUE));
        let admin = QueueAdmin::new(queue.clone(), CleanConfig::default());

        admin.pause().await.unwrap();
        queue.add(payload(), JobOptions::default()).await.unwrap();
        let counts = admin.status().await.unwrap();
        assert!(counts.paused);
        assert_eq!(counts.waiting, 1);

        admin.resume().await.unwrap();
        assert!(!admin.status().await.unwrap().paused);
        let job = queue.next().await.unwrap();
        assert_eq!(job.id.value(), 1);
    }
}
