//! Job queue abstraction.
//!
//! A queue holds jobs in five buckets (waiting, delayed, active, completed,
//! failed). Among ready jobs the lowest priority value dequeues first, FIFO
//! within a priority. Delayed jobs become ready once their delay elapses.
//! Failed attempts are rescheduled with the job's backoff until its attempt
//! budget is spent, after which the job lands in the failed bucket. Every
//! bucket change is published as a [`QueueEvent`].
//!
//! The queue is always passed around explicitly as a [`JobQueueRef`]; the
//! enqueuing services and the workers share the same handle.

pub mod event;
pub mod job;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub use event::{JobEvent, QueueEvent};
pub use job::{
    Backoff, BackoffKind, Job, JobFailure, JobId, JobKind, JobLease, JobOptions, JobPayload,
    JobState, NotificationJob, NotificationType, PaymentJob,
};
pub use memory::InMemoryJobQueue;

pub const PAYMENT_QUEUE: &str = "payment-processing";
pub const NOTIFICATION_QUEUE: &str = "payment-notifications";

/// Number of jobs per lifecycle bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
    pub paused: bool,
}

impl QueueCounts {
    /// No job is waiting, delayed or being processed.
    pub fn is_drained(&self) -> bool {
        self.waiting == 0 && self.active == 0 && self.delayed == 0
    }
}

/// History bucket targeted by [`JobQueue::clean`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishedBucket {
    Completed,
    Failed,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Subscribes to lifecycle events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<QueueEvent>;

    async fn add(&self, payload: JobPayload, options: JobOptions) -> Result<JobId>;

    /// Waits until a job is eligible and the queue is not paused, then
    /// moves it to the active bucket and returns it with a fresh lock token.
    async fn next(&self) -> Result<Job>;

    /// Records progress (0-100) and renews the job's lock.
    ///
    /// The calls taking a [`JobLease`] fail with `QueueError` when the lease
    /// is no longer the job's current delivery.
    async fn update_progress(&self, lease: JobLease, progress: u8) -> Result<()>;

    async fn complete(&self, lease: JobLease, return_value: serde_json::Value) -> Result<()>;

    /// Records a failed attempt; retries or fails the job permanently.
    async fn fail(&self, lease: JobLease, failure: JobFailure) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<Job>>;

    async fn counts(&self) -> Result<QueueCounts>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn is_paused(&self) -> Result<bool>;

    /// Removes up to `limit` jobs (0 = no limit) from `bucket` that finished
    /// at least `grace` ago. Returns the removed ids.
    async fn clean(
        &self,
        grace: Duration,
        limit: usize,
        bucket: FinishedBucket,
    ) -> Result<Vec<JobId>>;

    /// Returns active jobs whose lock expired to the waiting bucket, or
    /// fails them once they stalled more than `max_stalled` times.
    async fn recover_stalled(&self, lock_duration: Duration, max_stalled: u32)
    -> Result<Vec<JobId>>;
}

pub type JobQueueRef = Arc<dyn JobQueue>;
