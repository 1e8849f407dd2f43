use crate::domain::ids::PaymentId;
use crate::domain::money::Money;
use crate::domain::payment::PaymentMethod;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Queue-local job identity, monotonically increasing per queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(u64);

impl JobId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ProcessPayment,
    SendNotification,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ProcessPayment => "process-payment",
            JobKind::SendNotification => "send-notification",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `process-payment` job.
///
/// Kept wire-shaped (raw id, optional method) because the worker validates
/// it on delivery rather than trusting whoever enqueued it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentJob {
    pub payment_id: String,
    pub amount: Decimal,
    pub method: Option<PaymentMethod>,
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationType {
    PaymentSuccess,
    PaymentFailure,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::PaymentSuccess => "payment-success",
            NotificationType::PaymentFailure => "payment-failure",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `send-notification` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub payment_id: PaymentId,
    pub recipient: Option<String>,
    pub amount: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "kebab-case")]
pub enum JobPayload {
    ProcessPayment(PaymentJob),
    SendNotification(NotificationJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ProcessPayment(_) => JobKind::ProcessPayment,
            JobPayload::SendNotification(_) => JobKind::SendNotification,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    Fixed,
    Exponential,
}

/// Delay policy applied between failed attempts of the same job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub kind: BackoffKind,
    pub delay: Duration,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Fixed,
            delay,
        }
    }

    pub fn exponential(delay: Duration) -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay,
        }
    }

    /// Delay before the next attempt once `attempts_made` attempts failed.
    ///
    /// Exponential backoff doubles per attempt: `delay * 2^(attempts_made - 1)`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        match self.kind {
            BackoffKind::Fixed => self.delay,
            BackoffKind::Exponential => {
                let exponent = attempts_made.saturating_sub(1).min(31);
                self.delay.saturating_mul(1u32 << exponent)
            }
        }
    }
}

/// Scheduling attributes of a job.
///
/// The defaults are a single attempt, no priority, no delay, no backoff and
/// unbounded history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOptions {
    /// Lower value dequeues first. `None` behaves as `0`.
    pub priority: Option<u32>,
    pub delay: Option<Duration>,
    pub attempts: u32,
    pub backoff: Option<Backoff>,
    /// Keep at most this many completed jobs in history.
    pub keep_completed: Option<usize>,
    /// Keep at most this many failed jobs in history.
    pub keep_failed: Option<usize>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: None,
            delay: None,
            attempts: 1,
            backoff: None,
            keep_completed: None,
            keep_failed: None,
        }
    }
}

impl JobOptions {
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_retention(mut self, keep_completed: usize, keep_failed: usize) -> Self {
        self.keep_completed = Some(keep_completed);
        self.keep_failed = Some(keep_failed);
        self
    }

    pub fn effective_priority(&self) -> u32 {
        self.priority.unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Proof of ownership for one delivery of a job.
///
/// Every hand-out from the queue carries a fresh token; progress, completion
/// and failure are only accepted from the holder of the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobLease {
    pub id: JobId,
    pub token: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub queue: String,
    pub payload: JobPayload,
    pub options: JobOptions,
    pub state: JobState,
    /// Number of attempts that ended in failure so far.
    pub attempts_made: u32,
    /// Number of times the job was recovered after its lock expired.
    pub stalled_count: u32,
    pub progress: u8,
    /// Token of the latest delivery; 0 until the job is first handed out.
    pub lock_token: u64,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub return_value: Option<serde_json::Value>,
}

impl Job {
    pub fn new(
        id: JobId,
        queue: impl Into<String>,
        payload: JobPayload,
        options: JobOptions,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            queue: queue.into(),
            payload,
            options,
            state: JobState::Waiting,
            attempts_made: 0,
            stalled_count: 0,
            progress: 0,
            lock_token: 0,
            created_at: now,
            processed_at: None,
            finished_at: None,
            failed_reason: None,
            return_value: None,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    pub fn lease(&self) -> JobLease {
        JobLease {
            id: self.id,
            token: self.lock_token,
        }
    }

    /// True when this delivery follows an earlier failed or stalled one.
    pub fn is_redelivery(&self) -> bool {
        self.attempts_made > 0 || self.stalled_count > 0
    }
}

/// Outcome reported by a handler that could not finish a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub reason: String,
    /// When false the job fails permanently regardless of remaining attempts.
    pub retryable: bool,
}

impl JobFailure {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            retryable: false,
        }
    }
}
