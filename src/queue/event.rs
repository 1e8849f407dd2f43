use super::job::{JobId, JobKind};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Waiting,
    Delayed {
        delay: Duration,
    },
    Active,
    Progress(u8),
    Completed {
        return_value: serde_json::Value,
    },
    Failed {
        reason: String,
        attempts_made: u32,
        will_retry: bool,
    },
    Removed,
    Stalled,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Waiting => "waiting",
            JobEvent::Delayed { .. } => "delayed",
            JobEvent::Active => "active",
            JobEvent::Progress(_) => "progress",
            JobEvent::Completed { .. } => "completed",
            JobEvent::Failed { .. } => "failed",
            JobEvent::Removed => "removed",
            JobEvent::Stalled => "stalled",
        }
    }
}

/// A lifecycle notification published by a queue to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEvent {
    pub queue: String,
    pub job_id: JobId,
    pub job_kind: JobKind,
    pub event: JobEvent,
    pub at: DateTime<Utc>,
}
