//! Runtime configuration.
//!
//! Every value has a default, so an empty JSON object (or no file at all)
//! yields a working configuration. Durations are expressed in milliseconds.

use crate::error::{PaymentError, Result};
use crate::queue::{Backoff, JobOptions};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub payment_jobs: PaymentJobConfig,
    pub retry_jobs: RetryJobConfig,
    pub retention: RetentionConfig,
    pub clean: CleanConfig,
    pub worker: WorkerConfig,
    pub gateway: GatewayConfig,
    pub notifications: NotificationConfig,
}

impl EngineConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|e| {
            PaymentError::ValidationError(format!(
                "Invalid configuration file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Options of the job enqueued by a plain payment creation.
    pub fn payment_job_options(&self) -> JobOptions {
        JobOptions::default()
            .with_delay(Duration::from_millis(self.payment_jobs.delay_ms))
            .with_attempts(self.payment_jobs.attempts)
            .with_backoff(Backoff::exponential(Duration::from_millis(
                self.payment_jobs.backoff_ms,
            )))
            .with_retention(self.retention.keep_completed, self.retention.keep_failed)
    }

    /// Options of the job enqueued when a failed payment is retried.
    pub fn retry_job_options(&self) -> JobOptions {
        JobOptions::default()
            .with_delay(Duration::from_millis(self.retry_jobs.delay_ms))
            .with_attempts(self.retry_jobs.attempts)
            .with_retention(self.retention.keep_completed, self.retention.keep_failed)
    }

    /// Options carrying nothing but the retention policy.
    pub fn retention_only_options(&self) -> JobOptions {
        JobOptions::default()
            .with_retention(self.retention.keep_completed, self.retention.keep_failed)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PaymentJobConfig {
    pub delay_ms: u64,
    pub attempts: u32,
    pub backoff_ms: u64,
}

impl Default for PaymentJobConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            attempts: 3,
            backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryJobConfig {
    pub delay_ms: u64,
    pub attempts: u32,
}

impl Default for RetryJobConfig {
    fn default() -> Self {
        Self {
            delay_ms: 5000,
            attempts: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub keep_completed: usize,
    pub keep_failed: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_completed: 50,
            keep_failed: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    pub grace_ms: u64,
    pub limit: usize,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            grace_ms: 0,
            limit: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent consumers per queue.
    pub concurrency: usize,
    pub stalled_interval_ms: u64,
    pub lock_duration_ms: u64,
    pub max_stalled_count: u32,
}

impl WorkerConfig {
    pub fn stalled_interval(&self) -> Duration {
        Duration::from_millis(self.stalled_interval_ms)
    }

    pub fn lock_duration(&self) -> Duration {
        Duration::from_millis(self.lock_duration_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            stalled_interval_ms: 30_000,
            lock_duration_ms: 30_000,
            max_stalled_count: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Probability in `[0, 1]` that a charge is approved.
    pub success_rate: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            success_rate: 0.9,
            min_latency_ms: 1000,
            max_latency_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub send_latency_ms: u64,
    /// Used when the checkout owner's e-mail cannot be resolved.
    pub fallback_recipient: Option<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            send_latency_ms: 500,
            fallback_recipient: None,
        }
    }
}
