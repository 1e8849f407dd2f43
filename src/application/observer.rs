use crate::queue::{JobEvent, JobKind, QueueEvent};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// Running totals of the lifecycle events seen by an [`EventObserver`].
#[derive(Debug, Default)]
pub struct ObserverMetrics {
    waiting: AtomicU64,
    delayed: AtomicU64,
    active: AtomicU64,
    progress: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    removed: AtomicU64,
    stalled: AtomicU64,
    lagged: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub waiting: u64,
    pub delayed: u64,
    pub active: u64,
    pub progress: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub removed: u64,
    pub stalled: u64,
    pub lagged: u64,
}

impl ObserverMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            waiting: load(&self.waiting),
            delayed: load(&self.delayed),
            active: load(&self.active),
            progress: load(&self.progress),
            completed: load(&self.completed),
            failed: load(&self.failed),
            retried: load(&self.retried),
            removed: load(&self.removed),
            stalled: load(&self.stalled),
            lagged: load(&self.lagged),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Logs queue lifecycle events and counts them.
///
/// Purely passive: it never touches jobs or payments.
#[derive(Debug, Clone, Default)]
pub struct EventObserver {
    metrics: Arc<ObserverMetrics>,
}

impl EventObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> Arc<ObserverMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn observe(&self, event: &QueueEvent) {
        let m = &self.metrics;
        let (queue, job_id, kind) = (event.queue.as_str(), event.job_id, event.job_kind);
        match &event.event {
            JobEvent::Waiting => {
                ObserverMetrics::bump(&m.waiting);
                debug!(queue, job_id = %job_id, kind = %kind, "Job waiting");
            }
            JobEvent::Delayed { delay } => {
                ObserverMetrics::bump(&m.delayed);
                debug!(queue, job_id = %job_id, delay_ms = delay.as_millis() as u64, "Job delayed");
            }
            JobEvent::Active => {
                ObserverMetrics::bump(&m.active);
                info!(queue, job_id = %job_id, kind = %kind, "Job started");
            }
            JobEvent::Progress(percent) => {
                ObserverMetrics::bump(&m.progress);
                debug!(queue, job_id = %job_id, progress = percent, "Job progress");
            }
            JobEvent::Completed { return_value } => {
                ObserverMetrics::bump(&m.completed);
                self.log_completed(queue, job_id, kind, return_value);
            }
            JobEvent::Failed {
                reason,
                attempts_made,
                will_retry,
            } => {
                if *will_retry {
                    ObserverMetrics::bump(&m.retried);
                    warn!(queue, job_id = %job_id, attempts_made, reason = %reason, "Job attempt failed; retrying");
                } else {
                    ObserverMetrics::bump(&m.failed);
                    error!(queue, job_id = %job_id, attempts_made, reason = %reason, "Job failed");
                }
            }
            JobEvent::Removed => {
                ObserverMetrics::bump(&m.removed);
                debug!(queue, job_id = %job_id, "Job removed");
            }
            JobEvent::Stalled => {
                ObserverMetrics::bump(&m.stalled);
                warn!(queue, job_id = %job_id, "Job stalled");
            }
        }
    }

    fn log_completed(
        &self,
        queue: &str,
        job_id: crate::queue::JobId,
        kind: JobKind,
        return_value: &serde_json::Value,
    ) {
        if kind != JobKind::ProcessPayment {
            info!(queue, job_id = %job_id, kind = %kind, "Job completed");
            return;
        }

        fn field<'a>(value: &'a serde_json::Value, name: &str) -> &'a str {
            value.get(name).and_then(|v| v.as_str()).unwrap_or_default()
        }
        match return_value.get("success").and_then(|v| v.as_bool()) {
            Some(true) if return_value.get("skipped").is_some() => {
                info!(queue, job_id = %job_id, payment_id = field(return_value, "paymentId"), "Payment job skipped");
            }
            Some(true) => info!(
                queue,
                job_id = %job_id,
                payment_id = field(return_value, "paymentId"),
                transaction_id = field(return_value, "transactionId"),
                "Payment processed successfully"
            ),
            Some(false) => warn!(queue, job_id = %job_id, payment_id = field(return_value, "paymentId"), "Payment job completed without success"),
            None => debug!(queue, job_id = %job_id, "Could not read payment job result"),
        }
    }

    /// Consumes `events` until shutdown, then drains whatever is buffered.
    pub async fn run(
        self,
        mut events: broadcast::Receiver<QueueEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = events.recv() => match received {
                    Ok(event) => self.observe(&event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        self.metrics.lagged.fetch_add(skipped, Ordering::Relaxed);
                        warn!(skipped, "Event observer lagging; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }

        while let Ok(event) = events.try_recv() {
            self.observe(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::JobId;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn event(event: JobEvent) -> QueueEvent {
        QueueEvent {
            queue: "payment-processing".to_string(),
            job_id: JobId::new(1),
            job_kind: JobKind::ProcessPayment,
            event,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_each_event_kind() {
        let observer = EventObserver::new();
        observer.observe(&event(JobEvent::Waiting));
        observer.observe(&event(JobEvent::Delayed {
            delay: Duration::from_secs(1),
        }));
        observer.observe(&event(JobEvent::Active));
        observer.observe(&event(JobEvent::Progress(50)));
        observer.observe(&event(JobEvent::Failed {
            reason: "declined".to_string(),
            attempts_made: 1,
            will_retry: true,
        }));
        observer.observe(&event(JobEvent::Failed {
            reason: "declined".to_string(),
            attempts_made: 3,
            will_retry: false,
        }));
        observer.observe(&event(JobEvent::Completed {
            return_value: json!({ "success": true, "transactionId": "txn_1" }),
        }));
        observer.observe(&event(JobEvent::Stalled));
        observer.observe(&event(JobEvent::Removed));

        let snapshot = observer.metrics().snapshot();
        assert_eq!(
            snapshot,
            MetricsSnapshot {
                waiting: 1,
                delayed: 1,
                active: 1,
                progress: 1,
                completed: 1,
                failed: 1,
                retried: 1,
                removed: 1,
                stalled: 1,
                lagged: 0,
            }
        );
    }

    #[test]
    fn test_unreadable_result_is_tolerated() {
        let observer = EventObserver::new();
        observer.observe(&event(JobEvent::Completed {
            return_value: json!("not an object"),
        }));
        assert_eq!(observer.metrics().snapshot().completed, 1);
    }

    #[tokio::test]
    async fn test_run_drains_buffered_events_on_shutdown() {
        let (events, rx) = broadcast::channel(16);
        let (stop, stop_rx) = watch::channel(false);
        let observer = EventObserver::new();
        let metrics = observer.metrics();

        events.send(event(JobEvent::Waiting)).unwrap();
        events.send(event(JobEvent::Active)).unwrap();
        stop.send(true).unwrap();
        observer.run(rx, stop_rx).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.waiting + snapshot.active, 2);
    }

    #[tokio::test]
    async fn test_run_counts_lagged_events() {
        let (events, rx) = broadcast::channel(2);
        let (_stop, stop_rx) = watch::channel(false);
        let observer = EventObserver::new();
        let metrics = observer.metrics();

        for _ in 0..5 {
            events.send(event(JobEvent::Waiting)).unwrap();
        }
        drop(events);
        observer.run(rx, stop_rx).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.lagged, 3);
        assert_eq!(snapshot.waiting, 2);
    }
}
