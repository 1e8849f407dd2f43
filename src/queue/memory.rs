use super::{
    FinishedBucket, Job, JobEvent, JobFailure, JobId, JobKind, JobLease, JobOptions, JobPayload,
    JobQueue, JobState, QueueCounts, QueueEvent,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify, broadcast};
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

const DEFAULT_EVENT_CAPACITY: usize = 1024;
const STALLED_REASON: &str = "job stalled more than allowable limit";

/// Lock held by the current delivery of an active job.
struct ActiveLock {
    token: u64,
    renewed: Instant,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<JobId, Job>,
    /// Ready jobs keyed by (priority, enqueue sequence).
    waiting: BTreeSet<(u32, u64, JobId)>,
    /// Delayed jobs keyed by (ready time, enqueue sequence).
    delayed: BTreeSet<(Instant, u64, JobId)>,
    /// Active jobs and the lock of their current delivery.
    active: HashMap<JobId, ActiveLock>,
    /// Finished job ids, oldest first.
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    paused: bool,
    next_id: u64,
    next_seq: u64,
    next_token: u64,
}

impl QueueState {
    fn allocate_id(&mut self) -> JobId {
        self.next_id += 1;
        JobId::new(self.next_id)
    }

    fn push_waiting(&mut self, id: JobId, priority: u32) {
        self.next_seq += 1;
        self.waiting.insert((priority, self.next_seq, id));
    }

    fn push_delayed(&mut self, id: JobId, ready_at: Instant) {
        self.next_seq += 1;
        self.delayed.insert((ready_at, self.next_seq, id));
    }

    fn issue_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn next_wake(&self) -> Option<Instant> {
        self.delayed.first().map(|(ready_at, _, _)| *ready_at)
    }
}

/// A process-local [`JobQueue`].
///
/// All bookkeeping lives behind one `tokio::sync::Mutex`; consumers blocked
/// in [`JobQueue::next`] are woken through a `Notify` whenever a job may
/// have become eligible, and sleep until the earliest delayed job otherwise.
pub struct InMemoryJobQueue {
    name: String,
    state: Mutex<QueueState>,
    notify: Notify,
    events: broadcast::Sender<QueueEvent>,
}

impl InMemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_event_capacity(name, DEFAULT_EVENT_CAPACITY)
    }

    /// Creates a queue whose event channel buffers up to `capacity` events
    /// per subscriber before slow subscribers start lagging.
    pub fn with_event_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.into(),
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            events,
        }
    }

    fn publish(&self, job_id: JobId, job_kind: JobKind, event: JobEvent) {
        debug!(queue = %self.name, job_id = %job_id, event = event.name(), "Job event");
        // No subscriber is not an error.
        self.events
            .send(QueueEvent {
                queue: self.name.clone(),
                job_id,
                job_kind,
                event,
                at: Utc::now(),
            })
            .ok();
    }

    fn promote_due(&self, state: &mut QueueState, now: Instant) {
        while let Some(&(ready_at, _, id)) = state.delayed.first() {
            if ready_at > now {
                break;
            }
            state.delayed.pop_first();
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.state = JobState::Waiting;
            let (kind, priority) = (job.kind(), job.options.effective_priority());
            state.push_waiting(id, priority);
            self.publish(id, kind, JobEvent::Waiting);
        }
    }

    fn activate_next(&self, state: &mut QueueState, now: Instant) -> Option<Job> {
        while let Some((_, _, id)) = state.waiting.pop_first() {
            if !state.jobs.contains_key(&id) {
                continue;
            }
            let token = state.issue_token();
            let Some(job) = state.jobs.get_mut(&id) else {
                continue;
            };
            job.state = JobState::Active;
            job.processed_at = Some(Utc::now());
            job.lock_token = token;
            let snapshot = job.clone();
            state.active.insert(
                id,
                ActiveLock {
                    token,
                    renewed: now,
                },
            );
            self.publish(id, snapshot.kind(), JobEvent::Active);
            return Some(snapshot);
        }
        None
    }

    fn held_lock<'a>(
        &self,
        state: &'a mut QueueState,
        lease: JobLease,
    ) -> Result<&'a mut ActiveLock> {
        match state.active.get_mut(&lease.id) {
            Some(lock) if lock.token == lease.token => Ok(lock),
            Some(_) => Err(PaymentError::QueueError(format!(
                "Job {} in queue {} was handed to another worker",
                lease.id, self.name
            ))),
            None => Err(PaymentError::QueueError(format!(
                "Job {} is not active in queue {}",
                lease.id, self.name
            ))),
        }
    }

    fn take_active(&self, state: &mut QueueState, lease: JobLease) -> Result<()> {
        self.held_lock(state, lease)?;
        state.active.remove(&lease.id);
        Ok(())
    }

    fn job_mut<'a>(&self, state: &'a mut QueueState, id: JobId) -> Result<&'a mut Job> {
        state.jobs.get_mut(&id).ok_or_else(|| {
            PaymentError::QueueError(format!("Job {} not found in queue {}", id, self.name))
        })
    }

    fn move_to_failed(&self, state: &mut QueueState, id: JobId, reason: &str) {
        let keep = match state.jobs.get_mut(&id) {
            Some(job) => {
                job.state = JobState::Failed;
                job.finished_at = Some(Utc::now());
                job.failed_reason = Some(reason.to_string());
                job.options.keep_failed
            }
            None => return,
        };
        state.failed.push_back(id);
        self.trim_history(state, FinishedBucket::Failed, keep);
    }

    fn trim_history(&self, state: &mut QueueState, bucket: FinishedBucket, keep: Option<usize>) {
        let Some(keep) = keep else {
            return;
        };
        let history = match bucket {
            FinishedBucket::Completed => &mut state.completed,
            FinishedBucket::Failed => &mut state.failed,
        };
        let mut evicted = Vec::new();
        while history.len() > keep {
            if let Some(id) = history.pop_front() {
                evicted.push(id);
            }
        }
        for id in evicted {
            if let Some(job) = state.jobs.remove(&id) {
                self.publish(id, job.kind(), JobEvent::Removed);
            }
        }
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    async fn add(&self, payload: JobPayload, options: JobOptions) -> Result<JobId> {
        let mut state = self.state.lock().await;
        let id = state.allocate_id();
        let kind = payload.kind();
        let mut job = Job::new(id, self.name.clone(), payload, options, Utc::now());

        match options.delay.filter(|delay| !delay.is_zero()) {
            Some(delay) => {
                job.state = JobState::Delayed;
                state.jobs.insert(id, job);
                state.push_delayed(id, Instant::now() + delay);
                self.publish(id, kind, JobEvent::Delayed { delay });
            }
            None => {
                job.state = JobState::Waiting;
                state.jobs.insert(id, job);
                state.push_waiting(id, options.effective_priority());
                self.publish(id, kind, JobEvent::Waiting);
            }
        }
        drop(state);

        self.notify.notify_waiters();
        debug!(queue = %self.name, job_id = %id, kind = %kind, "Job added");
        Ok(id)
    }

    async fn next(&self) -> Result<Job> {
        loop {
            // Registered before inspecting the state so a wake-up between the
            // check and the wait is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                self.promote_due(&mut state, now);
                if state.paused {
                    None
                } else {
                    if let Some(job) = self.activate_next(&mut state, now) {
                        return Ok(job);
                    }
                    state.next_wake()
                }
            };

            match wake_at {
                Some(deadline) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = time::sleep_until(deadline) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn update_progress(&self, lease: JobLease, progress: u8) -> Result<()> {
        let mut state = self.state.lock().await;
        self.held_lock(&mut state, lease)?.renewed = Instant::now();
        let id = lease.id;
        let job = self.job_mut(&mut state, id)?;
        job.progress = progress.min(100);
        let (kind, progress) = (job.kind(), job.progress);
        self.publish(id, kind, JobEvent::Progress(progress));
        Ok(())
    }

    async fn complete(&self, lease: JobLease, return_value: serde_json::Value) -> Result<()> {
        let mut state = self.state.lock().await;
        self.take_active(&mut state, lease)?;
        let id = lease.id;
        let job = self.job_mut(&mut state, id)?;
        job.state = JobState::Completed;
        job.finished_at = Some(Utc::now());
        job.return_value = Some(return_value.clone());
        let (kind, keep) = (job.kind(), job.options.keep_completed);

        self.publish(id, kind, JobEvent::Completed { return_value });
        state.completed.push_back(id);
        self.trim_history(&mut state, FinishedBucket::Completed, keep);
        Ok(())
    }

    async fn fail(&self, lease: JobLease, failure: JobFailure) -> Result<()> {
        let mut state = self.state.lock().await;
        self.take_active(&mut state, lease)?;
        let id = lease.id;
        let job = self.job_mut(&mut state, id)?;
        job.attempts_made += 1;
        job.failed_reason = Some(failure.reason.clone());

        let attempts_made = job.attempts_made;
        let will_retry = failure.retryable && attempts_made < job.options.attempts;
        let kind = job.kind();
        let priority = job.options.effective_priority();
        let backoff = job
            .options
            .backoff
            .map(|backoff| backoff.delay_for(attempts_made))
            .unwrap_or(Duration::ZERO);
        if will_retry {
            job.state = if backoff.is_zero() {
                JobState::Waiting
            } else {
                JobState::Delayed
            };
        }

        self.publish(
            id,
            kind,
            JobEvent::Failed {
                reason: failure.reason.clone(),
                attempts_made,
                will_retry,
            },
        );

        if !will_retry {
            self.move_to_failed(&mut state, id, &failure.reason);
            return Ok(());
        }

        if backoff.is_zero() {
            state.push_waiting(id, priority);
            self.publish(id, kind, JobEvent::Waiting);
        } else {
            state.push_delayed(id, Instant::now() + backoff);
            self.publish(id, kind, JobEvent::Delayed { delay: backoff });
        }
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let state = self.state.lock().await;
        Ok(QueueCounts {
            waiting: state.waiting.len(),
            active: state.active.len(),
            completed: state.completed.len(),
            failed: state.failed.len(),
            delayed: state.delayed.len(),
            paused: state.paused,
        })
    }

    async fn pause(&self) -> Result<()> {
        self.state.lock().await.paused = true;
        info!(queue = %self.name, "Queue paused");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.state.lock().await.paused = false;
        self.notify.notify_waiters();
        info!(queue = %self.name, "Queue resumed");
        Ok(())
    }

    async fn is_paused(&self) -> Result<bool> {
        Ok(self.state.lock().await.paused)
    }

    async fn clean(
        &self,
        grace: Duration,
        limit: usize,
        bucket: FinishedBucket,
    ) -> Result<Vec<JobId>> {
        let grace = chrono::Duration::from_std(grace)
            .map_err(|e| PaymentError::QueueError(format!("Invalid grace period: {}", e)))?;
        let cutoff = Utc::now() - grace;

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let history = match bucket {
            FinishedBucket::Completed => &mut state.completed,
            FinishedBucket::Failed => &mut state.failed,
        };
        let jobs = &state.jobs;

        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(history.len());
        while let Some(id) = history.pop_front() {
            let aged = jobs
                .get(&id)
                .and_then(|job| job.finished_at)
                .is_some_and(|finished_at| finished_at <= cutoff);
            if aged && (limit == 0 || removed.len() < limit) {
                removed.push(id);
            } else {
                kept.push_back(id);
            }
        }
        *history = kept;

        for id in &removed {
            if let Some(job) = state.jobs.remove(id) {
                self.publish(*id, job.kind(), JobEvent::Removed);
            }
        }
        info!(queue = %self.name, bucket = ?bucket, removed = removed.len(), "Queue cleaned");
        Ok(removed)
    }

    async fn recover_stalled(
        &self,
        lock_duration: Duration,
        max_stalled: u32,
    ) -> Result<Vec<JobId>> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let mut expired: Vec<JobId> = state
            .active
            .iter()
            .filter(|(_, lock)| now.duration_since(lock.renewed) >= lock_duration)
            .map(|(id, _)| *id)
            .collect();
        expired.sort();

        let mut requeued = false;
        for id in &expired {
            state.active.remove(id);
            let Some(job) = state.jobs.get_mut(id) else {
                continue;
            };
            job.stalled_count += 1;
            let (kind, priority, stalled, attempts_made) = (
                job.kind(),
                job.options.effective_priority(),
                job.stalled_count,
                job.attempts_made,
            );
            let exhausted = stalled > max_stalled;
            if !exhausted {
                job.state = JobState::Waiting;
            }

            warn!(queue = %self.name, job_id = %id, stalled, "Job lock expired");
            self.publish(*id, kind, JobEvent::Stalled);

            if exhausted {
                self.publish(
                    *id,
                    kind,
                    JobEvent::Failed {
                        reason: STALLED_REASON.to_string(),
                        attempts_made,
                        will_retry: false,
                    },
                );
                self.move_to_failed(&mut state, *id, STALLED_REASON);
            } else {
                state.push_waiting(*id, priority);
                self.publish(*id, kind, JobEvent::Waiting);
                requeued = true;
            }
        }
        drop(state);

        if requeued {
            self.notify.notify_waiters();
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::PaymentId;
    use crate::queue::{Backoff, NotificationJob, NotificationType, PaymentJob};
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn payment_payload(tag: &str) -> JobPayload {
        JobPayload::ProcessPayment(PaymentJob {
            payment_id: tag.to_string(),
            amount: dec!(10.00),
            method: None,
            transaction_id: None,
            retry_count: 0,
        })
    }

    fn tag_of(job: &Job) -> String {
        match &job.payload {
            JobPayload::ProcessPayment(data) => data.payment_id.clone(),
            JobPayload::SendNotification(data) => data.payment_id.to_string(),
        }
    }

    async fn next_now(queue: &InMemoryJobQueue) -> Option<Job> {
        time::timeout(Duration::from_millis(1), queue.next()).await.ok().map(|r| r.unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_then_fifo_order() {
        let queue = InMemoryJobQueue::new("test");
        queue
            .add(payment_payload("low"), JobOptions::default().with_priority(5))
            .await
            .unwrap();
        queue
            .add(payment_payload("high-1"), JobOptions::default().with_priority(1))
            .await
            .unwrap();
        queue
            .add(payment_payload("high-2"), JobOptions::default().with_priority(1))
            .await
            .unwrap();

        let order: Vec<String> = [
            queue.next().await.unwrap(),
            queue.next().await.unwrap(),
            queue.next().await.unwrap(),
        ]
        .iter()
        .map(tag_of)
        .collect();
        assert_eq!(order, vec!["high-1", "high-2", "low"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_job_not_eligible_before_delay() {
        let queue = InMemoryJobQueue::new("test");
        queue
            .add(
                payment_payload("later"),
                JobOptions::default().with_delay(Duration::from_millis(1000)),
            )
            .await
            .unwrap();
        assert_eq!(queue.counts().await.unwrap().delayed, 1);

        let early = time::timeout(Duration::from_millis(900), queue.next()).await;
        assert!(early.is_err(), "job must not be delivered before its delay");

        let started = Instant::now();
        let job = queue.next().await.unwrap();
        assert_eq!(tag_of(&job), "later");
        assert!(started.elapsed() <= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_job_preferred_over_pending_delay() {
        let queue = InMemoryJobQueue::new("test");
        queue
            .add(
                payment_payload("delayed"),
                JobOptions::default().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();
        queue
            .add(payment_payload("ready"), JobOptions::default())
            .await
            .unwrap();
        assert_eq!(tag_of(&queue.next().await.unwrap()), "ready");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_retry_until_exhausted() {
        let queue = InMemoryJobQueue::new("test");
        let options = JobOptions::default()
            .with_attempts(3)
            .with_backoff(Backoff::exponential(Duration::from_millis(2000)));
        let id = queue.add(payment_payload("flaky"), options).await.unwrap();

        let job = queue.next().await.unwrap();
        queue.fail(job.lease(), JobFailure::retryable("boom")).await.unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.delayed, counts.failed), (1, 0));

        // First retry after 2s.
        let before = Instant::now();
        let job = queue.next().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(2000));
        assert!(before.elapsed() < Duration::from_millis(4000));
        assert_eq!(job.attempts_made, 1);
        queue.fail(job.lease(), JobFailure::retryable("boom")).await.unwrap();

        // Second retry after 4s.
        let before = Instant::now();
        let job = queue.next().await.unwrap();
        assert!(before.elapsed() >= Duration::from_millis(4000));
        queue.fail(job.lease(), JobFailure::retryable("boom")).await.unwrap();

        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.failed, 1);
        assert!(counts.is_drained());
        let stored = queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts_made, 3);
        assert_eq!(stored.failed_reason.as_deref(), Some("boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_skips_remaining_attempts() {
        let queue = InMemoryJobQueue::new("test");
        let id = queue
            .add(
                payment_payload("bad"),
                JobOptions::default().with_attempts(3),
            )
            .await
            .unwrap();
        let job = queue.next().await.unwrap();
        queue.fail(job.lease(), JobFailure::fatal("invalid")).await.unwrap();

        let stored = queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert_eq!(stored.attempts_made, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_retention_keeps_most_recent() {
        let queue = InMemoryJobQueue::new("test");
        let options = JobOptions::default().with_retention(2, 2);
        let mut ids = Vec::new();
        for tag in ["a", "b", "c"] {
            ids.push(queue.add(payment_payload(tag), options).await.unwrap());
        }
        for _ in 0..3 {
            let job = queue.next().await.unwrap();
            queue.complete(job.lease(), json!({ "success": true })).await.unwrap();
        }

        assert_eq!(queue.counts().await.unwrap().completed, 2);
        assert!(queue.get(ids[0]).await.unwrap().is_none());
        assert!(queue.get(ids[2]).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_blocks_dequeue_until_resume() {
        let queue = InMemoryJobQueue::new("test");
        queue.pause().await.unwrap();
        queue
            .add(payment_payload("held"), JobOptions::default())
            .await
            .unwrap();
        assert!(next_now(&queue).await.is_none());
        assert!(queue.counts().await.unwrap().paused);

        queue.resume().await.unwrap();
        assert_eq!(tag_of(&next_now(&queue).await.unwrap()), "held");
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_sweeps_buckets_independently() {
        let queue = InMemoryJobQueue::new("test");
        for tag in ["ok", "bad"] {
            queue
                .add(payment_payload(tag), JobOptions::default())
                .await
                .unwrap();
        }
        let first = queue.next().await.unwrap();
        queue.complete(first.lease(), json!({})).await.unwrap();
        let second = queue.next().await.unwrap();
        queue.fail(second.lease(), JobFailure::retryable("x")).await.unwrap();

        let removed = queue
            .clean(Duration::ZERO, 100, FinishedBucket::Completed)
            .await
            .unwrap();
        assert_eq!(removed, vec![first.id]);
        let counts = queue.counts().await.unwrap();
        assert_eq!((counts.completed, counts.failed), (0, 1));

        let removed = queue
            .clean(Duration::ZERO, 100, FinishedBucket::Failed)
            .await
            .unwrap();
        assert_eq!(removed, vec![second.id]);
        assert_eq!(queue.counts().await.unwrap().failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_respects_grace_period() {
        let queue = InMemoryJobQueue::new("test");
        queue
            .add(payment_payload("fresh"), JobOptions::default())
            .await
            .unwrap();
        let job = queue.next().await.unwrap();
        queue.complete(job.lease(), json!({})).await.unwrap();

        let removed = queue
            .clean(Duration::from_secs(3600), 100, FinishedBucket::Completed)
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert_eq!(queue.counts().await.unwrap().completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_job_is_redelivered_then_failed() {
        let queue = InMemoryJobQueue::new("test");
        let id = queue
            .add(payment_payload("stuck"), JobOptions::default())
            .await
            .unwrap();
        let lock = Duration::from_secs(30);

        queue.next().await.unwrap();
        time::advance(lock).await;
        assert_eq!(queue.recover_stalled(lock, 1).await.unwrap(), vec![id]);

        let redelivered = queue.next().await.unwrap();
        assert_eq!(redelivered.stalled_count, 1);
        assert!(redelivered.is_redelivery());

        time::advance(lock).await;
        queue.recover_stalled(lock, 1).await.unwrap();
        let stored = queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
        assert!(queue.complete(redelivered.lease(), json!({})).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_delivery_cannot_finish_job() {
        let queue = InMemoryJobQueue::new("test");
        let id = queue
            .add(payment_payload("contended"), JobOptions::default())
            .await
            .unwrap();
        let lock = Duration::from_secs(30);

        let first = queue.next().await.unwrap();
        time::advance(lock).await;
        queue.recover_stalled(lock, 1).await.unwrap();
        let second = queue.next().await.unwrap();
        assert_eq!(second.id, first.id);
        assert_ne!(second.lease(), first.lease());

        assert!(queue.update_progress(first.lease(), 50).await.is_err());
        assert!(
            queue
                .complete(first.lease(), json!({ "from": "first" }))
                .await
                .is_err()
        );
        assert!(
            queue
                .fail(first.lease(), JobFailure::retryable("late"))
                .await
                .is_err()
        );
        assert_eq!(queue.counts().await.unwrap().active, 1);

        queue.update_progress(second.lease(), 50).await.unwrap();
        queue
            .complete(second.lease(), json!({ "from": "second" }))
            .await
            .unwrap();
        let stored = queue.get(id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Completed);
        assert_eq!(stored.return_value, Some(json!({ "from": "second" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_renews_lock() {
        let queue = InMemoryJobQueue::new("test");
        queue
            .add(payment_payload("slow"), JobOptions::default())
            .await
            .unwrap();
        let job = queue.next().await.unwrap();
        let lock = Duration::from_secs(30);

        time::advance(Duration::from_secs(20)).await;
        queue.update_progress(job.lease(), 50).await.unwrap();
        time::advance(Duration::from_secs(20)).await;

        assert!(queue.recover_stalled(lock, 1).await.unwrap().is_empty());
        assert_eq!(queue.get(job.id).await.unwrap().unwrap().progress, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_events_are_published() {
        let queue = InMemoryJobQueue::new("events");
        let mut events = queue.subscribe();
        let payload = JobPayload::SendNotification(NotificationJob {
            notification_type: NotificationType::PaymentSuccess,
            payment_id: PaymentId::new(),
            recipient: None,
            amount: None,
        });
        queue.add(payload, JobOptions::default()).await.unwrap();
        let job = queue.next().await.unwrap();
        queue.update_progress(job.lease(), 100).await.unwrap();
        queue.complete(job.lease(), json!({ "success": true })).await.unwrap();

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            assert_eq!(event.queue, "events");
            assert_eq!(event.job_kind, JobKind::SendNotification);
            names.push(event.event.name());
        }
        assert_eq!(names, vec!["waiting", "active", "progress", "completed"]);
    }
}
