use crate::config::{EngineConfig, NotificationConfig, WorkerConfig};
use crate::domain::ids::{PaymentId, parse_id};
use crate::domain::money::Money;
use crate::domain::payment::{Payment, PaymentStatus, Transition};
use crate::domain::ports::{
    CasOutcome, ChargeRequest, GatewayOutcome, PaymentGatewayRef, PaymentStoreRef,
};
use crate::error::{PaymentError, Result};
use crate::queue::{
    Job, JobFailure, JobLease, JobPayload, JobQueue, JobQueueRef, NotificationJob,
    NotificationType, PaymentJob,
};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

pub const FAILED_GATEWAY_RESPONSE: &str = "Payment processing failed";
pub const INTERNAL_ERROR_REASON: &str = "Internal processing error";
const LOCK_LOST_REASON: &str = "Job lock lost to another delivery";

/// How a delivered job relates to the payment's current status.
enum Claim {
    /// The payment is PROCESSING and this delivery owns it.
    Owned(Payment),
    /// Another delivery already handled (or is handling) the payment.
    Skip(PaymentStatus),
}

/// Consumes `process-payment` and `send-notification` jobs.
///
/// The worker never trusts that it is the only delivery of a payment: the
/// PENDING -> PROCESSING compare-and-set is the claim, and every later write
/// expects PROCESSING. A delivery whose job lock was handed to another worker
/// stops before it claims or charges.
pub struct PaymentWorker {
    payments: PaymentStoreRef,
    gateway: PaymentGatewayRef,
    worker: WorkerConfig,
    notifications: NotificationConfig,
}

impl PaymentWorker {
    pub fn new(payments: PaymentStoreRef, gateway: PaymentGatewayRef, config: &EngineConfig) -> Self {
        Self {
            payments,
            gateway,
            worker: config.worker.clone(),
            notifications: config.notifications.clone(),
        }
    }

    /// Pulls jobs from `queue` until `shutdown` turns true or its sender is
    /// dropped. Also sweeps expired job locks every stalled interval.
    pub async fn run(
        self: Arc<Self>,
        queue: JobQueueRef,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut stalled_check = tokio::time::interval(self.worker.stalled_interval());
        stalled_check.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(queue = %queue.name(), "Worker started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = stalled_check.tick() => {
                    match queue
                        .recover_stalled(self.worker.lock_duration(), self.worker.max_stalled_count)
                        .await
                    {
                        Ok(recovered) if !recovered.is_empty() => {
                            warn!(queue = %queue.name(), count = recovered.len(), "Recovered stalled jobs");
                        }
                        Ok(_) => {}
                        Err(e) => error!(queue = %queue.name(), error = %e, "Stalled job check failed"),
                    }
                }
                job = queue.next() => {
                    let job = job?;
                    self.handle(queue.as_ref(), job).await;
                }
            }
        }

        info!(queue = %queue.name(), "Worker stopped");
        Ok(())
    }

    /// Runs the handler for one active job and reports its outcome.
    pub async fn handle(&self, queue: &dyn JobQueue, job: Job) {
        let outcome = match &job.payload {
            JobPayload::ProcessPayment(data) => self.process_payment(queue, &job, data).await,
            JobPayload::SendNotification(data) => self.send_notification(queue, &job, data).await,
        };

        let reported = match outcome {
            Ok(return_value) => queue.complete(job.lease(), return_value).await,
            Err(failure) => queue.fail(job.lease(), failure).await,
        };
        if let Err(e) = reported {
            // The lock expired and the job was handed to someone else.
            warn!(job_id = %job.id, error = %e, "Could not report job outcome");
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id, payment_id = %data.payment_id))]
    async fn process_payment(
        &self,
        queue: &dyn JobQueue,
        job: &Job,
        data: &PaymentJob,
    ) -> std::result::Result<Value, JobFailure> {
        info!(
            amount = %data.amount,
            attempt = job.attempts_made + 1,
            retry_count = data.retry_count,
            "Processing payment"
        );
        if !self.progress(queue, job.lease(), 10).await {
            return Err(JobFailure::retryable(LOCK_LOST_REASON));
        }

        let payment_id: PaymentId = parse_id(&data.payment_id)
            .map_err(|_| JobFailure::fatal("Payment ID is required"))?;

        let payment = match self.claim(payment_id, job).await {
            Ok(Claim::Owned(payment)) => payment,
            Ok(Claim::Skip(status)) => {
                info!(status = %status, "Payment already handled; skipping");
                return Ok(json!({
                    "success": true,
                    "skipped": true,
                    "paymentId": payment_id,
                    "status": status,
                }));
            }
            Err(PaymentError::NotFound { .. }) => {
                return Err(JobFailure::fatal(format!("Payment {} not found", payment_id)));
            }
            Err(e) => return Err(JobFailure::retryable(e.to_string())),
        };
        self.progress(queue, job.lease(), 30).await;

        let Some(method) = data.method else {
            self.mark_failed(payment_id, INTERNAL_ERROR_REASON).await;
            return Err(JobFailure::fatal("Payment method is required"));
        };
        let amount = Money::new(data.amount);
        if !amount.is_positive() {
            self.mark_failed(payment_id, INTERNAL_ERROR_REASON).await;
            return Err(JobFailure::fatal("Invalid payment amount"));
        }
        if !self.progress(queue, job.lease(), 50).await {
            // The new owner resumes the PROCESSING payment.
            warn!("Job lock lost before charging; leaving payment to the new delivery");
            return Err(JobFailure::retryable(LOCK_LOST_REASON));
        }

        let request = ChargeRequest {
            payment_id,
            amount,
            method,
            transaction_id: data
                .transaction_id
                .clone()
                .or_else(|| payment.transaction_id.clone()),
        };
        let outcome = match self.gateway.charge(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Gateway call failed");
                self.mark_failed(payment_id, INTERNAL_ERROR_REASON).await;
                return Err(JobFailure::retryable(e.to_string()));
            }
        };
        self.progress(queue, job.lease(), 80).await;

        match outcome {
            GatewayOutcome::Approved {
                transaction_id,
                response,
            } => {
                let transition = Transition::Complete {
                    transaction_id: transaction_id.clone(),
                    gateway_response: response,
                };
                let completed = match self
                    .payments
                    .transition(payment_id, PaymentStatus::Processing, transition)
                    .await
                {
                    Ok(CasOutcome::Applied(completed)) => completed,
                    Ok(CasOutcome::StatusMismatch(status)) => {
                        warn!(status = %status, "Payment changed while charging; result dropped");
                        return Ok(json!({
                            "success": true,
                            "skipped": true,
                            "paymentId": payment_id,
                            "status": status,
                        }));
                    }
                    Ok(CasOutcome::Missing) => {
                        return Err(JobFailure::fatal(format!("Payment {} not found", payment_id)));
                    }
                    Err(e) => {
                        self.mark_failed(payment_id, INTERNAL_ERROR_REASON).await;
                        return Err(JobFailure::retryable(e.to_string()));
                    }
                };
                self.progress(queue, job.lease(), 100).await;
                info!(transaction_id = %transaction_id, "Payment completed");
                Ok(json!({
                    "success": true,
                    "paymentId": payment_id,
                    "transactionId": transaction_id,
                    "processedAt": completed.processed_at,
                }))
            }
            GatewayOutcome::Declined { reason } => {
                self.mark_failed(payment_id, &reason).await;
                warn!(reason = %reason, "Payment declined");
                Err(JobFailure::retryable(reason))
            }
        }
    }

    /// Decides whether this delivery may process the payment.
    ///
    /// A PENDING payment is claimed with a compare-and-set. A PROCESSING one
    /// is only resumed by a redelivery of a job whose earlier run stalled or
    /// failed mid-flight. A FAILED one is re-opened only by a queue retry of
    /// the job that failed it. Anything else is skipped.
    async fn claim(&self, id: PaymentId, job: &Job) -> Result<Claim> {
        let current = self
            .payments
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found(PaymentId::LABEL, id))?;

        match current.status {
            PaymentStatus::Pending => self.start_processing(id).await,
            PaymentStatus::Processing if job.is_redelivery() => Ok(Claim::Owned(current)),
            PaymentStatus::Failed if job.attempts_made > 0 => {
                match self
                    .payments
                    .transition(id, PaymentStatus::Failed, Transition::Reset)
                    .await?
                {
                    CasOutcome::Applied(_) => self.start_processing(id).await,
                    CasOutcome::StatusMismatch(status) => Ok(Claim::Skip(status)),
                    CasOutcome::Missing => Err(PaymentError::not_found(PaymentId::LABEL, id)),
                }
            }
            status => Ok(Claim::Skip(status)),
        }
    }

    async fn start_processing(&self, id: PaymentId) -> Result<Claim> {
        match self
            .payments
            .transition(id, PaymentStatus::Pending, Transition::StartProcessing)
            .await?
        {
            CasOutcome::Applied(payment) => Ok(Claim::Owned(payment)),
            CasOutcome::StatusMismatch(status) => Ok(Claim::Skip(status)),
            CasOutcome::Missing => Err(PaymentError::not_found(PaymentId::LABEL, id)),
        }
    }

    /// Best effort PROCESSING -> FAILED.
    async fn mark_failed(&self, id: PaymentId, reason: &str) {
        let transition = Transition::Fail {
            reason: reason.to_string(),
            gateway_response: FAILED_GATEWAY_RESPONSE.to_string(),
        };
        match self
            .payments
            .transition(id, PaymentStatus::Processing, transition)
            .await
        {
            Ok(CasOutcome::Applied(_)) => {}
            Ok(other) => warn!(payment_id = %id, outcome = ?other, "Could not mark payment failed"),
            Err(e) => error!(payment_id = %id, error = %e, "Could not mark payment failed"),
        }
    }

    #[instrument(skip_all, fields(job_id = %job.id, payment_id = %data.payment_id))]
    async fn send_notification(
        &self,
        queue: &dyn JobQueue,
        job: &Job,
        data: &NotificationJob,
    ) -> std::result::Result<Value, JobFailure> {
        let recipient = data.recipient.as_deref().unwrap_or("unknown recipient");
        info!(kind = %data.notification_type, recipient, "Sending notification");
        self.progress(queue, job.lease(), 25).await;

        let latency = Duration::from_millis(self.notifications.send_latency_ms);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.progress(queue, job.lease(), 75).await;

        match data.notification_type {
            NotificationType::PaymentSuccess => {
                info!(recipient, amount = ?data.amount, "Payment success notification sent")
            }
            NotificationType::PaymentFailure => {
                info!(recipient, "Payment failure notification sent")
            }
        }
        self.progress(queue, job.lease(), 100).await;

        Ok(json!({
            "success": true,
            "type": data.notification_type,
            "paymentId": data.payment_id,
            "recipient": data.recipient,
            "sentAt": Utc::now(),
        }))
    }

    /// Progress doubles as the lock heartbeat. Returns false when the update
    /// was rejected, which callers treat as a lost lock where it matters.
    async fn progress(&self, queue: &dyn JobQueue, lease: JobLease, value: u8) -> bool {
        match queue.update_progress(lease, value).await {
            Ok(()) => true,
            Err(e) => {
                debug!(job_id = %lease.id, error = %e, "Progress update rejected");
                false
            }
        }
    }
}
