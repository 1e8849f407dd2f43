use crate::config::EngineConfig;
use crate::domain::ids::{CheckoutId, PaymentId, parse_id};
use crate::domain::page::{Page, PageRequest};
use crate::domain::payment::{
    CreatePayment, MAX_TRANSACTION_ID_LEN, Payment, PaymentStatus, PaymentStatusView, Transition,
};
use crate::domain::ports::{CasOutcome, CheckoutStoreRef, PaymentStoreRef, UserDirectoryRef};
use crate::error::{PaymentError, Result};
use crate::queue::{
    JobId, JobOptions, JobPayload, JobQueueRef, NotificationJob, NotificationType, PaymentJob,
};
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};

pub const CANCEL_REASON: &str = "Payment cancelled by user";

/// Creates payments for checkouts and hands them to the payment queue.
///
/// Status changes go through the store's compare-and-set so that a cancel or
/// retry racing with the worker can never overwrite the worker's outcome.
pub struct PaymentService {
    payments: PaymentStoreRef,
    checkouts: CheckoutStoreRef,
    users: UserDirectoryRef,
    payment_queue: JobQueueRef,
    notification_queue: JobQueueRef,
    config: EngineConfig,
}

impl PaymentService {
    pub fn new(
        payments: PaymentStoreRef,
        checkouts: CheckoutStoreRef,
        users: UserDirectoryRef,
        payment_queue: JobQueueRef,
        notification_queue: JobQueueRef,
        config: EngineConfig,
    ) -> Self {
        Self {
            payments,
            checkouts,
            users,
            payment_queue,
            notification_queue,
            config,
        }
    }

    /// Creates a PENDING payment for the checkout total and enqueues its
    /// processing job with the default delay, attempts and backoff.
    #[instrument(skip(self, request), fields(checkout_id = %request.checkout_id))]
    pub async fn create(&self, request: CreatePayment) -> Result<Payment> {
        let payment = self.insert_payment(request).await?;
        let job_id = self
            .enqueue_processing(&payment, 0, self.config.payment_job_options())
            .await?;
        info!(payment_id = %payment.id, job_id = %job_id, amount = %payment.amount, "Payment queued for processing");
        Ok(payment)
    }

    /// Like [`create`](Self::create), then enqueues an extra job with the
    /// given priority. Whichever job is delivered first claims the payment.
    pub async fn process_payment_with_priority(
        &self,
        request: CreatePayment,
        priority: u32,
    ) -> Result<Payment> {
        let payment = self.create(request).await?;
        let options = self.config.retention_only_options().with_priority(priority);
        let job_id = self.enqueue_processing(&payment, 0, options).await?;
        info!(payment_id = %payment.id, job_id = %job_id, priority, "Priority job queued");
        Ok(payment)
    }

    /// Like [`create`](Self::create), then enqueues an extra job that only
    /// becomes eligible after `delay`.
    pub async fn process_payment_with_delay(
        &self,
        request: CreatePayment,
        delay: Duration,
    ) -> Result<Payment> {
        let payment = self.create(request).await?;
        let options = self.config.retention_only_options().with_delay(delay);
        let job_id = self.enqueue_processing(&payment, 0, options).await?;
        info!(payment_id = %payment.id, job_id = %job_id, delay_ms = delay.as_millis() as u64, "Delayed job queued");
        Ok(payment)
    }

    pub async fn find_all(&self, page: PageRequest) -> Result<Page<Payment>> {
        let (items, total) = self.payments.list(page).await?;
        Ok(Page::new(items, total, page))
    }

    pub async fn find_one(&self, id: &str) -> Result<Payment> {
        let id: PaymentId = parse_id(id)?;
        self.load(id).await
    }

    pub async fn get_status(&self, id: &str) -> Result<PaymentStatusView> {
        let payment = self.find_one(id).await?;
        Ok(PaymentStatusView::from(&payment))
    }

    /// The payment of a checkout, if one was created.
    pub async fn find_by_checkout(&self, checkout_id: &str) -> Result<Option<Payment>> {
        let checkout_id: CheckoutId = parse_id(checkout_id)?;
        self.payments.find_by_checkout(checkout_id).await
    }

    /// Cancels a PENDING payment. Any other status is an invalid state.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: &str) -> Result<Payment> {
        let id: PaymentId = parse_id(id)?;
        let current = self.load(id).await?;
        if current.status != PaymentStatus::Pending {
            return Err(cannot_cancel(current.status));
        }

        let transition = Transition::Cancel {
            reason: CANCEL_REASON.to_string(),
        };
        match self
            .payments
            .transition(id, PaymentStatus::Pending, transition)
            .await?
        {
            CasOutcome::Applied(payment) => {
                info!(payment_id = %id, "Payment cancelled");
                Ok(payment)
            }
            CasOutcome::StatusMismatch(status) => Err(cannot_cancel(status)),
            CasOutcome::Missing => Err(PaymentError::not_found(PaymentId::LABEL, id)),
        }
    }

    /// Moves a FAILED payment back to PENDING and enqueues a retry job.
    #[instrument(skip(self))]
    pub async fn retry_failed_payment(&self, id: &str) -> Result<Payment> {
        let id: PaymentId = parse_id(id)?;
        let current = self.load(id).await?;
        if current.status != PaymentStatus::Failed {
            return Err(cannot_retry(current.status));
        }

        let payment = match self
            .payments
            .transition(id, PaymentStatus::Failed, Transition::Reset)
            .await?
        {
            CasOutcome::Applied(payment) => payment,
            CasOutcome::StatusMismatch(status) => return Err(cannot_retry(status)),
            CasOutcome::Missing => return Err(PaymentError::not_found(PaymentId::LABEL, id)),
        };

        let job_id = self
            .enqueue_processing(&payment, 1, self.config.retry_job_options())
            .await?;
        info!(payment_id = %id, job_id = %job_id, "Payment queued for retry");
        Ok(payment)
    }

    /// Enqueues a success or failure notification for the payment.
    ///
    /// The recipient is the checkout owner's e-mail when it can be resolved,
    /// otherwise the configured fallback recipient.
    pub async fn send_payment_notification(
        &self,
        id: &str,
        notification_type: NotificationType,
    ) -> Result<JobId> {
        let id: PaymentId = parse_id(id)?;
        let payment = self.load(id).await?;
        let recipient = self.resolve_recipient(payment.checkout_id).await;

        let payload = JobPayload::SendNotification(NotificationJob {
            notification_type,
            payment_id: payment.id,
            recipient,
            amount: Some(payment.amount),
        });
        let job_id = self
            .notification_queue
            .add(payload, self.config.retention_only_options())
            .await?;
        info!(payment_id = %id, job_id = %job_id, kind = %notification_type, "Notification queued");
        Ok(job_id)
    }

    async fn insert_payment(&self, request: CreatePayment) -> Result<Payment> {
        let checkout_id: CheckoutId = parse_id(&request.checkout_id)?;
        if let Some(transaction_id) = &request.transaction_id
            && transaction_id.len() > MAX_TRANSACTION_ID_LEN
        {
            return Err(PaymentError::ValidationError(format!(
                "Transaction ID must be at most {} characters",
                MAX_TRANSACTION_ID_LEN
            )));
        }

        let checkout = self
            .checkouts
            .get(checkout_id)
            .await?
            .ok_or_else(|| PaymentError::not_found(CheckoutId::LABEL, checkout_id))?;

        if self.payments.find_by_checkout(checkout_id).await?.is_some() {
            return Err(PaymentError::DuplicatePayment(checkout_id.to_string()));
        }

        let payment = Payment::new(
            checkout_id,
            checkout.total_amount,
            request.method,
            request.transaction_id,
            Utc::now(),
        );
        self.payments.insert(payment.clone()).await?;
        Ok(payment)
    }

    async fn enqueue_processing(
        &self,
        payment: &Payment,
        retry_count: u32,
        options: JobOptions,
    ) -> Result<JobId> {
        let payload = JobPayload::ProcessPayment(PaymentJob {
            payment_id: payment.id.to_string(),
            amount: payment.amount.value(),
            method: Some(payment.method),
            transaction_id: payment.transaction_id.clone(),
            retry_count,
        });
        self.payment_queue
            .add(payload, options)
            .await
            .inspect_err(|e| error!(payment_id = %payment.id, error = %e, "Failed to enqueue payment job"))
    }

    async fn resolve_recipient(&self, checkout_id: CheckoutId) -> Option<String> {
        let owner = match self.checkouts.get(checkout_id).await {
            Ok(Some(checkout)) => self.users.find_user(checkout.user_id).await,
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        match owner {
            Ok(Some(user)) => Some(user.email),
            Ok(None) => self.config.notifications.fallback_recipient.clone(),
            Err(e) => {
                warn!(checkout_id = %checkout_id, error = %e, "Could not resolve notification recipient");
                self.config.notifications.fallback_recipient.clone()
            }
        }
    }

    async fn load(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::not_found(PaymentId::LABEL, id))
    }
}

fn cannot_cancel(status: PaymentStatus) -> PaymentError {
    PaymentError::InvalidState(format!(
        "Cannot cancel payment with status {}. Only pending payments can be cancelled.",
        status
    ))
}

fn cannot_retry(status: PaymentStatus) -> PaymentError {
    PaymentError::InvalidState(format!(
        "Cannot retry payment with status {}. Only failed payments can be retried.",
        status
    ))
}
