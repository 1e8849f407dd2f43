use super::ids::{CheckoutId, PaymentId};
use super::money::Money;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length accepted for a caller supplied gateway transaction id.
pub const MAX_TRANSACTION_ID_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    BankTransfer,
    Pix,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::DebitCard => "debit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Pix => "pix",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = PaymentError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "debit_card" => Ok(PaymentMethod::DebitCard),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "pix" => Ok(PaymentMethod::Pix),
            _ => Err(PaymentError::ValidationError(format!(
                "Unsupported payment method: {}",
                raw
            ))),
        }
    }
}

/// Payment lifecycle.
///
/// ```text
/// PENDING -> PROCESSING -> COMPLETED
///    |           |
///    |           +-------> FAILED -> PENDING (retry)
///    +-> CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl PaymentStatus {
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Completed | PaymentStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Processing => "processing",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status change together with the fields it writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    StartProcessing,
    Complete {
        transaction_id: String,
        gateway_response: String,
    },
    Fail {
        reason: String,
        gateway_response: String,
    },
    Cancel {
        reason: String,
    },
    /// FAILED back to PENDING; clears the failure reason.
    Reset,
}

impl Transition {
    pub fn target(&self) -> PaymentStatus {
        match self {
            Transition::StartProcessing => PaymentStatus::Processing,
            Transition::Complete { .. } => PaymentStatus::Completed,
            Transition::Fail { .. } => PaymentStatus::Failed,
            Transition::Cancel { .. } => PaymentStatus::Cancelled,
            Transition::Reset => PaymentStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayment {
    pub checkout_id: String,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
}

impl CreatePayment {
    pub fn new(checkout_id: impl Into<String>, method: PaymentMethod) -> Self {
        Self {
            checkout_id: checkout_id.into(),
            method,
            transaction_id: None,
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }
}

/// The tracked attempt to settle a checkout's total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub checkout_id: CheckoutId,
    pub amount: Money,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub gateway_response: Option<String>,
    pub failure_reason: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    pub fn new(
        checkout_id: CheckoutId,
        amount: Money,
        method: PaymentMethod,
        transaction_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            checkout_id,
            amount,
            method,
            status: PaymentStatus::Pending,
            transaction_id,
            gateway_response: None,
            failure_reason: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `transition`, rejecting any edge not in the state graph.
    pub fn apply(&mut self, transition: &Transition, now: DateTime<Utc>) -> Result<()> {
        let target = transition.target();
        if !self.status.can_transition_to(target) {
            return Err(PaymentError::InvalidState(format!(
                "Cannot move payment {} from {} to {}",
                self.id, self.status, target
            )));
        }

        match transition {
            Transition::StartProcessing => {}
            Transition::Complete {
                transaction_id,
                gateway_response,
            } => {
                self.transaction_id = Some(transaction_id.clone());
                self.gateway_response = Some(gateway_response.clone());
                self.failure_reason = None;
                self.processed_at = Some(now);
            }
            Transition::Fail {
                reason,
                gateway_response,
            } => {
                self.failure_reason = Some(reason.clone());
                self.gateway_response = Some(gateway_response.clone());
                self.processed_at = Some(now);
            }
            Transition::Cancel { reason } => {
                self.failure_reason = Some(reason.clone());
                self.processed_at = Some(now);
            }
            Transition::Reset => {
                self.failure_reason = None;
            }
        }
        self.status = target;
        self.updated_at = now;
        Ok(())
    }
}

/// Lightweight status projection of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub id: PaymentId,
    pub status: PaymentStatus,
    pub updated_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
}

impl From<&Payment> for PaymentStatusView {
    fn from(payment: &Payment) -> Self {
        Self {
            id: payment.id,
            status: payment.status,
            updated_at: payment.updated_at,
            failure_reason: payment.failure_reason.clone(),
        }
    }
}
