use crate::domain::payment::Payment;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

/// One output row: the final state of an order's payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRow {
    pub order: String,
    pub checkout_id: String,
    pub payment_id: String,
    pub status: String,
    pub amount: String,
    pub method: String,
    pub transaction_id: String,
    pub failure_reason: String,
}

impl PaymentRow {
    pub fn new(order: &str, payment: &Payment) -> Self {
        Self {
            order: order.to_string(),
            checkout_id: payment.checkout_id.to_string(),
            payment_id: payment.id.to_string(),
            status: payment.status.to_string(),
            amount: payment.amount.to_string(),
            method: payment.method.to_string(),
            transaction_id: payment.transaction_id.clone().unwrap_or_default(),
            failure_reason: payment.failure_reason.clone().unwrap_or_default(),
        }
    }
}

/// Writes payment rows as CSV, header first.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write_payments(&mut self, rows: impl IntoIterator<Item = PaymentRow>) -> Result<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
