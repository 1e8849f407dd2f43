//! Application services.
//!
//! [`CheckoutService`] and [`PaymentService`] are the synchronous request
//! side; [`PaymentWorker`] consumes the queues; [`EventObserver`] and
//! [`QueueAdmin`] are the operational side. [`WorkerPool`] wires workers and
//! observers onto a set of queues.

pub mod admin;
pub mod checkout;
pub mod observer;
pub mod payments;
pub mod runtime;
pub mod worker;

pub use admin::{CleanReport, QueueAdmin};
pub use checkout::CheckoutService;
pub use observer::{EventObserver, MetricsSnapshot, ObserverMetrics};
pub use payments::PaymentService;
pub use runtime::{WorkerPool, wait_until_drained};
pub use worker::PaymentWorker;
