//! Checkout and asynchronous payment processing core.
//!
//! Carts become priced checkouts, checkouts become payments, and payments
//! are settled by background workers pulling jobs from a retrying queue.

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interfaces;
pub mod queue;
