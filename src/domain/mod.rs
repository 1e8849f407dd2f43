//! Domain layer: entities, value objects and the ports the application
//! layer depends on.

pub mod catalog;
pub mod checkout;
pub mod ids;
pub mod money;
pub mod page;
pub mod payment;
pub mod ports;
