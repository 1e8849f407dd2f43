//! Batch CSV adapters used by the command line binary.

pub mod csv;
