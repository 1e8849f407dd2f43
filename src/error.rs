use thiserror::Error;

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("{entity} with ID {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("Payment already exists for checkout {0}")]
    DuplicatePayment(String),
    #[error(
        "Insufficient stock for product {product}. Available: {available}, requested: {requested}"
    )]
    InsufficientStock {
        product: String,
        available: u32,
        requested: u32,
    },
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[error("Internal processing error: {0}")]
    InternalProcessing(String),
    #[error("Queue error: {0}")]
    QueueError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
}

impl PaymentError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PaymentError>;
