use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by every engine operation.
///
/// A failed unit of work is rolled back before one of these reaches the caller, so no variant
/// ever implies a partial balance or status change.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A state-machine precondition did not hold. Callers treat this as "already handled".
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient funds in wallet {wallet_id}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        wallet_id: Uuid,
        balance: Decimal,
        requested: Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "storage-rocksdb")]
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),
}

impl LedgerError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{what} {id}"))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether the operation may succeed if the caller simply tries again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable(_) | Self::Storage(_) | Self::Io(_) => true,
            #[cfg(feature = "storage-rocksdb")]
            Self::RocksDb(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_conflict_is_not_retryable() {
        let err = LedgerError::Conflict("already captured".to_string());
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_provider_unavailable_is_retryable() {
        assert!(LedgerError::ProviderUnavailable("timeout".to_string()).is_retryable());
        assert!(!LedgerError::SignatureInvalid.is_retryable());
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = LedgerError::InsufficientFunds {
            wallet_id: Uuid::nil(),
            balance: dec!(5),
            requested: dec!(10),
        };
        let message = err.to_string();
        assert!(message.contains("balance 5"));
        assert!(message.contains("requested 10"));
    }
}
