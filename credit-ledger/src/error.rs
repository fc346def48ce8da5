//! Error types for the credit ledger

use crate::types::{TransactionType, UserId};
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Non-positive (or overflowing) amount passed to a posting
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Spend exceeds the spendable balance
    #[error("Insufficient credits for {user_id}: available {available}, required {required}")]
    InsufficientBalance {
        /// Account owner
        user_id: UserId,
        /// Spendable balance at the time of the check
        available: i64,
        /// Amount the caller tried to spend
        required: i64,
    },

    /// Tunable missing or deactivated
    #[error("Config not found: {0}")]
    ConfigNotFound(String),

    /// Transaction type does not match the posting direction
    #[error("Transaction type {transaction_type} cannot be used for {direction}")]
    InvalidTransactionType {
        /// Offending type
        transaction_type: TransactionType,
        /// "earn" or "spend"
        direction: &'static str,
    },

    /// Idempotency key reused for a different posting
    #[error("Idempotency key {key} already used for a different posting")]
    IdempotencyConflict {
        /// The reused key
        key: String,
    },

    /// A user tried to refer themselves
    #[error("User {0} cannot refer themselves")]
    SelfReferral(UserId),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Invariant violation (balance chain, non-negative balance)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking task failed or was cancelled
    #[error("Concurrency error: {0}")]
    Concurrency(String),
}

impl Error {
    /// Whether the caller may retry the operation.
    ///
    /// A retried `spend`/`earn` must carry the same idempotency key, since the
    /// first attempt may already have committed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Concurrency(_) | Error::Io(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_balance_message_is_actionable() {
        let user_id = UserId::new();
        let err = Error::InsufficientBalance {
            user_id,
            available: 50,
            required: 100,
        };
        let msg = err.to_string();
        assert!(msg.contains("available 50"));
        assert!(msg.contains("required 100"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_errors_are_retryable() {
        assert!(Error::Storage("lock timeout".into()).is_retryable());
        assert!(!Error::InvalidAmount(0).is_retryable());
    }
}
