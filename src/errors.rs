//! Error types for the round engine
//!
//! Errors are grouped by how callers must react to them: validation and domain
//! errors are returned synchronously with no side effects, storage errors are
//! transient and abort the enclosing transaction, delivery errors only concern
//! the asynchronous ledger queue and are logged rather than propagated.

use thiserror::Error;

/// Root error type for all engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed request
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Business rule rejected the request
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Store, cache or lock unavailable
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Ledger task could not be delivered
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Request validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid stake {stake}: must be within [{min}, {max}]")]
    InvalidStake { stake: i64, min: i64, max: i64 },

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("Unknown bet type: {0}")]
    UnknownBetType(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Invalid digit: {0}")]
    InvalidDigit(u8),
}

/// Business rule violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Betting not allowed in room {bet_type}")]
    BettingNotAllowed { bet_type: String },

    #[error("Room does not exist: {0}")]
    RoomNotExist(String),

    #[error("Period {0} is closed for betting")]
    PeriodClosed(String),

    #[error("Period not found: {0}")]
    PeriodNotFound(String),

    #[error("Order not found: {0}")]
    OrderNotFound(String),

    #[error("Order {0} can no longer be cancelled")]
    OrderNotCancellable(String),

    #[error("User not found: {0}")]
    UserNotFound(u64),

    #[error("Wallet not found: {0}")]
    WalletNotFound(u64),
}

/// Transient storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),

    #[error("Timed out acquiring lock {0}")]
    LockTimeout(String),
}

/// Ledger delivery errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("Task queue closed")]
    QueueClosed,

    #[error("Task {task_id} failed after {attempts} attempts: {reason}")]
    RetriesExhausted {
        task_id: String,
        attempts: u32,
        reason: String,
    },
}

/// Configuration and validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

impl EngineError {
    /// Whether retrying the same request later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Storage(_) | EngineError::Delivery(_))
    }

    /// Short machine-readable reason, used for metric labels and API codes
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Domain(DomainError::InsufficientBalance { .. }) => "insufficient_balance",
            EngineError::Domain(DomainError::BettingNotAllowed { .. }) => "betting_not_allowed",
            EngineError::Domain(DomainError::RoomNotExist(_)) => "room_not_exist",
            EngineError::Domain(DomainError::PeriodClosed(_)) => "period_closed",
            EngineError::Domain(_) => "domain",
            EngineError::Storage(_) => "storage",
            EngineError::Delivery(_) => "delivery",
            EngineError::Configuration(_) => "configuration",
        }
    }
}

impl From<rocksdb::Error> for EngineError {
    fn from(e: rocksdb::Error) -> Self {
        EngineError::Storage(StorageError::WriteFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Storage(StorageError::Unavailable(e.to_string()))
    }
}

// Convenience type alias for Results
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err: EngineError = DomainError::InsufficientBalance {
            required: 600,
            available: 500,
        }
        .into();

        assert!(err.to_string().contains("Domain error"));
        assert!(err.to_string().contains("required 600"));
        assert!(err.to_string().contains("available 500"));
    }

    #[test]
    fn test_transient_classification() {
        let storage: EngineError = StorageError::Unavailable("down".to_string()).into();
        let domain: EngineError = DomainError::RoomNotExist("wingo7".to_string()).into();

        assert!(storage.is_transient());
        assert!(!domain.is_transient());
        assert_eq!(domain.reason(), "room_not_exist");
    }

    #[test]
    fn test_error_source() {
        let err: EngineError = ValidationError::MissingField("request_id").into();
        assert!(err.source().is_some());
    }
}
