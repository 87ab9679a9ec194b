use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable error codes reported across the ledger API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    InsufficientFunds,
    NotFound,
    Unauthorized,
    InvalidState,
    ConcurrencyConflict,
    Storage,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown revenue context: {0}")]
    UnknownContext(String),

    #[error("Insufficient funds: have {available}, need {required}")]
    InsufficientFunds { available: u64, required: u64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Concurrency conflict after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Validation(_) | Error::UnknownContext(_) => ErrorCode::Validation,
            Error::InsufficientFunds { .. } => ErrorCode::InsufficientFunds,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Unauthorized(_) => ErrorCode::Unauthorized,
            Error::InvalidState(_) => ErrorCode::InvalidState,
            Error::ConcurrencyConflict { .. } => ErrorCode::ConcurrencyConflict,
            Error::Storage(_) => ErrorCode::Storage,
        }
    }

    /// Only commit conflicts are retried by the engine; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ConcurrencyConflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            Error::UnknownContext("x".into()).code(),
            ErrorCode::Validation
        );
        assert_eq!(
            Error::InsufficientFunds {
                available: 1,
                required: 2
            }
            .code(),
            ErrorCode::InsufficientFunds
        );
        assert!(Error::ConcurrencyConflict { attempts: 1 }.is_retryable());
        assert!(!Error::NotFound("w".into()).is_retryable());
    }

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::InsufficientFunds).unwrap();
        assert_eq!(json, "\"INSUFFICIENT_FUNDS\"");
    }
}
