//! Ledger Error Types
//!
//! One taxonomy for every entry point of the engine. Business-rule and
//! input failures go back to the caller; transient ones are retried.

use rust_decimal::Decimal;
use std::time::Duration;
use thiserror::Error;

use super::order_number::ValidationError;
use crate::accrual::RemoteError;
use crate::sync::Retryable;

/// SQLSTATE serialization_failure
const PG_SERIALIZATION_FAILURE: &str = "40001";
/// SQLSTATE deadlock_detected
const PG_DEADLOCK_DETECTED: &str = "40P01";
/// SQLSTATE class 23: integrity_constraint_violation
const PG_INTEGRITY_CLASS: &str = "23";

#[derive(Error, Debug)]
pub enum LedgerError {
    // === Caller Errors (not retried) ===
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Order number {number} belongs to another user")]
    Conflict { number: String },

    #[error("Order number {number} already accepted for this user")]
    SoftConflict {
        number: String,
        order_id: crate::core_types::OrderId,
    },

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Login already taken: {0}")]
    LoginTaken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A constraint rejected the write; retrying cannot help
    #[error("Integrity violation: {0}")]
    Integrity(String),

    // === Transient Errors (retried) ===
    #[error("Accrual service error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Lock contention: {0}")]
    LockContention(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::Conflict { .. } => "CONFLICT",
            LedgerError::SoftConflict { .. } => "ALREADY_ACCEPTED",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::LoginTaken(_) => "LOGIN_TAKEN",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Integrity(_) => "INTEGRITY_VIOLATION",
            LedgerError::Remote(_) => "REMOTE_ERROR",
            LedgerError::LockContention(_) => "LOCK_CONTENTION",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Get HTTP status code suggestion for the transport layer
    pub fn http_status(&self) -> u16 {
        match self {
            LedgerError::InvalidInput(_) => 422,
            LedgerError::Conflict { .. } | LedgerError::LoginTaken(_) => 409,
            LedgerError::SoftConflict { .. } => 200,
            LedgerError::InsufficientFunds { .. } => 402,
            LedgerError::NotFound(_) => 404,
            LedgerError::Remote(_) | LedgerError::LockContention(_) => 503,
            LedgerError::Integrity(_) | LedgerError::Database(_) => 500,
        }
    }
}

impl Retryable for LedgerError {
    fn is_retryable(&self) -> bool {
        match self {
            LedgerError::Remote(e) => e.is_retryable(),
            LedgerError::LockContention(_) | LedgerError::Database(_) => true,
            LedgerError::InvalidInput(_)
            | LedgerError::Conflict { .. }
            | LedgerError::SoftConflict { .. }
            | LedgerError::InsufficientFunds { .. }
            | LedgerError::LoginTaken(_)
            | LedgerError::NotFound(_)
            | LedgerError::Integrity(_) => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            LedgerError::Remote(e) => e.retry_after(),
            _ => None,
        }
    }
}

impl From<ValidationError> for LedgerError {
    fn from(e: ValidationError) -> Self {
        LedgerError::InvalidInput(e.to_string())
    }
}

impl LedgerError {
    /// Classify a Postgres error by SQLSTATE
    fn from_sqlstate(code: &str, message: &str) -> Self {
        if code == PG_SERIALIZATION_FAILURE || code == PG_DEADLOCK_DETECTED {
            LedgerError::LockContention(message.to_string())
        } else if code.starts_with(PG_INTEGRITY_CLASS) {
            LedgerError::Integrity(format!("{message} (SQLSTATE {code})"))
        } else {
            LedgerError::Database(format!("{message} (SQLSTATE {code})"))
        }
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => match db.code() {
                Some(code) => LedgerError::from_sqlstate(&code, db.message()),
                None => LedgerError::Database(e.to_string()),
            },
            sqlx::Error::RowNotFound => LedgerError::NotFound("row".to_string()),
            _ => LedgerError::Database(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(
            LedgerError::Conflict {
                number: "0".into()
            }
            .code(),
            "CONFLICT"
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                requested: Decimal::ONE,
                available: Decimal::ZERO,
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(LedgerError::InvalidInput("x".into()).http_status(), 422);
        assert_eq!(
            LedgerError::Conflict {
                number: "0".into()
            }
            .http_status(),
            409
        );
        assert_eq!(
            LedgerError::SoftConflict {
                number: "0".into(),
                order_id: crate::core_types::OrderId::nil(),
            }
            .http_status(),
            200
        );
        assert_eq!(
            LedgerError::InsufficientFunds {
                requested: Decimal::ONE,
                available: Decimal::ZERO,
            }
            .http_status(),
            402
        );
    }

    #[test]
    fn test_business_errors_are_not_retryable() {
        assert!(!LedgerError::InvalidInput("x".into()).is_retryable());
        assert!(
            !LedgerError::Conflict {
                number: "0".into()
            }
            .is_retryable()
        );
        assert!(
            !LedgerError::InsufficientFunds {
                requested: Decimal::ONE,
                available: Decimal::ZERO,
            }
            .is_retryable()
        );
        assert!(!LedgerError::NotFound("user".into()).is_retryable());
    }

    #[test]
    fn test_sqlstate_classification() {
        assert!(matches!(
            LedgerError::from_sqlstate("40001", "could not serialize access"),
            LedgerError::LockContention(_)
        ));
        assert!(matches!(
            LedgerError::from_sqlstate("40P01", "deadlock detected"),
            LedgerError::LockContention(_)
        ));
        for code in ["23503", "23514", "23505"] {
            let err = LedgerError::from_sqlstate(code, "violates constraint");
            assert!(matches!(err, LedgerError::Integrity(_)), "{code}");
            assert!(!err.is_retryable());
            assert_eq!(err.code(), "INTEGRITY_VIOLATION");
        }
        let other = LedgerError::from_sqlstate("08006", "connection failure");
        assert!(matches!(other, LedgerError::Database(_)));
        assert!(other.is_retryable());
    }

    #[test]
    fn test_row_not_found_is_not_retried() {
        let err = LedgerError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(LedgerError::LockContention("could not serialize".into()).is_retryable());
        assert!(LedgerError::Database("pool timed out".into()).is_retryable());
        assert!(
            LedgerError::Remote(RemoteError::Transport("connection refused".into()))
                .is_retryable()
        );
    }

    #[test]
    fn test_validation_error_maps_to_invalid_input() {
        let err: LedgerError = ValidationError::Empty.into();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[test]
    fn test_sqlx_pool_error_maps_to_database() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, LedgerError::Database(_)));
    }
}
