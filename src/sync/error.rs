use std::time::Duration;
use thiserror::Error;

use super::retry::Retryable;
use crate::ledger::LedgerError;

/// Failure of one job attempt
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Job attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Job attempt panicked: {0}")]
    Panicked(String),
}

impl Retryable for JobError {
    fn is_retryable(&self) -> bool {
        match self {
            JobError::Ledger(e) => e.is_retryable(),
            JobError::Timeout(_) | JobError::Panicked(_) => true,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            JobError::Ledger(e) => e.retry_after(),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Worker pool is stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_and_panic_are_retryable() {
        assert!(JobError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(JobError::Panicked("boom".into()).is_retryable());
    }

    #[test]
    fn test_ledger_classification_passes_through() {
        let err: JobError = LedgerError::InvalidInput("bad".into()).into();
        assert!(!err.is_retryable());
        let err: JobError = LedgerError::LockContention("40001".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "Lock contention: 40001");
    }
}
