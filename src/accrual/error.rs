use std::time::Duration;
use thiserror::Error;

use crate::sync::Retryable;

/// Failure talking to the accrual provider. Every variant is transient from
/// the engine's point of view: the order stays unsettled and is retried.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RemoteError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Provider responded {status}: {body}")]
    Status {
        status: u16,
        body: String,
        retry_after: Option<Duration>,
    },

    #[error("Malformed provider response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, RemoteError::Status { status: 429, .. })
    }
}

impl Retryable for RemoteError {
    fn is_retryable(&self) -> bool {
        true
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            RemoteError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_carries_retry_after() {
        let err = RemoteError::Status {
            status: 429,
            body: "slow down".into(),
            retry_after: Some(Duration::from_secs(1)),
        };
        assert!(err.is_throttled());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_status_message_keeps_body() {
        let err = RemoteError::Status {
            status: 500,
            body: "boom".into(),
            retry_after: None,
        };
        assert_eq!(err.to_string(), "Provider responded 500: boom");
        assert!(!err.is_throttled());
        assert_eq!(err.retry_after(), None);
    }
}
