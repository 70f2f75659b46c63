//! Error types for comment reconciliation and retraction.

use std::time::Duration;
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors raised by remote-store calls, the executor, and the flows built on them.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed input, detected before any mutation
    #[error("validation failed: {0}")]
    Validation(String),

    /// Requester lacks the permission needed for the operation
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// Remote store throttled the caller
    #[error("rate limit exceeded: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Target resource does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Network, DNS, or TLS failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Unclassified API failure
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The shared cancellation signal fired before the operation finished
    #[error("operation cancelled")]
    Cancelled,

    /// Terminal error after the retry policy gave up
    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// True when the error means the caller was throttled.
    ///
    /// Falls back to a case-insensitive text match so throttling reported
    /// through an unclassified error is still recognised.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::RetriesExhausted { source, .. } => source.is_rate_limited(),
            Self::Cancelled => false,
            other => mentions_rate_limit(&other.to_string()),
        }
    }

    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::RetriesExhausted { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::RetriesExhausted { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    pub fn is_authorization(&self) -> bool {
        matches!(self, Self::Authorization(_))
    }

    /// Number of attempts recorded on a terminal error, if any.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Server-provided hint for how long to back off.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn mentions_rate_limit(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") || lower.contains("abuse")
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_rate_limit_is_classified() {
        let err = SyncError::RateLimited {
            message: "secondary".to_string(),
            retry_after: Some(Duration::from_secs(3)),
        };
        assert!(err.is_rate_limited());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_rate_limit_text_heuristic() {
        let err = SyncError::Api {
            status: 403,
            message: "You have exceeded a secondary Rate Limit".to_string(),
        };
        assert!(err.is_rate_limited());

        let err = SyncError::Transport("abuse detection mechanism triggered".to_string());
        assert!(err.is_rate_limited());
        assert!(err.is_transport());

        let err = SyncError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        assert!(!err.is_rate_limited());
    }

    #[test]
    fn test_exhausted_keeps_classification_of_source() {
        let err = SyncError::RetriesExhausted {
            attempts: 4,
            source: Box::new(SyncError::NotFound("comment 7".to_string())),
        };
        assert!(err.is_not_found());
        assert_eq!(err.attempts(), Some(4));
        assert_eq!(
            err.to_string(),
            "gave up after 4 attempts: not found: comment 7"
        );
    }
}
