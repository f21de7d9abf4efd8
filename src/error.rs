//! Error types for the indexer

use thiserror::Error;

/// Errors surfaced by the fetcher, store, and NZB assembler
#[derive(Error, Debug)]
pub enum IndexError {
    /// IO error during network or filesystem operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error during secure connection
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection or read timeout
    #[error("Connection timeout")]
    Timeout,

    /// Response that could not be parsed as NNTP at all
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// NNTP status code outside the expected set for a command
    #[error("NNTP error {code}: {message}")]
    Protocol {
        /// NNTP response code (e.g., 411, 480, 502)
        code: u16,
        /// Error message from server
        message: String,
    },

    /// Authentication rejected (481/482/502)
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// No such newsgroup (411)
    #[error("No such newsgroup: {0}")]
    NoSuchGroup(String),

    /// Server returned 423 for an article-number range
    #[error("No articles in range {low}-{high}")]
    NoSuchRange {
        /// Low end of the rejected range
        low: u64,
        /// High end of the rejected range
        high: u64,
    },

    /// Connection closed unexpectedly
    #[error("Connection closed")]
    ConnectionClosed,

    /// Missing or invalid configuration value
    #[error("Config error: {0}")]
    Config(String),

    /// Relational store failure
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Run was cancelled before completion
    #[error("Cancelled")]
    Cancelled,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl IndexError {
    /// True for transport-level failures that are retryable at chunk
    /// granularity and cause the offending connection to be discarded.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            IndexError::Io(_)
                | IndexError::Tls(_)
                | IndexError::Timeout
                | IndexError::InvalidResponse(_)
                | IndexError::Protocol { .. }
                | IndexError::ConnectionClosed
        )
    }

    /// Process exit code for drivers wrapping this crate.
    ///
    /// 2 = config error, 3 = authentication failure, 5 = cancelled,
    /// 1 = anything else. Partial failure (4) is an outcome, not an error;
    /// see [`exit_codes::PARTIAL_FAILURE`].
    pub fn exit_code(&self) -> u8 {
        match self {
            IndexError::Config(_) => exit_codes::CONFIG_ERROR,
            IndexError::AuthFailed(_) => exit_codes::AUTH_FAILURE,
            IndexError::Cancelled => exit_codes::CANCELLED,
            _ => 1,
        }
    }
}

/// Exit codes for any driver wrapping this crate
pub mod exit_codes {
    /// Run completed with every chunk persisted
    pub const SUCCESS: u8 = 0;
    /// Missing or invalid configuration
    pub const CONFIG_ERROR: u8 = 2;
    /// NNTP authentication rejected
    pub const AUTH_FAILURE: u8 = 3;
    /// Some chunks failed after exhausting retries
    pub const PARTIAL_FAILURE: u8 = 4;
    /// Run cancelled before completion
    pub const CANCELLED: u8 = 5;
}

/// Result type alias using IndexError
pub type Result<T> = std::result::Result<T, IndexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_classification() {
        assert!(IndexError::Timeout.is_transport());
        assert!(IndexError::ConnectionClosed.is_transport());
        assert!(IndexError::Protocol {
            code: 500,
            message: String::new()
        }
        .is_transport());
        assert!(!IndexError::Config("missing host".into()).is_transport());
        assert!(!IndexError::NoSuchRange { low: 1, high: 2 }.is_transport());
        assert!(!IndexError::Cancelled.is_transport());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(IndexError::Config("x".into()).exit_code(), 2);
        assert_eq!(IndexError::AuthFailed("x".into()).exit_code(), 3);
        assert_eq!(IndexError::Cancelled.exit_code(), 5);
        assert_eq!(IndexError::Timeout.exit_code(), 1);
    }
}
