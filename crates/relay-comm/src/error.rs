//! Error types for relayed HTTP calls.

use core::error::Error;

use derive_more::Display;
use error_stack::Report;

/// Result type for relay operations.
pub type CommResult<T> = Result<T, Report<CommError>>;

/// Errors that can occur on one hop of the provider -> gateway -> plugin chain.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum CommError {
    /// Peer unreachable or connection dropped
    #[display("Network error: {message}")]
    Network { message: String },

    /// Peer answered with a non-success status
    #[display("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },

    /// Malformed request or response body
    #[display("Serialization error: {message}")]
    Serialization { message: String },

    /// Bad endpoint, unreadable token file, client construction failure
    #[display("Configuration error: {message}")]
    Configuration { message: String },

    /// The call did not finish within the configured request timeout
    #[display("Operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The caller's cancellation token fired before the call finished
    #[display("Operation cancelled")]
    Cancelled,
}

impl Error for CommError {}

impl CommError {
    /// Whether the error came from the caller giving up rather than from the peer.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommError::Cancelled)
    }
}
