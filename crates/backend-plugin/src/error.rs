use core::error::Error;

use error_stack::Report;
use poem::http::StatusCode;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, Report<BackendError>>;

/// Backend plugin errors
#[derive(Debug, derive_more::Display)]
pub enum BackendError {
    #[display("Failed to decode request: {message}")]
    Decode { message: String },
    #[display("Job submission failed for container {container}: {message}")]
    Submission { container: String, message: String },
    #[display("Scheduler command failed: {message}")]
    Scheduler { message: String },
    #[display("I/O error: {message}")]
    Io { message: String },
    #[display("{kind} {name} referenced by a volume was not provided")]
    MissingDependency { kind: &'static str, name: String },
    #[display("Not found: {message}")]
    NotFound { message: String },
    #[display("Configuration error: {message}")]
    Configuration { message: String },
}

impl Error for BackendError {}

impl BackendError {
    /// HTTP status a handler answers with when an operation fails with this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            BackendError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
