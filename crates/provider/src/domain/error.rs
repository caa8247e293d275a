use core::error::Error;

use error_stack::Report;

pub type ProviderResult<T> = Result<T, Report<ProviderError>>;

/// Provider errors
#[derive(Debug, derive_more::Display)]
pub enum ProviderError {
    #[display("{kind} {name} for pod {pod} not available after {waited_secs}s")]
    DependencyTimeout {
        pod: String,
        kind: &'static str,
        name: String,
        waited_secs: u64,
    },
    #[display("Gateway call failed: {message}")]
    Gateway { message: String },
    #[display("Kubernetes API call failed: {message}")]
    Kubernetes { message: String },
    #[display("Operation cancelled")]
    Cancelled,
    #[display("Failed to decode gateway response: {message}")]
    Decode { message: String },
    #[display("Configuration error: {message}")]
    Configuration { message: String },
}

impl Error for ProviderError {}

impl ProviderError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}
