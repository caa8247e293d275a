use core::error::Error;

use error_stack::Report;

pub type GatewayResult<T> = Result<T, Report<GatewayError>>;

/// Gateway errors
#[derive(Debug, derive_more::Display)]
pub enum GatewayError {
    #[display("Failed to decode request: {message}")]
    Decode { message: String },
    #[display("Backend plugin call failed: {message}")]
    Plugin { message: String },
    #[display("Configuration error: {message}")]
    Configuration { message: String },
    #[display("Server error: {message}")]
    Server { message: String },
}

impl Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_display_formatting() {
        let decode = GatewayError::Decode {
            message: "expected value at line 1 column 1".to_string(),
        };
        assert_eq!(
            decode.to_string(),
            "Failed to decode request: expected value at line 1 column 1"
        );

        let plugin = GatewayError::Plugin {
            message: "connection refused".to_string(),
        };
        assert_eq!(plugin.to_string(), "Backend plugin call failed: connection refused");
    }
}
