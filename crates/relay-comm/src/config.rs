//! client config
//!
//! Shared by the provider's gateway client and the gateway's plugin client.

use std::path::PathBuf;
use std::time::Duration;

use error_stack::Report;
use url::Url;

use crate::error::CommError;
use crate::error::CommResult;

/// Relay client config.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// peer base url, without trailing slash
    pub base_url: String,
    /// per-request timeout
    pub request_timeout: Duration,
    /// file holding the bearer token sent with every request
    pub token_file: Option<PathBuf>,
}

impl ClientConfig {
    /// create new client config with default parameters.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(30),
            token_file: None,
        }
    }

    /// set request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// set bearer token file.
    pub fn with_token_file(mut self, token_file: impl Into<PathBuf>) -> Self {
        self.token_file = Some(token_file.into());
        self
    }
}

/// Builds the base url of a peer from its configured url and port.
///
/// Only `http` and `https` are accepted. The port is applied unless the url
/// already names one.
pub fn normalize_endpoint(url: &str, port: Option<u16>) -> CommResult<String> {
    let mut parsed = Url::parse(url).map_err(|e| {
        Report::new(CommError::Configuration {
            message: format!("invalid endpoint url '{url}': {e}"),
        })
    })?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Report::new(CommError::Configuration {
            message: format!(
                "endpoint url '{url}' must start with http:// or https://, got scheme '{}'",
                parsed.scheme()
            ),
        }));
    }

    if let Some(port) = port {
        if parsed.port().is_none() {
            parsed.set_port(Some(port)).map_err(|()| {
                Report::new(CommError::Configuration {
                    message: format!("cannot set port {port} on '{url}'"),
                })
            })?;
        }
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}
