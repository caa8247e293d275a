//! Async HTTP client for one relay hop.

use bytes::Bytes;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::instrument;

use crate::config::ClientConfig;
use crate::error::CommError;
use crate::error::CommResult;

/// Status and body of a completed call.
#[derive(Debug, Clone)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RelayResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body of a successful response, or [`CommError::Http`] carrying the peer's message.
    pub fn into_success(self) -> CommResult<Bytes> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(Report::new(CommError::Http {
                status: self.status,
                message: String::from_utf8_lossy(&self.body).into_owned(),
            }))
        }
    }
}

/// Decode a JSON body, reporting failures as [`CommError::Serialization`].
pub fn decode_json<T: DeserializeOwned>(body: &[u8]) -> CommResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        Report::new(CommError::Serialization {
            message: format!("failed to decode response body: {e}"),
        })
    })
}

fn encode_json<T: Serialize + ?Sized>(payload: &T) -> CommResult<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| {
        Report::new(CommError::Serialization {
            message: format!("failed to encode request body: {e}"),
        })
    })
}

/// HTTP client bound to one peer.
///
/// Every call carries the configured timeout and bearer token and races the
/// caller's cancellation token; a cancelled call drops its in-flight request.
#[derive(Debug, Clone)]
pub struct RelayClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl RelayClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// - [`CommError::Configuration`] if the underlying HTTP client cannot be built
    pub fn new(config: ClientConfig) -> CommResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                Report::new(CommError::Configuration {
                    message: format!("failed to create HTTP client: {e}"),
                })
            })?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Token is re-read on every call so a rotated token file takes effect without restart.
    async fn bearer_token(&self) -> CommResult<Option<String>> {
        let Some(token_file) = &self.config.token_file else {
            return Ok(None);
        };

        let token = tokio::fs::read_to_string(token_file)
            .await
            .change_context(CommError::Configuration {
                message: format!("failed to read token file {}", token_file.display()),
            })?;
        Ok(Some(token.trim().to_string()))
    }

    fn map_send_error(&self, err: reqwest::Error) -> Report<CommError> {
        if err.is_timeout() {
            Report::new(CommError::Timeout {
                seconds: self.config.request_timeout.as_secs(),
            })
        } else {
            Report::new(CommError::Network {
                message: err.to_string(),
            })
        }
    }

    /// Send a request and return the raw response without reading the body.
    ///
    /// # Errors
    ///
    /// - [`CommError::Cancelled`] if `cancel` fires first
    /// - [`CommError::Timeout`] if the peer does not answer in time
    /// - [`CommError::Network`] if the peer is unreachable
    pub async fn open(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> CommResult<reqwest::Response> {
        let mut request = self
            .http
            .request(method, self.url(path))
            .header(reqwest::header::CONTENT_TYPE, "application/json");

        if let Some(token) = self.bearer_token().await? {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        tokio::select! {
            _ = cancel.cancelled() => Err(Report::new(CommError::Cancelled)),
            result = request.send() => result.map_err(|e| self.map_send_error(e)),
        }
    }

    /// Send a request and read the full response body.
    #[instrument(skip(self, body, cancel), fields(base_url = %self.config.base_url))]
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
        cancel: &CancellationToken,
    ) -> CommResult<RelayResponse> {
        let response = self.open(method, path, body, cancel).await?;
        let status = response.status().as_u16();

        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(Report::new(CommError::Cancelled)),
            result = response.bytes() => result.map_err(|e| self.map_send_error(e))?,
        };

        debug!(status, body_len = body.len(), "relay call completed");
        Ok(RelayResponse { status, body })
    }

    /// Send a JSON payload and read the full response body.
    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        cancel: &CancellationToken,
    ) -> CommResult<RelayResponse> {
        let body = encode_json(payload)?;
        self.send(method, path, Some(body), cancel).await
    }
}
