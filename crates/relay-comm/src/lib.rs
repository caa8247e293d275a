//! HTTP relay client library.
//!
//! Every hop of the remote-execution chain (provider -> gateway -> backend
//! plugin) is a JSON-over-HTTP call made with this crate. It adds what the
//! hops have in common:
//!
//! - an explicit per-request timeout reported as its own error kind
//! - a bearer token re-read from a file on every call
//! - cancellation through a [`tokio_util::sync::CancellationToken`]
//! - one error enum for transport, status and decode failures
//!
//! # Examples
//!
//! ```no_run
//! # use relay_comm::{ClientConfig, RelayClient, Method};
//! # use tokio_util::sync::CancellationToken;
//! # async fn run() -> relay_comm::CommResult<()> {
//! let config = ClientConfig::new("http://localhost:3000").with_token_file("/var/run/token");
//! let client = RelayClient::new(config)?;
//! let cancel = CancellationToken::new();
//! let response = client.send(Method::POST, "/pinglink", None, &cancel).await?;
//! let body = response.into_success()?;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;

pub use client::decode_json;
pub use client::RelayClient;
pub use client::RelayResponse;
pub use config::normalize_endpoint;
pub use config::ClientConfig;
pub use error::CommError;
pub use error::CommResult;
pub use reqwest::Method;
