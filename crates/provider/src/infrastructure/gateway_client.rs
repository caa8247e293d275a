//! Provider side of the provider -> gateway hop.

use api_types::LinkState;
use api_types::LogRequest;
use api_types::PodCreateRequest;
use api_types::PodStatusRecord;
use bytes::Bytes;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use relay_comm::ClientConfig;
use relay_comm::CommError;
use relay_comm::Method;
use relay_comm::RelayClient;
use relay_comm::RelayResponse;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::domain::error::ProviderError;
use crate::domain::error::ProviderResult;

fn provider_error(report: Report<CommError>) -> Report<ProviderError> {
    let context = match report.current_context() {
        CommError::Cancelled => ProviderError::Cancelled,
        CommError::Serialization { message } => ProviderError::Decode {
            message: message.clone(),
        },
        CommError::Configuration { message } => ProviderError::Configuration {
            message: message.clone(),
        },
        other => ProviderError::Gateway {
            message: other.to_string(),
        },
    };
    report.change_context(context)
}

fn success_body(response: RelayResponse) -> ProviderResult<Bytes> {
    response.into_success().map_err(provider_error)
}

#[derive(Debug, Clone)]
pub struct GatewayClient {
    relay: RelayClient,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> ProviderResult<Self> {
        let relay = RelayClient::new(config).map_err(provider_error)?;
        Ok(Self { relay })
    }

    pub fn base_url(&self) -> &str {
        &self.relay.config().base_url
    }

    /// Liveness probe. A gateway that answers with anything but a known
    /// token counts as a failed call.
    #[instrument(skip_all)]
    pub async fn ping(&self, cancel: &CancellationToken) -> ProviderResult<LinkState> {
        let response = self
            .relay
            .send(Method::POST, "/pinglink", None, cancel)
            .await
            .map_err(provider_error)?;
        let body = success_body(response)?;
        let text = String::from_utf8_lossy(&body);

        text.trim()
            .parse::<i32>()
            .ok()
            .and_then(LinkState::from_token)
            .ok_or_else(|| {
                Report::new(ProviderError::Decode {
                    message: format!("unexpected ping answer '{}'", text.trim()),
                })
            })
    }

    #[instrument(skip_all, fields(pods = requests.len()))]
    pub async fn create(&self, requests: &[PodCreateRequest], cancel: &CancellationToken) -> ProviderResult<()> {
        let response = self
            .relay
            .send_json(Method::POST, "/create", requests, cancel)
            .await
            .map_err(provider_error)?;
        success_body(response).map(drop)
    }

    #[instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn delete(&self, pod: &Pod, cancel: &CancellationToken) -> ProviderResult<()> {
        let response = self
            .relay
            .send_json(Method::DELETE, "/delete", pod, cancel)
            .await
            .map_err(provider_error)?;
        success_body(response).map(drop)
    }

    #[instrument(skip_all, fields(pods = pods.len()))]
    pub async fn status(&self, pods: &[Pod], cancel: &CancellationToken) -> ProviderResult<Vec<PodStatusRecord>> {
        let response = self
            .relay
            .send_json(Method::GET, "/status", pods, cancel)
            .await
            .map_err(provider_error)?;
        let body = success_body(response)?;
        relay_comm::decode_json(&body).map_err(provider_error)
    }

    /// Tell the gateway a pod UID no longer exists.
    pub async fn update_cache(&self, pod_uid: &str, cancel: &CancellationToken) -> ProviderResult<()> {
        let response = self
            .relay
            .send(
                Method::POST,
                "/updateCache",
                Some(pod_uid.as_bytes().to_vec()),
                cancel,
            )
            .await
            .map_err(provider_error)?;
        success_body(response).map(drop)
    }

    pub async fn logs(&self, request: &LogRequest, cancel: &CancellationToken) -> ProviderResult<Bytes> {
        let response = self
            .relay
            .send_json(Method::GET, "/getLogs", request, cancel)
            .await
            .map_err(provider_error)?;
        success_body(response)
    }
}
