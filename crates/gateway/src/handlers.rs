//! Relay handlers. Every request body is decoded locally first so a
//! malformed request is answered with 500 and never reaches the plugin.

use std::sync::Arc;

use api_types::LinkState;
use api_types::LogRequest;
use api_types::PodCreateRequest;
use api_types::PodStatusRecord;
use api_types::RetrievedPodData;
use error_stack::Report;
use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use poem::Body;
use poem::IntoResponse;
use poem::Response;
use relay_comm::CommError;
use relay_comm::Method;
use relay_comm::RelayClient;
use relay_comm::RelayResponse;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::cache::StatusCache;
use crate::error::GatewayError;
use crate::export::retrieve_pod_data;

/// State shared by the handlers
pub struct GatewayState {
    pub plugin: RelayClient,
    pub cache: StatusCache,
    pub export_pod_data: bool,
    /// Cancelled on shutdown, aborting in-flight plugin calls
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(plugin: RelayClient, export_pod_data: bool, shutdown: CancellationToken) -> Self {
        Self {
            plugin,
            cache: StatusCache::new(),
            export_pod_data,
            shutdown,
        }
    }
}

pub type SharedState = Arc<GatewayState>;

fn internal_error(err: GatewayError) -> poem::Error {
    poem::Error::from_string(err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> poem::Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        let err = GatewayError::Decode {
            message: e.to_string(),
        };
        error!(error = %err, "rejecting request");
        internal_error(err)
    })
}

fn plugin_error(report: Report<CommError>) -> poem::Error {
    error!(error = ?report, "backend plugin call failed");
    internal_error(GatewayError::Plugin {
        message: report.current_context().to_string(),
    })
}

/// Plugin status and body, unchanged.
fn passthrough(response: RelayResponse) -> Response {
    let code = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    Response::builder().status(code).body(response.body)
}

#[handler]
pub async fn create(body: Vec<u8>, state: Data<&SharedState>) -> poem::Result<Response> {
    let requests: Vec<PodCreateRequest> = decode(&body)?;
    info!(pods = requests.len(), "create requested");

    let envelopes: Vec<RetrievedPodData> = requests
        .into_iter()
        .map(|request| retrieve_pod_data(request, state.export_pod_data))
        .collect();

    let response = state
        .plugin
        .send_json(Method::POST, "/create", &envelopes, &state.shutdown)
        .await
        .map_err(plugin_error)?;
    if !response.is_success() {
        warn!(status = response.status, "backend plugin rejected create");
    }
    Ok(passthrough(response))
}

#[handler]
pub async fn delete(body: Vec<u8>, state: Data<&SharedState>) -> poem::Result<Response> {
    let pod: Pod = decode(&body)?;
    info!(pod = pod.metadata.name.as_deref().unwrap_or_default(), "delete requested");

    let response = state
        .plugin
        .send_json(Method::DELETE, "/delete", &pod, &state.shutdown)
        .await
        .map_err(plugin_error)?;
    if response.is_success() {
        if let Some(uid) = pod.metadata.uid.as_deref() {
            if state.cache.forget(uid).await.is_some() {
                debug!(uid, "dropped cached status");
            }
        }
    }
    Ok(passthrough(response))
}

#[handler]
pub async fn status(body: Vec<u8>, state: Data<&SharedState>) -> poem::Result<Response> {
    let pods: Vec<Pod> = decode(&body)?;
    let pods = state.cache.live_pods(pods).await;

    let response = state
        .plugin
        .send_json(Method::GET, "/status", &pods, &state.shutdown)
        .await
        .map_err(plugin_error)?;
    if !response.is_success() {
        return Ok(passthrough(response));
    }

    let records: Vec<PodStatusRecord> =
        relay_comm::decode_json(&response.body).map_err(plugin_error)?;
    let records = state.cache.live_records(records).await;
    state.cache.record(&records).await;
    debug!(records = records.len(), "status relayed");

    Ok(Json(records).into_response())
}

#[handler]
pub async fn get_logs(body: Vec<u8>, state: Data<&SharedState>) -> poem::Result<Response> {
    let request: LogRequest = decode(&body)?;
    debug!(
        pod = %request.pod_name,
        container = %request.container_name,
        "log retrieval requested"
    );

    let response = state
        .plugin
        .open(Method::GET, "/getLogs", Some(body), &state.shutdown)
        .await
        .map_err(plugin_error)?;

    let code = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let stream = response.bytes_stream().map_err(std::io::Error::other);
    Ok(Response::builder()
        .status(code)
        .body(Body::from_bytes_stream(stream)))
}

/// Liveness token: `0` when the plugin answers, `1` when it does not.
#[handler]
pub async fn ping_link(state: Data<&SharedState>) -> String {
    let result = state
        .plugin
        .send_json(Method::POST, "/status", &Vec::<Pod>::new(), &state.shutdown)
        .await;

    let link = match result {
        Ok(response) if response.is_success() => LinkState::Ready,
        Ok(response) => {
            warn!(status = response.status, "backend plugin answered ping with error");
            LinkState::PluginUnreachable
        }
        Err(e) => {
            warn!(error = %e.current_context(), "backend plugin unreachable");
            LinkState::PluginUnreachable
        }
    };
    link.token().to_string()
}

#[handler]
pub async fn update_cache(body: Vec<u8>, state: Data<&SharedState>) -> poem::Result<StatusCode> {
    let uid = String::from_utf8(body)
        .map(|uid| uid.trim().to_string())
        .map_err(|e| {
            internal_error(GatewayError::Decode {
                message: format!("pod uid is not utf-8: {e}"),
            })
        })?;
    if uid.is_empty() {
        return Err(internal_error(GatewayError::Decode {
            message: "empty pod uid".to_string(),
        }));
    }

    state.cache.mark_deleted(&uid).await;
    info!(pod_uid = %uid, "pod marked as deleted");
    Ok(StatusCode::OK)
}
