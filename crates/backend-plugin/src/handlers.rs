use std::sync::Arc;

use api_types::LogRequest;
use api_types::PodStatusRecord;
use api_types::RetrievedPodData;
use error_stack::Report;
use k8s_openapi::api::core::v1::Pod;
use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::web::Json;
use serde::de::DeserializeOwned;
use tracing::error;
use tracing::info;

use crate::backend::Backend;
use crate::error::BackendError;

pub type SharedBackend = Arc<dyn Backend>;

/// Bodies are decoded by hand so a malformed request answers 500 instead of
/// poem's default 400, matching the rest of the relay chain.
fn decode<T: DeserializeOwned>(body: &[u8]) -> poem::Result<T> {
    serde_json::from_slice(body).map_err(|e| {
        let err = BackendError::Decode {
            message: e.to_string(),
        };
        error!(error = %err, "rejecting request");
        poem::Error::from_string(err.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
    })
}

fn into_http_error(report: Report<BackendError>) -> poem::Error {
    error!(error = ?report, "backend operation failed");
    let context = report.current_context();
    poem::Error::from_string(context.to_string(), context.status_code())
}

#[handler]
pub async fn create(body: Vec<u8>, backend: Data<&SharedBackend>) -> poem::Result<StatusCode> {
    let pods: Vec<RetrievedPodData> = decode(&body)?;
    info!(pods = pods.len(), backend = backend.name(), "create requested");
    backend.submit(&pods).await.map_err(into_http_error)?;
    Ok(StatusCode::OK)
}

#[handler]
pub async fn delete(body: Vec<u8>, backend: Data<&SharedBackend>) -> poem::Result<StatusCode> {
    let pod: Pod = decode(&body)?;
    info!(pod = pod.metadata.name.as_deref().unwrap_or_default(), "delete requested");
    backend.delete(&pod).await.map_err(into_http_error)?;
    Ok(StatusCode::OK)
}

#[handler]
pub async fn status(
    body: Vec<u8>,
    backend: Data<&SharedBackend>,
) -> poem::Result<Json<Vec<PodStatusRecord>>> {
    let pods: Vec<Pod> = decode(&body)?;
    let records = backend.status(&pods).await.map_err(into_http_error)?;
    Ok(Json(records))
}

#[handler]
pub async fn get_logs(body: Vec<u8>, backend: Data<&SharedBackend>) -> poem::Result<Vec<u8>> {
    let request: LogRequest = decode(&body)?;
    backend.logs(&request).await.map_err(into_http_error)
}
