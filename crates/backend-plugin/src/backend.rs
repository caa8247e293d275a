//! Capability contract every backend plugin implements.

use api_types::LogOptions;
use api_types::LogRequest;
use api_types::PodStatusRecord;
use api_types::RetrievedPodData;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;

use crate::error::BackendResult;

/// A remote execution system the gateway can drive.
///
/// Implementations hold their own job bookkeeping; the HTTP layer only
/// decodes requests and maps errors onto status codes.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Submit every container of every pod. Returns on the first failure.
    async fn submit(&self, pods: &[RetrievedPodData]) -> BackendResult<()>;

    /// Cancel remote work for the pod and forget its bookkeeping.
    async fn delete(&self, pod: &Pod) -> BackendResult<()>;

    /// Report per-container state for every queried pod the backend knows.
    async fn status(&self, pods: &[Pod]) -> BackendResult<Vec<PodStatusRecord>>;

    /// Container output narrowed by the request options.
    async fn logs(&self, request: &LogRequest) -> BackendResult<Vec<u8>>;
}

/// Keep the last `tail` lines, then cap at `limit_bytes` from the end.
pub fn apply_log_options(content: &[u8], opts: &LogOptions) -> Vec<u8> {
    let mut slice = content;

    if let Some(tail) = opts.tail {
        slice = tail_lines(slice, tail);
    }
    if let Some(limit) = opts.limit_bytes {
        if slice.len() > limit {
            slice = &slice[slice.len() - limit..];
        }
    }

    slice.to_vec()
}

fn tail_lines(content: &[u8], count: usize) -> &[u8] {
    if count == 0 {
        return &[];
    }
    // A trailing newline terminates the last line rather than starting a new one.
    let body = content.strip_suffix(b"\n").unwrap_or(content);
    let mut seen = 0;
    for (idx, byte) in body.iter().enumerate().rev() {
        if *byte == b'\n' {
            seen += 1;
            if seen == count {
                return &content[idx + 1..];
            }
        }
    }
    content
}
