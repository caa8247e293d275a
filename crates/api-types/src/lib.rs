//! Shared API type definitions
//!
//! This crate contains the wire types exchanged between the provider, the
//! gateway and the backend plugins. Every body on the three hops is JSON and
//! every type here round-trips through `serde_json` without losing fields.
//!
//! - [`PodCreateRequest`]: provider -> gateway `/create`
//! - [`RetrievedPodData`]: gateway -> plugin `/create`
//! - [`PodStatusRecord`]: plugin -> gateway -> provider `/status`
//! - [`LogRequest`]: provider -> gateway -> plugin `/getLogs`

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Secret;
use serde::Deserialize;
use serde::Serialize;

/// Annotation holding the filesystem prefix for images given as absolute paths.
pub const IMAGE_ROOT_ANNOTATION: &str = "slurm-job.knoc.io/image-root";

/// Annotation holding extra `#SBATCH` flags, whitespace separated.
pub const SLURM_FLAGS_ANNOTATION: &str = "slurm-job.knoc.io/flags";

/// A pod together with every ConfigMap and Secret its volumes reference.
///
/// Built once per creation attempt by the provider and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodCreateRequest {
    pub pod: Pod,
    #[serde(default)]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
}

impl PodCreateRequest {
    pub fn new(pod: Pod) -> Self {
        Self {
            pod,
            config_maps: Vec::new(),
            secrets: Vec::new(),
        }
    }
}

/// Auxiliary objects reachable from a single container's volume mounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedContainer {
    pub name: String,
    #[serde(default)]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default)]
    pub empty_dirs: Vec<String>,
}

/// The enriched create request a backend plugin receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievedPodData {
    pub pod: Pod,
    #[serde(default)]
    pub config_maps: Vec<ConfigMap>,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    /// Per-container view, only filled when the gateway exports pod data
    #[serde(default)]
    pub containers: Vec<RetrievedContainer>,
}

impl From<PodCreateRequest> for RetrievedPodData {
    fn from(request: PodCreateRequest) -> Self {
        Self {
            pod: request.pod,
            config_maps: request.config_maps,
            secrets: request.secrets,
            containers: Vec::new(),
        }
    }
}

/// Remote state of one pod, one entry per container, in container order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatusRecord {
    pub pod_name: String,
    pub pod_namespace: String,
    pub pod_uid: String,
    #[serde(default)]
    pub containers: Vec<ContainerStatus>,
}

/// Options narrowing a log retrieval, mirroring `kubectl logs` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tail: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_bytes: Option<usize>,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub previous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since_time: Option<String>,
    #[serde(default)]
    pub follow: bool,
}

/// Identifies the container whose log is requested.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRequest {
    pub namespace: String,
    pub pod_uid: String,
    pub pod_name: String,
    pub container_name: String,
    #[serde(default)]
    pub opts: LogOptions,
}

/// Token returned by the gateway liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Gateway and backend plugin both answer
    Ready,
    /// Gateway answers but its backend plugin does not
    PluginUnreachable,
}

impl LinkState {
    pub fn token(self) -> i32 {
        match self {
            LinkState::Ready => 0,
            LinkState::PluginUnreachable => 1,
        }
    }

    pub fn from_token(token: i32) -> Option<Self> {
        match token {
            0 => Some(LinkState::Ready),
            1 => Some(LinkState::PluginUnreachable),
            _ => None,
        }
    }
}
