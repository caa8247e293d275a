use core::error::Error;

use k8s_openapi::api::core::v1::Pod;

/// Pod events produced by the watcher for the processor task.
#[derive(Debug, Clone)]
pub enum PodEvent {
    /// A pod bound to this node appeared or changed
    Applied(Pod),
    /// A pod was marked for deletion or removed
    Deleted(Pod),
    /// The watch was re-listed; these are every pod currently bound to the node
    Resynced(Vec<Pod>),
}

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to watch pods: {message}")]
    WatchFailed { message: String },
    #[display("Kubernetes request failed: {message}")]
    RequestFailed { message: String },
}

impl Error for KubernetesError {}
