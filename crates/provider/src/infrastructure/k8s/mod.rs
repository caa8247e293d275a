//! Kubernetes integration.
//!
//! - [`PodWatcher`]: streams events for pods bound to this node
//! - [`ClusterClient`]: the reads and writes the provider makes against the API server

pub mod cluster;
pub mod pod_watcher;
pub mod types;

pub use cluster::ClusterClient;
pub use cluster::KubeCluster;
pub use pod_watcher::PodWatcher;
pub use types::KubernetesError;
pub use types::PodEvent;
