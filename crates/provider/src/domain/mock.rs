//! In-memory [`ClusterClient`] for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Secret;
use tokio::sync::Mutex;

use crate::infrastructure::k8s::cluster::KubeResult;
use crate::infrastructure::k8s::ClusterClient;
use crate::infrastructure::k8s::KubernetesError;

type ObjectKey = (String, String);

fn object_key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

#[derive(Debug, Default)]
struct FakeClusterState {
    pods: HashMap<ObjectKey, Pod>,
    config_maps: HashMap<ObjectKey, ConfigMap>,
    secrets: HashMap<ObjectKey, Secret>,
    status_updates: Vec<Pod>,
    force_deleted: Vec<ObjectKey>,
    error_mode: bool,
}

/// Mock cluster holding pods, ConfigMaps and Secrets in memory and
/// recording every status push and forced delete.
#[derive(Debug, Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeClusterState>>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with a request error
    pub async fn set_error_mode(&self, enabled: bool) {
        self.state.lock().await.error_mode = enabled;
    }

    pub async fn add_pod(&self, pod: Pod) {
        let key = object_key(
            pod.metadata.namespace.as_deref().unwrap_or("default"),
            pod.metadata.name.as_deref().unwrap_or_default(),
        );
        self.state.lock().await.pods.insert(key, pod);
    }

    pub async fn add_config_map(&self, namespace: &str, config_map: ConfigMap) {
        let key = object_key(namespace, config_map.metadata.name.as_deref().unwrap_or_default());
        self.state.lock().await.config_maps.insert(key, config_map);
    }

    pub async fn add_secret(&self, namespace: &str, secret: Secret) {
        let key = object_key(namespace, secret.metadata.name.as_deref().unwrap_or_default());
        self.state.lock().await.secrets.insert(key, secret);
    }

    /// Every pod passed to `update_pod_status`, oldest first
    pub async fn status_updates(&self) -> Vec<Pod> {
        self.state.lock().await.status_updates.clone()
    }

    /// Phases pushed for the named pod, oldest first
    pub async fn pushed_phases(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .status_updates
            .iter()
            .filter(|pod| pod.metadata.name.as_deref() == Some(name))
            .filter_map(|pod| pod.status.as_ref().and_then(|s| s.phase.clone()))
            .collect()
    }

    pub async fn force_deleted(&self) -> Vec<(String, String)> {
        self.state.lock().await.force_deleted.clone()
    }

    fn check(state: &FakeClusterState) -> KubeResult<()> {
        if state.error_mode {
            return Err(Report::new(KubernetesError::RequestFailed {
                message: "fake cluster in error mode".to_string(),
            }));
        }
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> KubeResult<Option<Pod>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        Ok(state.pods.get(&object_key(namespace, name)).cloned())
    }

    async fn config_map(&self, namespace: &str, name: &str) -> KubeResult<Option<ConfigMap>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        Ok(state.config_maps.get(&object_key(namespace, name)).cloned())
    }

    async fn secret(&self, namespace: &str, name: &str) -> KubeResult<Option<Secret>> {
        let state = self.state.lock().await;
        Self::check(&state)?;
        Ok(state.secrets.get(&object_key(namespace, name)).cloned())
    }

    async fn update_pod_status(&self, pod: &Pod) -> KubeResult<()> {
        let mut state = self.state.lock().await;
        Self::check(&state)?;
        state.status_updates.push(pod.clone());
        Ok(())
    }

    async fn force_delete_pod(&self, namespace: &str, name: &str) -> KubeResult<()> {
        let mut state = self.state.lock().await;
        Self::check(&state)?;
        let key = object_key(namespace, name);
        state.pods.remove(&key);
        state.force_deleted.push(key);
        Ok(())
    }
}
