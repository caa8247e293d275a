use async_trait::async_trait;
use error_stack::Report;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DeleteParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::Api;
use kube::Client;
use tracing::debug;

use super::types::KubernetesError;

pub type KubeResult<T> = Result<T, Report<KubernetesError>>;

/// API server operations the provider depends on.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn get_pod(&self, namespace: &str, name: &str) -> KubeResult<Option<Pod>>;

    async fn config_map(&self, namespace: &str, name: &str) -> KubeResult<Option<ConfigMap>>;

    async fn secret(&self, namespace: &str, name: &str) -> KubeResult<Option<Secret>>;

    /// Write the pod's status subresource.
    async fn update_pod_status(&self, pod: &Pod) -> KubeResult<()>;

    /// Delete with zero grace period. A pod that is already gone is not an error.
    async fn force_delete_pod(&self, namespace: &str, name: &str) -> KubeResult<()>;

    /// Whether the pod still exists and is not being deleted. With `uid`, a
    /// recreated pod of the same name does not count.
    async fn pod_exists(&self, namespace: &str, name: &str, uid: Option<&str>) -> KubeResult<bool> {
        let Some(pod) = self.get_pod(namespace, name).await? else {
            return Ok(false);
        };
        let same_uid = uid.is_none() || pod.metadata.uid.as_deref() == uid;
        Ok(same_uid && pod.metadata.deletion_timestamp.is_none())
    }
}

/// [`ClusterClient`] backed by the API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn request_failed(action: &str, namespace: &str, name: &str, err: kube::Error) -> Report<KubernetesError> {
    Report::new(KubernetesError::RequestFailed {
        message: format!("{action} {namespace}/{name}"),
    })
    .attach_printable(format!("Kubernetes API error: {err}"))
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> KubeResult<Option<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| request_failed("get pod", namespace, name, e))
    }

    async fn config_map(&self, namespace: &str, name: &str) -> KubeResult<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| request_failed("get config map", namespace, name, e))
    }

    async fn secret(&self, namespace: &str, name: &str) -> KubeResult<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| request_failed("get secret", namespace, name, e))
    }

    async fn update_pod_status(&self, pod: &Pod) -> KubeResult<()> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or_default();
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        let patch = serde_json::json!({ "status": pod.status });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| request_failed("patch status of", namespace, name, e))?;
        debug!(pod = name, namespace, "pod status pushed");
        Ok(())
    }

    async fn force_delete_pod(&self, namespace: &str, name: &str) -> KubeResult<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        match api.delete(name, &DeleteParams::default().grace_period(0)).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(request_failed("delete pod", namespace, name, e)),
        }
    }
}
