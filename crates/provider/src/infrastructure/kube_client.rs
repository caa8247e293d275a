use std::path::Path;

use error_stack::Report;
use error_stack::ResultExt;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;

use crate::infrastructure::k8s::KubernetesError;

/// API client for the virtual node. Without `kubeconfig` the in-cluster
/// service account or `~/.kube/config` is used.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client, Report<KubernetesError>> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .change_context(KubernetesError::ConnectionFailed {
                message: "no provider kubeconfig given and no default credentials found"
                    .to_string(),
            });
    };
    let config = config_from_file(path).await?;
    Client::try_from(config).change_context_lazy(|| KubernetesError::ConnectionFailed {
        message: format!("provider kubeconfig {} yields no usable client", path.display()),
    })
}

async fn config_from_file(path: &Path) -> Result<Config, Report<KubernetesError>> {
    let kubeconfig =
        Kubeconfig::read_from(path).change_context_lazy(|| KubernetesError::ConnectionFailed {
            message: format!("cannot read provider kubeconfig {}", path.display()),
        })?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .change_context_lazy(|| KubernetesError::ConnectionFailed {
            message: format!("provider kubeconfig {} has no usable context", path.display()),
        })
}
