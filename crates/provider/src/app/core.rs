use std::sync::Arc;

use anyhow::anyhow;
use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::app::services::ApplicationServices;
use crate::app::tasks::Tasks;
use crate::config::ProviderSettings;
use crate::domain::Provider;
use crate::infrastructure::gateway_client::GatewayClient;
use crate::infrastructure::k8s::KubeCluster;
use crate::infrastructure::k8s::PodWatcher;
use crate::infrastructure::kube_client;

/// Application core structure with explicit dependencies
pub struct Application {
    services: ApplicationServices,
    settings: ProviderSettings,
    shutdown: CancellationToken,
}

impl Application {
    pub fn new(services: ApplicationServices, settings: ProviderSettings, shutdown: CancellationToken) -> Self {
        Self {
            services,
            settings,
            shutdown,
        }
    }

    /// Connect to the API server and wire up the provider.
    pub async fn build(settings: ProviderSettings) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let client = kube_client::connect(settings.kubeconfig.as_deref())
            .await
            .map_err(|e| anyhow!("{e:?}"))?;
        let gateway = GatewayClient::new(settings.gateway.clone()).map_err(|e| anyhow!("{e:?}"))?;

        let provider = Arc::new(Provider::new(
            Arc::new(KubeCluster::new(client.clone())),
            gateway,
            settings.options,
            shutdown.child_token(),
        ));
        let pod_watcher = Arc::new(PodWatcher::new(
            client,
            settings.namespace.clone(),
            settings.node_name.clone(),
        ));

        let services = ApplicationServices {
            provider,
            pod_watcher,
        };
        Ok(Self::new(services, settings, shutdown))
    }

    pub fn services(&self) -> &ApplicationServices {
        &self.services
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /// Run application, start all tasks and wait for completion
    pub async fn run(&self) -> Result<()> {
        tracing::info!(node_name = %self.settings.node_name, "Starting all application tasks...");

        let mut tasks = Tasks::new(self.shutdown.clone());
        tasks.spawn_all_tasks(self);

        if let Err(e) = tasks.wait_for_completion().await {
            tracing::error!("Error during task execution: {e}");
            return Err(e);
        }

        tracing::info!("Application run completed");
        Ok(())
    }
}
