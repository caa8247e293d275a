use std::time::Duration;

use error_stack::Report;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::watcher;
use kube::runtime::watcher::Config;
use kube::runtime::watcher::Event;
use kube::Api;
use kube::Client;
use tokio::select;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::infrastructure::k8s::types::KubernetesError;
use crate::infrastructure::k8s::types::PodEvent;

const WATCH_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Watches pods bound to this node.
///
/// Pods carrying a deletion timestamp are reported as deleted so the
/// provider can tear down their remote jobs before the object goes away.
pub struct PodWatcher {
    client: Client,
    namespace: Option<String>,
    node_name: String,
}

impl PodWatcher {
    pub fn new(client: Client, namespace: Option<String>, node_name: String) -> Self {
        Self {
            client,
            namespace,
            node_name,
        }
    }

    /// Watch until cancelled, restarting the watch after failures.
    #[tracing::instrument(skip(self, update_sender, cancellation_token), fields(namespace = ?self.namespace, node_name = %self.node_name))]
    pub async fn run(
        &self,
        update_sender: mpsc::Sender<PodEvent>,
        cancellation_token: CancellationToken,
    ) -> Result<(), Report<KubernetesError>> {
        info!("Starting pod watcher");
        loop {
            select! {
                _ = cancellation_token.cancelled() => {
                    info!("Pod watcher shutdown requested");
                    break;
                }
                result = self.watch_pods(&update_sender) => {
                    match result {
                        Ok(()) => {
                            warn!("Pod watch stream ended unexpectedly, restarting...");
                        }
                        Err(e) => {
                            error!("Pod watch failed: {e:?}");
                            select! {
                                _ = cancellation_token.cancelled() => break,
                                _ = tokio::time::sleep(WATCH_RETRY_DELAY) => {}
                            }
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn watch_pods(&self, update_sender: &mpsc::Sender<PodEvent>) -> Result<(), Report<KubernetesError>> {
        let api: Api<Pod> = match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let config = Config::default().fields(&format!("spec.nodeName={}", self.node_name));

        let mut stream = watcher(api, config).boxed();
        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| {
                Report::new(KubernetesError::WatchFailed {
                    message: format!("Watch stream error: {e}"),
                })
            })?;

            if update_sender.send(to_pod_event(event)).await.is_err() {
                warn!("Pod event receiver dropped, stopping watch");
                return Ok(());
            }
        }

        Ok(())
    }
}

fn to_pod_event(event: Event<Pod>) -> PodEvent {
    match event {
        Event::Applied(pod) if pod.metadata.deletion_timestamp.is_some() => PodEvent::Deleted(pod),
        Event::Applied(pod) => PodEvent::Applied(pod),
        Event::Deleted(pod) => PodEvent::Deleted(pod),
        Event::Restarted(pods) => PodEvent::Resynced(pods),
    }
}
