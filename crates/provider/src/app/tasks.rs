use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use api_types::LinkState;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::app::core::Application;
use crate::domain::Provider;
use crate::infrastructure::k8s::PodEvent;

/// Task manager, responsible for starting and managing all background tasks
pub struct Tasks {
    pub tasks: Vec<JoinHandle<()>>,
    cancellation_token: CancellationToken,
}

impl Tasks {
    pub fn new(cancellation_token: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            cancellation_token,
        }
    }

    /// Start all background tasks
    pub fn spawn_all_tasks(&mut self, app: &Application) {
        let (pod_event_sender, pod_event_receiver) = mpsc::channel::<PodEvent>(32);

        let watcher_task = self.spawn_pod_watcher_task(app, pod_event_sender);
        self.tasks.push(watcher_task);

        let processor_task =
            self.spawn_pod_event_processor_task(pod_event_receiver, app.services().provider.clone());
        self.tasks.push(processor_task);

        let reconcile_task = self.spawn_reconcile_task(app);
        self.tasks.push(reconcile_task);
    }

    /// wait for tasks to complete or receive shutdown signal
    pub async fn wait_for_completion(&mut self) -> Result<()> {
        tokio::select! {
            _ = utils::shutdown::wait_for_signal() => {
                tracing::info!("Shutdown signal received, cancelling all tasks");
                self.cancellation_token.cancel();
                self.wait_for_tasks_with_timeout(Duration::from_secs(30)).await;
            }
            result = futures::future::select_all(&mut self.tasks) => {
                let (result, _index, _remaining) = result;
                self.cancellation_token.cancel();
                if let Err(e) = result {
                    tracing::error!("Task completed with error: {e}");
                    return Err(e.into());
                }
                tracing::warn!("Task completed unexpectedly");
            }
        }

        Ok(())
    }

    async fn wait_for_tasks_with_timeout(&mut self, timeout: Duration) {
        tokio::time::timeout(timeout, async {
            for task in &mut self.tasks {
                if let Err(e) = task.await {
                    tracing::error!("Task failed during shutdown: {e}");
                }
            }
        })
        .await
        .unwrap_or_else(|_| {
            tracing::warn!("Task shutdown timed out after {:?}", timeout);
        });
    }

    fn spawn_pod_watcher_task(
        &self,
        app: &Application,
        pod_event_sender: mpsc::Sender<PodEvent>,
    ) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();
        let pod_watcher = app.services().pod_watcher.clone();
        tokio::spawn(async move {
            tracing::info!("Starting Kubernetes pod watcher task");
            if let Err(e) = pod_watcher.run(pod_event_sender, token).await {
                tracing::error!("Kubernetes pod watcher failed: {e:?}");
            } else {
                tracing::info!("Kubernetes pod watcher completed");
            }
        })
    }

    fn spawn_reconcile_task(&self, app: &Application) -> JoinHandle<()> {
        let provider = app.services().provider.clone();
        let interval = app.settings().status_interval;
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting status reconcile task");
            if !wait_for_gateway(&provider, interval, &token).await {
                tracing::info!("Status reconcile task cancelled before gateway answered");
                return;
            }
            run_reconcile_loop(&provider, interval, &token).await;
            tracing::info!("Status reconcile task completed");
        })
    }

    fn spawn_pod_event_processor_task(
        &self,
        mut pod_event_receiver: mpsc::Receiver<PodEvent>,
        provider: Arc<Provider>,
    ) -> JoinHandle<()> {
        let token = self.cancellation_token.clone();

        tokio::spawn(async move {
            tracing::info!("Starting pod event processor task");
            loop {
                tokio::select! {
                    event = pod_event_receiver.recv() => {
                        match event {
                            Some(event) => provider.handle_event(event, &token).await,
                            None => {
                                tracing::info!("Pod event receiver closed");
                                break;
                            }
                        }
                    }
                    _ = token.cancelled() => {
                        tracing::info!("Pod event processor task cancelled");
                        break;
                    }
                }
            }
        })
    }
}

/// Ping the gateway until it answers. Returns false on shutdown.
pub async fn wait_for_gateway(
    provider: &Provider,
    retry_interval: Duration,
    token: &CancellationToken,
) -> bool {
    loop {
        match provider.gateway().ping(token).await {
            Ok(state) => {
                match state {
                    LinkState::Ready => tracing::info!(
                        gateway = provider.gateway().base_url(),
                        "Gateway and backend plugin reachable"
                    ),
                    LinkState::PluginUnreachable => tracing::warn!(
                        gateway = provider.gateway().base_url(),
                        "Gateway reachable but its backend plugin is not"
                    ),
                }
                return true;
            }
            Err(e) if e.current_context().is_cancelled() => return false,
            Err(e) => tracing::warn!("Gateway ping failed, retrying: {e:?}"),
        }

        tokio::select! {
            _ = token.cancelled() => return false,
            _ = tokio::time::sleep(retry_interval) => {}
        }
    }
}

/// Reconcile every `interval` until cancelled. A failed cycle is logged and
/// the next tick retries.
pub async fn run_reconcile_loop(provider: &Provider, interval: Duration, token: &CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match provider.reconcile(token).await {
            Ok(0) => {}
            Ok(changed) => tracing::debug!(changed, "status cycle applied"),
            Err(e) if e.current_context().is_cancelled() => break,
            Err(e) => tracing::warn!("Status cycle aborted: {e:?}"),
        }
    }
}
