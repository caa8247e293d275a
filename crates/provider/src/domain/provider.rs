//! Pod lifecycle driver: creation with dependency resolution, deletion and
//! periodic status reconciliation against the gateway.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use api_types::LogOptions;
use api_types::LogRequest;
use api_types::PodCreateRequest;
use bytes::Bytes;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::api::core::v1::ContainerStateWaiting;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::Secret;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;
use tracing::warn;

use super::error::ProviderError;
use super::error::ProviderResult;
use super::phase::PodPhase;
use super::pod_store::PodKey;
use super::pod_store::PodStore;
use super::reconcile::apply_status_record;
use super::reconcile::upsert_condition;
use super::reconcile::upsert_container_status;
use super::reconcile::READY_CONDITION;
use crate::infrastructure::gateway_client::GatewayClient;
use crate::infrastructure::k8s::ClusterClient;
use crate::infrastructure::k8s::PodEvent;

const DEPENDENCY_TIMEOUT_REASON: &str = "DependencyTimeout";

/// Timing knobs for pod creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderOptions {
    /// Wall-clock budget for ConfigMaps and Secrets to appear
    pub dependency_wait: Duration,
    /// Pause between two lookups of a missing dependency
    pub retry_interval: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            dependency_wait: Duration::from_secs(300 * 60),
            retry_interval: Duration::from_secs(1),
        }
    }
}

/// An object a pod volume needs before the pod can be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Dependency {
    ConfigMap { name: String, optional: bool },
    Secret { name: String, optional: bool },
}

impl Dependency {
    fn kind(&self) -> &'static str {
        match self {
            Dependency::ConfigMap { .. } => "ConfigMap",
            Dependency::Secret { .. } => "Secret",
        }
    }

    fn name(&self) -> &str {
        match self {
            Dependency::ConfigMap { name, .. } | Dependency::Secret { name, .. } => name,
        }
    }

    fn optional(&self) -> bool {
        match self {
            Dependency::ConfigMap { optional, .. } | Dependency::Secret { optional, .. } => *optional,
        }
    }
}

enum Resolved {
    ConfigMap(ConfigMap),
    Secret(Secret),
}

/// How waiting for one dependency ended.
enum Wait {
    Found(Resolved),
    /// Optional and absent
    Skipped,
    /// The pod stopped being tracked meanwhile
    PodGone,
}

/// ConfigMap and Secret volumes of `pod`, each named once, in volume order.
fn dependencies(pod: &Pod) -> Vec<Dependency> {
    let volumes = pod
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mut deps: Vec<Dependency> = Vec::new();
    for volume in volumes {
        let dep = if let Some(source) = &volume.config_map {
            source.name.clone().map(|name| Dependency::ConfigMap {
                name,
                optional: source.optional.unwrap_or(false),
            })
        } else if let Some(source) = &volume.secret {
            source.secret_name.clone().map(|name| Dependency::Secret {
                name,
                optional: source.optional.unwrap_or(false),
            })
        } else {
            None
        };
        if let Some(dep) = dep.filter(|d| !deps.contains(d)) {
            deps.push(dep);
        }
    }
    deps
}

/// Mark every declared container as not ready after a failed creation.
fn mark_containers_not_ready(pod: &mut Pod, reason: &str) {
    let containers: Vec<(String, String)> = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|c| (c.name.clone(), c.image.clone().unwrap_or_default()))
                .collect()
        })
        .unwrap_or_default();

    let status = pod.status.get_or_insert_with(PodStatus::default);
    for (name, image) in containers {
        upsert_container_status(
            status,
            &ContainerStatus {
                name,
                image,
                ready: false,
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some(reason.to_string()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
    }
    status.reason = Some(reason.to_string());
    upsert_condition(status, READY_CONDITION, false, Some(reason));
}

/// Owns the node's tracked pods and drives them through their lifecycle.
pub struct Provider {
    cluster: Arc<dyn ClusterClient>,
    gateway: GatewayClient,
    store: PodStore,
    options: ProviderOptions,
    /// Cancellation handles of in-flight create tasks
    creating: Mutex<HashMap<PodKey, CancellationToken>>,
    shutdown: CancellationToken,
}

impl Provider {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        gateway: GatewayClient,
        options: ProviderOptions,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cluster,
            gateway,
            store: PodStore::new(),
            options,
            creating: Mutex::new(HashMap::new()),
            shutdown,
        }
    }

    pub fn store(&self) -> &PodStore {
        &self.store
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.gateway
    }

    /// Push the tracked copy's status upstream. Failures only warn; the next
    /// change or reconcile pushes again.
    async fn push_status(&self, pod: &Pod) {
        if let Err(e) = self.cluster.update_pod_status(pod).await {
            warn!(
                pod = pod.metadata.name.as_deref().unwrap_or_default(),
                "failed to push pod status: {e:?}"
            );
        }
    }

    /// Set the tracked pod's phase and push it if it changed.
    async fn set_phase(&self, key: &PodKey, phase: PodPhase) {
        let changed = self
            .store
            .update(key, |pod| phase.apply(pod).then(|| pod.clone()))
            .await
            .flatten();
        if let Some(pod) = changed {
            debug!(pod = %key, phase = %phase, "phase changed");
            self.push_status(&pod).await;
        }
    }

    async fn fetch(&self, namespace: &str, dep: &Dependency) -> ProviderResult<Option<Resolved>> {
        let fetched = match dep {
            Dependency::ConfigMap { name, .. } => self
                .cluster
                .config_map(namespace, name)
                .await
                .map(|found| found.map(Resolved::ConfigMap)),
            Dependency::Secret { name, .. } => self
                .cluster
                .secret(namespace, name)
                .await
                .map(|found| found.map(Resolved::Secret)),
        };
        fetched.change_context_lazy(|| ProviderError::Kubernetes {
            message: format!("failed to fetch {} {}", dep.kind(), dep.name()),
        })
    }

    /// Resolve one dependency, retrying until it appears, the pod goes away
    /// or the deadline passes.
    async fn await_dependency(
        &self,
        key: &PodKey,
        dep: &Dependency,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> ProviderResult<Wait> {
        loop {
            match self.fetch(&key.namespace, dep).await {
                Ok(Some(resolved)) => return Ok(Wait::Found(resolved)),
                Ok(None) if dep.optional() => {
                    debug!(pod = %key, kind = dep.kind(), name = dep.name(), "optional dependency missing, skipping");
                    return Ok(Wait::Skipped);
                }
                Ok(None) => {
                    debug!(pod = %key, kind = dep.kind(), name = dep.name(), "dependency not found yet");
                }
                Err(e) => warn!(pod = %key, "dependency lookup failed: {e:?}"),
            }

            if !self.store.contains(key).await {
                info!(pod = %key, "pod deleted while waiting for dependencies");
                return Ok(Wait::PodGone);
            }
            if Instant::now() >= deadline {
                return Err(Report::new(ProviderError::DependencyTimeout {
                    pod: key.to_string(),
                    kind: dep.kind(),
                    name: dep.name().to_string(),
                    waited_secs: self.options.dependency_wait.as_secs(),
                }));
            }

            self.set_phase(key, PodPhase::Initializing).await;
            tokio::select! {
                _ = cancel.cancelled() => return Err(Report::new(ProviderError::Cancelled)),
                _ = tokio::time::sleep(self.options.retry_interval) => {}
            }
        }
    }

    async fn fail_creation(&self, key: &PodKey) {
        let failed = self
            .store
            .update(key, |pod| {
                PodPhase::Failed.apply(pod);
                mark_containers_not_ready(pod, DEPENDENCY_TIMEOUT_REASON);
                pod.clone()
            })
            .await;
        if let Some(pod) = failed {
            self.push_status(&pod).await;
        }
    }

    /// Create `pod` remotely once every ConfigMap and Secret it mounts exists.
    ///
    /// A pod that no longer exists in the API server is skipped. On
    /// cancellation no phase is asserted.
    ///
    /// # Errors
    ///
    /// - [`ProviderError::DependencyTimeout`] if a dependency never appears;
    ///   the pod is left `Failed`
    /// - [`ProviderError::Gateway`] if the gateway rejects the create
    /// - [`ProviderError::Cancelled`] if `cancel` fires first
    #[instrument(skip_all, fields(pod = %PodKey::of(&pod)))]
    pub async fn create_pod(&self, pod: Pod, cancel: &CancellationToken) -> ProviderResult<()> {
        let key = PodKey::of(&pod);
        let exists = self
            .cluster
            .pod_exists(&key.namespace, &key.name, pod.metadata.uid.as_deref())
            .await
            .change_context(ProviderError::Kubernetes {
                message: format!("failed to look up pod {key}"),
            })?;
        if !exists {
            info!("pod no longer exists, skipping creation");
            return Ok(());
        }

        let mut tracked = pod.clone();
        PodPhase::Pending.apply(&mut tracked);
        if !self.store.insert_if_absent(tracked.clone()).await {
            debug!("pod already tracked");
            return Ok(());
        }
        self.push_status(&tracked).await;

        let deadline = Instant::now() + self.options.dependency_wait;
        let mut request = PodCreateRequest::new(pod.clone());
        for dep in dependencies(&pod) {
            let outcome = match self.await_dependency(&key, &dep, deadline, cancel).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    if matches!(e.current_context(), ProviderError::DependencyTimeout { .. }) {
                        self.fail_creation(&key).await;
                    }
                    return Err(e);
                }
            };
            match outcome {
                Wait::PodGone => return Ok(()),
                Wait::Found(Resolved::ConfigMap(config_map)) => request.config_maps.push(config_map),
                Wait::Found(Resolved::Secret(secret)) => request.secrets.push(secret),
                Wait::Skipped => {}
            }
            self.set_phase(&key, PodPhase::Pending).await;
        }

        let Some(latest) = self.store.get(&key).await else {
            info!("pod deleted before submission");
            return Ok(());
        };
        request.pod = latest;

        info!(
            config_maps = request.config_maps.len(),
            secrets = request.secrets.len(),
            "submitting pod"
        );
        self.gateway.create(&[request], cancel).await
    }

    /// Run [`Provider::create_pod`] as its own cancellable task.
    ///
    /// Returns `None` if a create for the same pod is already in flight.
    pub async fn spawn_create(self: &Arc<Self>, pod: Pod) -> Option<JoinHandle<()>> {
        let key = PodKey::of(&pod);
        let token = self.shutdown.child_token();
        {
            let mut creating = self.creating.lock().await;
            if creating.contains_key(&key) {
                return None;
            }
            creating.insert(key.clone(), token.clone());
        }

        let provider = Arc::clone(self);
        Some(tokio::spawn(async move {
            match provider.create_pod(pod, &token).await {
                Ok(()) => {}
                Err(e) if e.current_context().is_cancelled() => {
                    debug!(pod = %key, "pod creation cancelled");
                }
                Err(e) => error!(pod = %key, "pod creation failed: {e:?}"),
            }
            provider.creating.lock().await.remove(&key);
        }))
    }

    /// Tear down `pod` remotely and stop tracking it.
    ///
    /// A pod still waiting for dependencies has nothing remote yet: its
    /// create task is cancelled and the gateway is not called.
    #[instrument(skip_all, fields(pod = %PodKey::of(pod)))]
    pub async fn delete_pod(&self, pod: &Pod, cancel: &CancellationToken) -> ProviderResult<()> {
        let key = PodKey::of(pod);
        if let Some(token) = self.creating.lock().await.remove(&key) {
            token.cancel();
        }

        let tracked = self.store.get(&key).await;
        if tracked.as_ref().and_then(PodPhase::of) == Some(PodPhase::Initializing) {
            self.store.remove(&key).await;
            info!("pod deleted while initializing, no remote work to remove");
        } else {
            self.gateway
                .delete(tracked.as_ref().unwrap_or(pod), cancel)
                .await?;
            self.store.remove(&key).await;
            info!("pod deleted");
        }

        if pod.metadata.deletion_timestamp.is_some() {
            self.cluster
                .force_delete_pod(&key.namespace, &key.name)
                .await
                .change_context(ProviderError::Kubernetes {
                    message: format!("failed to remove pod {key}"),
                })?;
        }
        Ok(())
    }

    /// One status cycle: ask the gateway about every tracked pod and fold
    /// the answers in. Returns how many pods changed.
    ///
    /// # Errors
    ///
    /// Any gateway failure aborts the cycle. A record for an unknown pod only
    /// warns and tells the gateway to forget it.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> ProviderResult<usize> {
        let pods = self.store.snapshot().await;
        if pods.is_empty() {
            return Ok(0);
        }

        let records = self.gateway.status(&pods, cancel).await?;
        let mut changed = 0;
        for record in &records {
            let updated = self
                .store
                .update_by_uid(&record.pod_uid, |pod| {
                    apply_status_record(pod, record).then(|| pod.clone())
                })
                .await;

            match updated {
                None => {
                    warn!(
                        pod_uid = %record.pod_uid,
                        pod_name = %record.pod_name,
                        namespace = %record.pod_namespace,
                        "status for untracked pod"
                    );
                    if let Err(e) = self.gateway.update_cache(&record.pod_uid, cancel).await {
                        if e.current_context().is_cancelled() {
                            return Err(e);
                        }
                        warn!(pod_uid = %record.pod_uid, "failed to update gateway cache: {e:?}");
                    }
                }
                Some(None) => {}
                Some(Some(pod)) => {
                    debug!(pod = %PodKey::of(&pod), phase = ?PodPhase::of(&pod), "pod status changed");
                    self.push_status(&pod).await;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    /// Bring the tracked set in line with a fresh listing of the node's pods.
    pub async fn resync(self: &Arc<Self>, pods: Vec<Pod>, cancel: &CancellationToken) {
        let listed: HashSet<PodKey> = pods.iter().map(PodKey::of).collect();
        for key in self.store.keys().await {
            if listed.contains(&key) {
                continue;
            }
            if let Some(pod) = self.store.get(&key).await {
                self.spawn_delete(pod, cancel.clone());
            }
        }
        for pod in pods {
            self.on_applied(pod, cancel).await;
        }
    }

    async fn on_applied(self: &Arc<Self>, pod: Pod, cancel: &CancellationToken) {
        if pod.metadata.deletion_timestamp.is_some() {
            self.spawn_delete(pod, cancel.clone());
        } else if !self.store.contains(&PodKey::of(&pod)).await {
            self.spawn_create(pod).await;
        }
    }

    fn spawn_delete(self: &Arc<Self>, pod: Pod, cancel: CancellationToken) {
        let provider = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = provider.delete_pod(&pod, &cancel).await {
                error!(pod = %PodKey::of(&pod), "pod deletion failed: {e:?}");
            }
        });
    }

    /// Route one watcher event. Creates and deletes run as their own tasks
    /// so a slow pod never stalls the event stream.
    pub async fn handle_event(self: &Arc<Self>, event: PodEvent, cancel: &CancellationToken) {
        match event {
            PodEvent::Applied(pod) => self.on_applied(pod, cancel).await,
            PodEvent::Deleted(pod) => self.spawn_delete(pod, cancel.clone()),
            PodEvent::Resynced(pods) => self.resync(pods, cancel).await,
        }
    }

    /// Fetch a container's log through the gateway.
    ///
    /// The pod UID comes from the tracked copy, or from the API server when
    /// this process does not track the pod.
    pub async fn container_logs(
        &self,
        namespace: &str,
        pod_name: &str,
        container_name: &str,
        opts: LogOptions,
        cancel: &CancellationToken,
    ) -> ProviderResult<Bytes> {
        let key = PodKey::new(namespace, pod_name);
        let pod = match self.store.get(&key).await {
            Some(pod) => Some(pod),
            None => self
                .cluster
                .get_pod(namespace, pod_name)
                .await
                .change_context(ProviderError::Kubernetes {
                    message: format!("failed to look up pod {key}"),
                })?,
        };
        let pod_uid = pod
            .and_then(|pod| pod.metadata.uid)
            .ok_or_else(|| {
                Report::new(ProviderError::Kubernetes {
                    message: format!("pod {key} not found"),
                })
            })?;

        let request = LogRequest {
            namespace: namespace.to_string(),
            pod_uid,
            pod_name: pod_name.to_string(),
            container_name: container_name.to_string(),
            opts,
        };
        self.gateway.logs(&request, cancel).await
    }
}
