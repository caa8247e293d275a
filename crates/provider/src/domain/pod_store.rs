//! The provider's owned view of the pods assigned to this node.

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use tokio::sync::RwLock;

/// Namespace-qualified pod name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
#[display("{namespace}/{name}")]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of(pod: &Pod) -> Self {
        Self::new(
            pod.metadata.namespace.as_deref().unwrap_or("default"),
            pod.metadata.name.as_deref().unwrap_or_default(),
        )
    }
}

/// Tracked pods. Every mutation runs under the write lock, so readers never
/// see a half-updated pod.
#[derive(Debug, Default)]
pub struct PodStore {
    pods: RwLock<HashMap<PodKey, Pod>>,
}

impl PodStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `pod`. An already tracked pod keeps its current copy.
    pub async fn insert_if_absent(&self, pod: Pod) -> bool {
        let mut pods = self.pods.write().await;
        let key = PodKey::of(&pod);
        if pods.contains_key(&key) {
            return false;
        }
        pods.insert(key, pod);
        true
    }

    pub async fn get(&self, key: &PodKey) -> Option<Pod> {
        self.pods.read().await.get(key).cloned()
    }

    pub async fn contains(&self, key: &PodKey) -> bool {
        self.pods.read().await.contains_key(key)
    }

    pub async fn remove(&self, key: &PodKey) -> Option<Pod> {
        self.pods.write().await.remove(key)
    }

    /// Copies of every tracked pod, ordered by key.
    pub async fn snapshot(&self) -> Vec<Pod> {
        let pods = self.pods.read().await;
        let mut keys: Vec<&PodKey> = pods.keys().collect();
        keys.sort();
        keys.into_iter().filter_map(|k| pods.get(k).cloned()).collect()
    }

    pub async fn keys(&self) -> Vec<PodKey> {
        self.pods.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.pods.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pods.read().await.is_empty()
    }

    /// Run `f` on the tracked pod, if any.
    pub async fn update<R>(&self, key: &PodKey, f: impl FnOnce(&mut Pod) -> R) -> Option<R> {
        let mut pods = self.pods.write().await;
        pods.get_mut(key).map(f)
    }

    /// Run `f` on the tracked pod with the given UID, if any.
    pub async fn update_by_uid<R>(&self, uid: &str, f: impl FnOnce(&mut Pod) -> R) -> Option<R> {
        let mut pods = self.pods.write().await;
        pods.values_mut()
            .find(|pod| pod.metadata.uid.as_deref() == Some(uid))
            .map(f)
    }
}
