//! Pod status cache.
//!
//! `latest` holds the last status relayed for each live pod and loses the
//! entry once the pod is deleted through the gateway. Once the provider
//! reports a UID as gone, its entry moves to `deleted` and that pod is left
//! out of every later status query and answer.

use std::collections::HashMap;

use api_types::PodStatusRecord;
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct StatusCache {
    latest: RwLock<HashMap<String, PodStatusRecord>>,
    deleted: RwLock<HashMap<String, Option<PodStatusRecord>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember the records as the latest known status of their pods.
    pub async fn record(&self, records: &[PodStatusRecord]) {
        let mut latest = self.latest.write().await;
        for record in records {
            latest.insert(record.pod_uid.clone(), record.clone());
        }
    }

    /// Drop the status of a pod deleted through the gateway.
    pub async fn forget(&self, uid: &str) -> Option<PodStatusRecord> {
        self.latest.write().await.remove(uid)
    }

    /// Mark `uid` as gone, keeping its last known status.
    pub async fn mark_deleted(&self, uid: &str) {
        let last = self.latest.write().await.remove(uid);
        let mut deleted = self.deleted.write().await;
        let entry = deleted.entry(uid.to_string()).or_insert(None);
        if last.is_some() {
            *entry = last;
        }
    }

    pub async fn is_deleted(&self, uid: &str) -> bool {
        self.deleted.read().await.contains_key(uid)
    }

    /// Last status seen for a deleted pod
    pub async fn deleted_status(&self, uid: &str) -> Option<PodStatusRecord> {
        self.deleted.read().await.get(uid).cloned().flatten()
    }

    pub async fn latest(&self, uid: &str) -> Option<PodStatusRecord> {
        self.latest.read().await.get(uid).cloned()
    }

    /// Drop pods already reported as gone from a status query.
    pub async fn live_pods(&self, pods: Vec<Pod>) -> Vec<Pod> {
        let deleted = self.deleted.read().await;
        pods.into_iter()
            .filter(|pod| !matches!(pod.metadata.uid.as_deref(), Some(uid) if deleted.contains_key(uid)))
            .collect()
    }

    /// Drop records of pods already reported as gone.
    pub async fn live_records(&self, records: Vec<PodStatusRecord>) -> Vec<PodStatusRecord> {
        let deleted = self.deleted.read().await;
        records
            .into_iter()
            .filter(|record| !deleted.contains_key(&record.pod_uid))
            .collect()
    }
}
