//! In-memory record of submitted batch jobs, keyed by pod UID.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// One submitted batch job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJob {
    pub job_id: String,
    pub pod_uid: String,
    pub pod_name: String,
    pub pod_namespace: String,
    pub container_name: String,
}

/// Jobs grouped by pod UID, in submission order.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: RwLock<HashMap<String, Vec<RemoteJob>>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: RemoteJob) {
        let mut jobs = self.jobs.write().await;
        jobs.entry(job.pod_uid.clone()).or_default().push(job);
    }

    pub async fn contains(&self, pod_uid: &str, container_name: &str) -> bool {
        let jobs = self.jobs.read().await;
        jobs.get(pod_uid)
            .is_some_and(|list| list.iter().any(|j| j.container_name == container_name))
    }

    pub async fn jobs_for(&self, pod_uid: &str) -> Vec<RemoteJob> {
        let jobs = self.jobs.read().await;
        jobs.get(pod_uid).cloned().unwrap_or_default()
    }

    /// Drop every job of the pod, returning what was removed.
    pub async fn remove_pod(&self, pod_uid: &str) -> Vec<RemoteJob> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(pod_uid).unwrap_or_default()
    }
}
