use std::sync::Arc;

use crate::domain::Provider;
use crate::infrastructure::k8s::PodWatcher;

/// Application dependencies
pub struct ApplicationServices {
    pub provider: Arc<Provider>,
    pub pod_watcher: Arc<PodWatcher>,
}
