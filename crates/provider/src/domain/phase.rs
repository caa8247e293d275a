use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodStatus;

/// Pod lifecycle phase as reported on the pod object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum PodPhase {
    Pending,
    /// Waiting for ConfigMaps or Secrets referenced by volumes
    Initializing,
    Running,
    Failed,
    Succeeded,
}

impl PodPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            PodPhase::Pending => "Pending",
            PodPhase::Initializing => "Initializing",
            PodPhase::Running => "Running",
            PodPhase::Failed => "Failed",
            PodPhase::Succeeded => "Succeeded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(PodPhase::Pending),
            "Initializing" => Some(PodPhase::Initializing),
            "Running" => Some(PodPhase::Running),
            "Failed" => Some(PodPhase::Failed),
            "Succeeded" => Some(PodPhase::Succeeded),
            _ => None,
        }
    }

    pub fn of(pod: &Pod) -> Option<Self> {
        pod.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .and_then(Self::parse)
    }

    /// Set the phase on `pod`, returning whether it changed.
    pub fn apply(self, pod: &mut Pod) -> bool {
        if Self::of(pod) == Some(self) {
            return false;
        }
        pod.status.get_or_insert_with(PodStatus::default).phase = Some(self.as_str().to_string());
        true
    }
}
