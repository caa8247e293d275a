//! Folding backend-reported container states into a tracked pod.

use api_types::PodStatusRecord;
use chrono::Utc;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodCondition;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

use super::phase::PodPhase;

pub const READY_CONDITION: &str = "Ready";

/// What one status record says about the pod as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// At least one container is waiting or running
    Running,
    /// Nothing is running and a container exited non-zero
    Errored { exit_code: i32 },
    /// Every container terminated successfully
    Completed,
    /// No container reported a state
    Unknown,
}

/// Running beats errored, errored beats completed.
pub fn classify(containers: &[ContainerStatus]) -> Outcome {
    let states: Vec<_> = containers.iter().filter_map(|c| c.state.as_ref()).collect();

    if states.iter().any(|s| s.waiting.is_some() || s.running.is_some()) {
        return Outcome::Running;
    }
    let first_failure = states
        .iter()
        .filter_map(|s| s.terminated.as_ref())
        .find(|t| t.exit_code != 0);
    if let Some(terminated) = first_failure {
        return Outcome::Errored {
            exit_code: terminated.exit_code,
        };
    }
    if !containers.is_empty() && states.len() == containers.len() {
        return Outcome::Completed;
    }
    Outcome::Unknown
}

/// Replace the entry with the same name, or append.
pub fn upsert_container_status(status: &mut PodStatus, incoming: &ContainerStatus) {
    let statuses = status.container_statuses.get_or_insert_with(Vec::new);
    match statuses.iter_mut().find(|c| c.name == incoming.name) {
        Some(existing) => *existing = incoming.clone(),
        None => statuses.push(incoming.clone()),
    }
}

/// Set a condition by type. An identical status and reason leaves the
/// existing condition, and its transition time, untouched.
pub fn upsert_condition(status: &mut PodStatus, type_: &str, value: bool, reason: Option<&str>) {
    let value = if value { "True" } else { "False" };
    let conditions = status.conditions.get_or_insert_with(Vec::new);

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status == value && existing.reason.as_deref() == reason {
            return;
        }
        existing.status = value.to_string();
        existing.reason = reason.map(str::to_string);
        existing.last_transition_time = Some(Time(Utc::now()));
        return;
    }

    conditions.push(PodCondition {
        type_: type_.to_string(),
        status: value.to_string(),
        reason: reason.map(str::to_string),
        last_transition_time: Some(Time(Utc::now())),
        ..Default::default()
    });
}

/// Fold one status record into `pod`. Returns whether the pod's status changed.
pub fn apply_status_record(pod: &mut Pod, record: &PodStatusRecord) -> bool {
    let before = pod.status.clone();
    let current = PodPhase::of(pod);

    {
        let status = pod.status.get_or_insert_with(PodStatus::default);
        for container in &record.containers {
            upsert_container_status(status, container);
        }
    }

    match classify(&record.containers) {
        Outcome::Running if current != Some(PodPhase::Running) => {
            PodPhase::Running.apply(pod);
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.reason = None;
            status.message = None;
            if status.start_time.is_none() {
                status.start_time = Some(Time(Utc::now()));
            }
            upsert_condition(status, READY_CONDITION, true, None);
        }
        Outcome::Errored { exit_code } if current != Some(PodPhase::Failed) => {
            PodPhase::Failed.apply(pod);
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.reason = Some(format!("Error: {exit_code}"));
            upsert_condition(status, READY_CONDITION, false, Some("Error"));
        }
        Outcome::Completed if current != Some(PodPhase::Succeeded) => {
            PodPhase::Succeeded.apply(pod);
            let status = pod.status.get_or_insert_with(PodStatus::default);
            status.reason = Some("Completed".to_string());
            upsert_condition(status, READY_CONDITION, false, Some("Completed"));
        }
        _ => {}
    }

    pod.status != before
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::ContainerState;
    use k8s_openapi::api::core::v1::ContainerStateRunning;
    use k8s_openapi::api::core::v1::ContainerStateTerminated;
    use k8s_openapi::api::core::v1::ContainerStateWaiting;
    use similar_asserts::assert_eq;

    use super::*;

    fn running(name: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            ready: true,
            state: Some(ContainerState {
                running: Some(ContainerStateRunning::default()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn waiting(name: &str) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            state: Some(ContainerState {
                waiting: Some(ContainerStateWaiting::default()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn terminated(name: &str, exit_code: i32) -> ContainerStatus {
        ContainerStatus {
            name: name.to_string(),
            state: Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    exit_code,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn record(containers: Vec<ContainerStatus>) -> PodStatusRecord {
        PodStatusRecord {
            pod_name: "p1".to_string(),
            pod_namespace: "default".to_string(),
            pod_uid: "u1".to_string(),
            containers,
        }
    }

    fn ready_conditions(pod: &Pod) -> Vec<PodCondition> {
        pod.status
            .iter()
            .flat_map(|s| s.conditions.iter().flatten())
            .filter(|c| c.type_ == READY_CONDITION)
            .cloned()
            .collect()
    }

    #[test]
    fn classify_precedence() {
        assert_eq!(
            classify(&[terminated("a", 0), waiting("b")]),
            Outcome::Running
        );
        assert_eq!(
            classify(&[terminated("a", 0), terminated("b", 2), terminated("c", 3)]),
            Outcome::Errored { exit_code: 2 }
        );
        assert_eq!(
            classify(&[terminated("a", 0), terminated("b", 0)]),
            Outcome::Completed
        );
        assert_eq!(classify(&[]), Outcome::Unknown);
    }

    #[test]
    fn errored_is_not_masked_by_completed_siblings() {
        let mut pod = Pod::default();
        apply_status_record(&mut pod, &record(vec![terminated("a", 0), terminated("b", 1)]));

        assert_eq!(PodPhase::of(&pod), Some(PodPhase::Failed));
        assert_eq!(
            pod.status.as_ref().and_then(|s| s.reason.as_deref()),
            Some("Error: 1")
        );
    }

    #[test]
    fn running_sets_ready_condition_once() {
        let mut pod = Pod::default();
        let rec = record(vec![running("c1")]);

        assert!(apply_status_record(&mut pod, &rec));
        let first = pod.clone();
        assert!(!apply_status_record(&mut pod, &rec));

        assert_eq!(pod, first);
        assert_eq!(PodPhase::of(&pod), Some(PodPhase::Running));
        let ready = ready_conditions(&pod);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].status, "True");
    }

    #[test]
    fn running_wins_over_stale_terminal_phase() {
        let mut pod = Pod::default();
        apply_status_record(&mut pod, &record(vec![terminated("c1", 0)]));
        assert_eq!(PodPhase::of(&pod), Some(PodPhase::Succeeded));

        apply_status_record(&mut pod, &record(vec![running("c1")]));
        assert_eq!(PodPhase::of(&pod), Some(PodPhase::Running));
        let ready = ready_conditions(&pod);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].status, "True");
    }

    #[test]
    fn completed_marks_not_ready() {
        let mut pod = Pod::default();
        apply_status_record(&mut pod, &record(vec![running("c1")]));
        apply_status_record(&mut pod, &record(vec![terminated("c1", 0)]));

        assert_eq!(PodPhase::of(&pod), Some(PodPhase::Succeeded));
        let ready = ready_conditions(&pod);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].status, "False");
        assert_eq!(ready[0].reason.as_deref(), Some("Completed"));
    }

    #[test]
    fn container_statuses_are_upserted_by_name() {
        let mut pod = Pod::default();
        apply_status_record(&mut pod, &record(vec![waiting("c1")]));
        apply_status_record(&mut pod, &record(vec![running("c2"), running("c1")]));

        let statuses = pod
            .status
            .and_then(|s| s.container_statuses)
            .unwrap_or_default();
        let names: Vec<&str> = statuses.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["c1", "c2"]);
        assert!(statuses[0].state.as_ref().is_some_and(|s| s.running.is_some()));
    }

    #[test]
    fn empty_record_changes_nothing() {
        let mut pod = Pod::default();
        PodPhase::Pending.apply(&mut pod);
        assert!(!apply_status_record(&mut pod, &record(Vec::new())));
        assert_eq!(PodPhase::of(&pod), Some(PodPhase::Pending));
    }
}
