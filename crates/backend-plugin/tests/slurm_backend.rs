use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use api_types::LogOptions;
use api_types::LogRequest;
use api_types::RetrievedPodData;
use api_types::IMAGE_ROOT_ANNOTATION;
use async_trait::async_trait;
use backend_plugin::runner::CommandOutput;
use backend_plugin::runner::CommandRunner;
use backend_plugin::slurm::SlurmBackend;
use backend_plugin::slurm::SlurmConfig;
use backend_plugin::Backend;
use backend_plugin::BackendError;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use similar_asserts::assert_eq;
use tokio::sync::Notify;

#[derive(Default)]
struct FakeState {
    calls: Vec<(String, Vec<String>)>,
    next_job_id: u32,
    queue: String,
    fail_sbatch: bool,
}

/// Scheduler stand-in: sbatch hands out increasing job IDs starting at 42,
/// squeue prints the configured queue and scancel always succeeds.
#[derive(Clone, Default)]
struct FakeRunner {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRunner {
    fn set_queue(&self, queue: &str) {
        self.state.lock().expect("lock").queue = queue.to_string();
    }

    fn fail_sbatch(&self) {
        self.state.lock().expect("lock").fail_sbatch = true;
    }

    fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.state
            .lock()
            .expect("lock")
            .calls
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<CommandOutput> {
        let program = program.display().to_string();
        let mut state = self.state.lock().expect("lock");
        state.calls.push((program.clone(), args.to_vec()));

        let output = match program.as_str() {
            "sbatch" if state.fail_sbatch => CommandOutput {
                exit_code: Some(1),
                stderr: "sbatch: error: invalid partition specified".to_string(),
                ..Default::default()
            },
            "sbatch" => {
                let id = 42 + state.next_job_id;
                state.next_job_id += 1;
                CommandOutput {
                    exit_code: Some(0),
                    stdout: format!("Submitted batch job {id}\n"),
                    ..Default::default()
                }
            }
            "squeue" => CommandOutput {
                exit_code: Some(0),
                stdout: state.queue.clone(),
                ..Default::default()
            },
            _ => CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            },
        };
        Ok(output)
    }
}

/// Holds every squeue call until released, so work can be slipped in
/// between the scheduler listing and the status answer.
#[derive(Clone, Default)]
struct GatedRunner {
    inner: FakeRunner,
    squeue_started: Arc<Notify>,
    release_squeue: Arc<Notify>,
}

#[async_trait]
impl CommandRunner for GatedRunner {
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<CommandOutput> {
        if program == Path::new("squeue") {
            self.squeue_started.notify_one();
            self.release_squeue.notified().await;
        }
        self.inner.run(program, args).await
    }
}

fn setup() -> (tempfile::TempDir, FakeRunner, SlurmBackend<FakeRunner>) {
    let tmp = tempfile::tempdir().expect("tempdir");
    let runner = FakeRunner::default();
    let config = SlurmConfig {
        data_root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let backend = SlurmBackend::with_runner(config, runner.clone());
    (tmp, runner, backend)
}

fn pod(name: &str, uid: &str, containers: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers
                .iter()
                .map(|(name, image)| Container {
                    name: name.to_string(),
                    image: Some(image.to_string()),
                    command: Some(vec!["sleep".to_string(), "60".to_string()]),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }),
        status: None,
    }
}

fn envelope(pod: Pod) -> RetrievedPodData {
    RetrievedPodData {
        pod,
        config_maps: Vec::new(),
        secrets: Vec::new(),
        containers: Vec::new(),
    }
}

#[test_log::test(tokio::test)]
async fn submit_writes_script_and_job_id() {
    let (tmp, runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("c1", "busybox")]);

    backend.submit(&[envelope(p1)]).await.expect("submit");

    let pod_dir = tmp.path().join("default-u1");
    assert_eq!(
        std::fs::read_to_string(pod_dir.join("c1.jid")).expect("jid file"),
        "42".to_string()
    );
    let script = std::fs::read_to_string(pod_dir.join("c1.sh")).expect("script");
    assert!(script.contains("#SBATCH --job-name=u1"));
    assert!(script.contains("singularity exec docker://busybox sleep 60"));

    let sbatch_calls = runner.calls_to("sbatch");
    assert_eq!(sbatch_calls.len(), 1);
    assert_eq!(sbatch_calls[0], vec![pod_dir.join("c1.sh").display().to_string()]);

    let jobs = backend.jobs().jobs_for("u1").await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_id, "42");
    assert_eq!(jobs[0].container_name, "c1");
}

#[test_log::test(tokio::test)]
async fn env_values_with_commas_go_through_env_file() {
    let (tmp, _runner, backend) = setup();
    let mut p1 = pod("p1", "u1", &[("c1", "busybox")]);
    if let Some(spec) = p1.spec.as_mut() {
        spec.containers[0].env = Some(vec![EnvVar {
            name: "PEERS".to_string(),
            value: Some("node1:80,node2:80".to_string()),
            value_from: None,
        }]);
    }

    backend.submit(&[envelope(p1)]).await.expect("submit");

    let pod_dir = tmp.path().join("default-u1");
    let env_path = pod_dir.join("c1.env");
    assert_eq!(
        std::fs::read_to_string(&env_path).expect("env file"),
        "PEERS=node1:80,node2:80\n".to_string()
    );
    let script = std::fs::read_to_string(pod_dir.join("c1.sh")).expect("script");
    assert!(script.contains(&format!(
        "singularity exec --env-file {} docker://busybox sleep 60",
        env_path.display()
    )));
}

#[test_log::test(tokio::test)]
async fn resubmitting_a_pod_does_not_duplicate_jobs() {
    let (_tmp, runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("c1", "busybox")]);

    backend.submit(&[envelope(p1.clone())]).await.expect("first");
    backend.submit(&[envelope(p1)]).await.expect("second");

    assert_eq!(runner.calls_to("sbatch").len(), 1);
    assert_eq!(backend.jobs().jobs_for("u1").await.len(), 1);
}

#[test_log::test(tokio::test)]
async fn local_image_without_root_is_skipped() {
    let (_tmp, runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("local", "/images/tool.sif"), ("c2", "busybox")]);

    backend.submit(&[envelope(p1)]).await.expect("submit");

    assert_eq!(runner.calls_to("sbatch").len(), 1);
    let jobs = backend.jobs().jobs_for("u1").await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].container_name, "c2");
}

#[test_log::test(tokio::test)]
async fn local_image_resolves_against_image_root() {
    let (tmp, _runner, backend) = setup();
    let mut p1 = pod("p1", "u1", &[("c1", "/images/tool.sif")]);
    p1.metadata.annotations = Some(BTreeMap::from([(
        IMAGE_ROOT_ANNOTATION.to_string(),
        "/shared".to_string(),
    )]));

    backend.submit(&[envelope(p1)]).await.expect("submit");

    let script = std::fs::read_to_string(tmp.path().join("default-u1/c1.sh")).expect("script");
    assert!(script.contains("singularity exec /shared/images/tool.sif sleep 60"));
}

#[test_log::test(tokio::test)]
async fn sbatch_failure_stops_the_batch() {
    let (_tmp, runner, backend) = setup();
    runner.fail_sbatch();
    let p1 = pod("p1", "u1", &[("c1", "busybox"), ("c2", "busybox")]);

    let err = backend.submit(&[envelope(p1)]).await.expect_err("sbatch fails");

    assert!(matches!(
        err.current_context(),
        BackendError::Submission { container, .. } if container == "c1"
    ));
    assert_eq!(runner.calls_to("sbatch").len(), 1);
    assert!(backend.jobs().jobs_for("u1").await.is_empty());
}

#[test_log::test(tokio::test)]
async fn status_maps_queue_states_per_container() {
    let (tmp, runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("c1", "busybox"), ("c2", "busybox"), ("c3", "busybox")]);
    backend.submit(&[envelope(p1.clone())]).await.expect("submit");

    // 42 runs, 43 waits, 44 has left the queue with exit status 0.
    runner.set_queue("42 RUNNING\n43 PENDING\n440 RUNNING\n");
    std::fs::write(tmp.path().join("default-u1/c3.status"), "0\n").expect("status file");

    let records = backend.status(&[p1]).await.expect("status");

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.pod_name, "p1");
    assert_eq!(record.pod_uid, "u1");
    let names: Vec<&str> = record.containers.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["c1", "c2", "c3"]);

    let state = |idx: usize| record.containers[idx].state.clone().expect("state");
    assert!(state(0).running.is_some());
    assert!(record.containers[0].ready);
    assert!(state(1).waiting.is_some());
    let terminated = state(2).terminated.expect("c3 terminated");
    assert_eq!(terminated.exit_code, 0);
    assert_eq!(terminated.reason.as_deref(), Some("Completed"));

    assert_eq!(
        runner.calls_to("squeue"),
        vec![vec!["--me".to_string(), "--noheader".to_string(), "--format=%i %T".to_string()]]
    );
}

#[test_log::test(tokio::test)]
async fn finished_job_without_status_file_reports_failure() {
    let (_tmp, runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("c1", "busybox")]);
    backend.submit(&[envelope(p1.clone())]).await.expect("submit");
    runner.set_queue("");

    let records = backend.status(&[p1]).await.expect("status");

    let terminated = records[0].containers[0]
        .state
        .clone()
        .and_then(|s| s.terminated)
        .expect("terminated");
    assert_eq!(terminated.exit_code, 1);
    assert_eq!(terminated.reason.as_deref(), Some("Error"));
}

#[test_log::test(tokio::test)]
async fn status_skips_unknown_pods_without_querying_scheduler() {
    let (_tmp, runner, backend) = setup();

    let records = backend
        .status(&[pod("ghost", "u9", &[("c1", "busybox")])])
        .await
        .expect("status");

    assert!(records.is_empty());
    assert!(runner.calls_to("squeue").is_empty());
}

#[test_log::test(tokio::test)]
async fn delete_cancels_jobs_and_cleans_up() {
    let (tmp, runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("c1", "busybox"), ("c2", "busybox")]);
    backend.submit(&[envelope(p1.clone())]).await.expect("submit");

    backend.delete(&p1).await.expect("delete");

    assert_eq!(
        runner.calls_to("scancel"),
        vec![vec!["42".to_string()], vec!["43".to_string()]]
    );
    assert!(backend.jobs().jobs_for("u1").await.is_empty());
    assert!(!tmp.path().join("default-u1").exists());

    // Deleting again is harmless.
    backend.delete(&p1).await.expect("second delete");
}

#[test_log::test(tokio::test)]
async fn logs_apply_tail_option() {
    let (tmp, _runner, backend) = setup();
    let p1 = pod("p1", "u1", &[("c1", "busybox")]);
    backend.submit(&[envelope(p1)]).await.expect("submit");
    std::fs::write(tmp.path().join("default-u1/c1.out"), "one\ntwo\nthree\n").expect("out file");

    let request = LogRequest {
        namespace: "default".to_string(),
        pod_uid: "u1".to_string(),
        pod_name: "p1".to_string(),
        container_name: "c1".to_string(),
        opts: LogOptions {
            tail: Some(1),
            ..Default::default()
        },
    };
    let logs = backend.logs(&request).await.expect("logs");
    assert_eq!(logs, b"three\n".to_vec());

    let missing = LogRequest {
        container_name: "c9".to_string(),
        ..request
    };
    let err = backend.logs(&missing).await.expect_err("no output");
    assert!(matches!(err.current_context(), BackendError::NotFound { .. }));
}

#[test_log::test(tokio::test)]
async fn job_submitted_during_listing_is_not_reported_finished() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let runner = GatedRunner::default();
    let config = SlurmConfig {
        data_root: tmp.path().to_path_buf(),
        ..Default::default()
    };
    let backend = Arc::new(SlurmBackend::with_runner(config, runner.clone()));

    let pod_a = pod("a", "ua", &[("c1", "busybox")]);
    let pod_b = pod("b", "ub", &[("c1", "busybox")]);
    backend.submit(&[envelope(pod_a.clone())]).await.expect("submit a");
    runner.inner.set_queue("42 RUNNING\n");

    let status_task = {
        let backend = Arc::clone(&backend);
        let pods = vec![pod_a.clone(), pod_b.clone()];
        tokio::spawn(async move { backend.status(&pods).await })
    };

    runner.squeue_started.notified().await;
    backend.submit(&[envelope(pod_b.clone())]).await.expect("submit b");
    runner.release_squeue.notify_one();

    let records = status_task.await.expect("join").expect("status");
    let uids: Vec<&str> = records.iter().map(|r| r.pod_uid.as_str()).collect();
    assert_eq!(uids, vec!["ua"]);
    assert!(records[0].containers[0]
        .state
        .as_ref()
        .is_some_and(|s| s.running.is_some()));

    // The next cycle sees job 43 in the listing.
    runner.inner.set_queue("42 RUNNING\n43 PENDING\n");
    runner.release_squeue.notify_one();
    let records = backend.status(&[pod_a, pod_b]).await.expect("status");
    assert_eq!(records.len(), 2);
    let waiting = records[1].containers[0].state.clone().expect("state");
    assert_eq!(records[1].pod_uid, "ub");
    assert!(waiting.waiting.is_some());
    assert!(waiting.terminated.is_none());
}

#[test_log::test(tokio::test)]
async fn concurrent_submits_get_distinct_jobs() {
    let (_tmp, runner, backend) = setup();
    let pods: Vec<Pod> = (0..5)
        .map(|i| pod(&format!("p{i}"), &format!("u{i}"), &[("c1", "busybox")]))
        .collect();
    runner.set_queue("42 RUNNING\n43 RUNNING\n44 RUNNING\n45 RUNNING\n46 RUNNING\n");

    let envelopes: Vec<RetrievedPodData> = pods.iter().cloned().map(envelope).collect();
    let submits = envelopes.iter().map(|e| backend.submit(std::slice::from_ref(e)));
    let (results, records) = tokio::join!(
        futures::future::join_all(submits),
        backend.status(&pods)
    );
    assert!(results.iter().all(Result::is_ok));
    assert!(records.is_ok());

    let mut ids = Vec::new();
    for i in 0..5 {
        let jobs = backend.jobs().jobs_for(&format!("u{i}")).await;
        assert_eq!(jobs.len(), 1);
        ids.push(jobs[0].job_id.clone());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(runner.calls_to("sbatch").len(), 5);
}
