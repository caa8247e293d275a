//! Slurm backend: one batch job per container, run through Singularity.

mod job_table;
mod script;
mod squeue;
mod volumes;

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use api_types::LogRequest;
use api_types::PodStatusRecord;
use api_types::RetrievedPodData;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerState;
use k8s_openapi::api::core::v1::ContainerStateRunning;
use k8s_openapi::api::core::v1::ContainerStateTerminated;
use k8s_openapi::api::core::v1::ContainerStateWaiting;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::warn;

pub use self::job_table::JobTable;
pub use self::job_table::RemoteJob;
pub use self::squeue::QueuedState;
use crate::backend::apply_log_options;
use crate::backend::Backend;
use crate::error::BackendError;
use crate::error::BackendResult;
use crate::runner::CommandRunner;
use crate::runner::ProcessRunner;

/// Exit code reported for a finished job whose status file is missing.
const UNKNOWN_EXIT_CODE: i32 = 1;

/// Scheduler binaries and the directory holding per-pod job files.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlurmConfig {
    pub data_root: PathBuf,
    pub sbatch: PathBuf,
    pub squeue: PathBuf,
    pub scancel: PathBuf,
    pub singularity: PathBuf,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from(".local/interlink/jobs"),
            sbatch: PathBuf::from("sbatch"),
            squeue: PathBuf::from("squeue"),
            scancel: PathBuf::from("scancel"),
            singularity: PathBuf::from("singularity"),
        }
    }
}

struct PodIdentity<'a> {
    name: &'a str,
    namespace: &'a str,
    uid: &'a str,
}

impl<'a> PodIdentity<'a> {
    fn of(pod: &'a Pod) -> BackendResult<Self> {
        let uid = pod.metadata.uid.as_deref().ok_or_else(|| {
            Report::new(BackendError::Decode {
                message: "pod is missing metadata.uid".to_string(),
            })
        })?;
        Ok(Self {
            name: pod.metadata.name.as_deref().unwrap_or_default(),
            namespace: pod.metadata.namespace.as_deref().unwrap_or("default"),
            uid,
        })
    }
}

pub struct SlurmBackend<R = ProcessRunner> {
    config: SlurmConfig,
    runner: R,
    jobs: JobTable,
    submit_lock: Mutex<()>,
}

impl SlurmBackend<ProcessRunner> {
    pub fn new(config: SlurmConfig) -> Self {
        Self::with_runner(config, ProcessRunner)
    }
}

impl<R: CommandRunner> SlurmBackend<R> {
    pub fn with_runner(config: SlurmConfig, runner: R) -> Self {
        Self {
            config,
            runner,
            jobs: JobTable::new(),
            submit_lock: Mutex::new(()),
        }
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    fn pod_dir(&self, namespace: &str, uid: &str) -> PathBuf {
        self.config.data_root.join(format!("{namespace}-{uid}"))
    }

    async fn submit_pod(&self, data: &RetrievedPodData) -> BackendResult<()> {
        let pod = &data.pod;
        let id = PodIdentity::of(pod)?;
        let pod_dir = self.pod_dir(id.namespace, id.uid);
        tokio::fs::create_dir_all(&pod_dir)
            .await
            .change_context(BackendError::Io {
                message: format!("failed to create {}", pod_dir.display()),
            })?;

        let volume_paths = volumes::prepare_volumes(&pod_dir, data).await?;
        let flags = script::sbatch_flags(pod);
        let containers = pod
            .spec
            .as_ref()
            .map(|spec| spec.containers.as_slice())
            .unwrap_or_default();

        for container in containers {
            if self.jobs.contains(id.uid, &container.name).await {
                info!(pod = id.name, container = %container.name, "container already submitted, skipping");
                continue;
            }
            let Some(image) = script::resolve_image(pod, container) else {
                warn!(
                    pod = id.name,
                    container = %container.name,
                    "image is a local path but the pod has no image-root annotation, skipping"
                );
                continue;
            };

            let env = self.write_env_file(&pod_dir, container).await?;
            let binds = volumes::container_binds(container, &volume_paths)?;
            let command =
                script::exec_command(&self.config.singularity, &env, &binds, &image, container);
            let body = script::render_script(&pod_dir, id.uid, &container.name, &flags, &command);

            let job_id = self.submit_script(&pod_dir, &container.name, &body).await?;
            self.jobs
                .insert(RemoteJob {
                    job_id: job_id.clone(),
                    pod_uid: id.uid.to_string(),
                    pod_name: id.name.to_string(),
                    pod_namespace: id.namespace.to_string(),
                    container_name: container.name.clone(),
                })
                .await;
            info!(pod = id.name, container = %container.name, job_id = %job_id, "job submitted");
        }
        Ok(())
    }

    /// Write `<container>.env` next to the script and return the flags that load it.
    async fn write_env_file(&self, pod_dir: &Path, container: &Container) -> BackendResult<Vec<String>> {
        let Some(contents) = script::env_file(container) else {
            return Ok(Vec::new());
        };
        let path = pod_dir.join(format!("{}.env", container.name));
        tokio::fs::write(&path, contents)
            .await
            .change_context_lazy(|| BackendError::Submission {
                container: container.name.clone(),
                message: format!("failed to write {}", path.display()),
            })?;
        Ok(vec!["--env-file".to_string(), path.display().to_string()])
    }

    /// Write the script, hand it to `sbatch` and persist the assigned job ID.
    async fn submit_script(&self, pod_dir: &Path, container: &str, body: &str) -> BackendResult<String> {
        let submission_error = |message: String| BackendError::Submission {
            container: container.to_string(),
            message,
        };

        let script_path = pod_dir.join(format!("{container}.sh"));
        tokio::fs::write(&script_path, body)
            .await
            .change_context_lazy(|| submission_error(format!("failed to write {}", script_path.display())))?;

        let output = self
            .runner
            .run(&self.config.sbatch, &[script_path.display().to_string()])
            .await
            .change_context_lazy(|| submission_error("failed to run sbatch".to_string()))?;
        if !output.success() {
            return Err(Report::new(submission_error(output.stderr.trim().to_string())));
        }
        let job_id = script::parse_job_id(&output.stdout).ok_or_else(|| {
            Report::new(submission_error(format!(
                "unexpected sbatch output: {}",
                output.stdout.trim()
            )))
        })?;

        let jid_path = pod_dir.join(format!("{container}.jid"));
        tokio::fs::write(&jid_path, &job_id)
            .await
            .change_context_lazy(|| submission_error(format!("failed to write {}", jid_path.display())))?;
        let stored = tokio::fs::read_to_string(&jid_path)
            .await
            .change_context_lazy(|| submission_error(format!("failed to read {}", jid_path.display())))?;

        Ok(stored.trim().to_string())
    }

    async fn exit_code(&self, job: &RemoteJob) -> i32 {
        let path = self
            .pod_dir(&job.pod_namespace, &job.pod_uid)
            .join(format!("{}.status", job.container_name));
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => content.trim().parse().unwrap_or(UNKNOWN_EXIT_CODE),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "no exit status recorded");
                UNKNOWN_EXIT_CODE
            }
        }
    }

    async fn container_status(
        &self,
        job: &RemoteJob,
        image: String,
        queue: &HashMap<String, QueuedState>,
    ) -> ContainerStatus {
        let (state, ready) = match queue.get(&job.job_id) {
            Some(QueuedState::Waiting) => (
                ContainerState {
                    waiting: Some(ContainerStateWaiting {
                        reason: Some("Pending".to_string()),
                        message: Some(format!("job {} is queued", job.job_id)),
                    }),
                    ..Default::default()
                },
                false,
            ),
            Some(QueuedState::Running) => (
                ContainerState {
                    running: Some(ContainerStateRunning::default()),
                    ..Default::default()
                },
                true,
            ),
            None => {
                let exit_code = self.exit_code(job).await;
                let reason = if exit_code == 0 { "Completed" } else { "Error" };
                (
                    ContainerState {
                        terminated: Some(ContainerStateTerminated {
                            exit_code,
                            reason: Some(reason.to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    false,
                )
            }
        };

        ContainerStatus {
            name: job.container_name.clone(),
            image,
            ready,
            container_id: Some(format!("slurm://{}", job.job_id)),
            state: Some(state),
            ..Default::default()
        }
    }
}

#[async_trait]
impl<R: CommandRunner> Backend for SlurmBackend<R> {
    fn name(&self) -> &'static str {
        "slurm"
    }

    #[instrument(skip_all, fields(pods = pods.len()))]
    async fn submit(&self, pods: &[RetrievedPodData]) -> BackendResult<()> {
        let _guard = self.submit_lock.lock().await;
        for data in pods {
            self.submit_pod(data).await?;
        }
        Ok(())
    }

    #[instrument(skip_all, fields(pod = pod.metadata.name.as_deref().unwrap_or_default()))]
    async fn delete(&self, pod: &Pod) -> BackendResult<()> {
        let id = PodIdentity::of(pod)?;

        for job in self.jobs.remove_pod(id.uid).await {
            match self
                .runner
                .run(&self.config.scancel, &[job.job_id.clone()])
                .await
            {
                Ok(output) if output.success() => {
                    info!(job_id = %job.job_id, container = %job.container_name, "job cancelled")
                }
                Ok(output) => warn!(
                    job_id = %job.job_id,
                    stderr = output.stderr.trim(),
                    "scancel reported failure"
                ),
                Err(e) => warn!(job_id = %job.job_id, error = %e, "failed to run scancel"),
            }
        }

        let pod_dir = self.pod_dir(id.namespace, id.uid);
        match tokio::fs::remove_dir_all(&pod_dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Report::new(e).change_context(BackendError::Io {
                message: format!("failed to remove {}", pod_dir.display()),
            })),
        }
    }

    #[instrument(skip_all, fields(pods = pods.len()))]
    async fn status(&self, pods: &[Pod]) -> BackendResult<Vec<PodStatusRecord>> {
        // Jobs are read before squeue runs: a job submitted after the listing
        // is simply not reported this cycle instead of looking finished.
        let mut tracked = Vec::new();
        for pod in pods {
            let Some(uid) = pod.metadata.uid.as_deref() else {
                continue;
            };
            let jobs = self.jobs.jobs_for(uid).await;
            if !jobs.is_empty() {
                tracked.push((pod, uid, jobs));
            }
        }
        if tracked.is_empty() {
            return Ok(Vec::new());
        }

        let args = ["--me", "--noheader", "--format=%i %T"].map(str::to_string);
        let output = self
            .runner
            .run(&self.config.squeue, &args)
            .await
            .change_context(BackendError::Scheduler {
                message: "failed to run squeue".to_string(),
            })?;
        if !output.success() {
            return Err(Report::new(BackendError::Scheduler {
                message: output.stderr.trim().to_string(),
            }));
        }
        let queue = squeue::parse_queue(&output.stdout);

        let mut records = Vec::with_capacity(tracked.len());
        for (pod, uid, jobs) in tracked {
            let mut containers = Vec::with_capacity(jobs.len());
            for job in &jobs {
                let image = pod
                    .spec
                    .iter()
                    .flat_map(|spec| spec.containers.iter())
                    .find(|c| c.name == job.container_name)
                    .and_then(|c| c.image.clone())
                    .unwrap_or_default();
                containers.push(self.container_status(job, image, &queue).await);
            }

            records.push(PodStatusRecord {
                pod_name: jobs[0].pod_name.clone(),
                pod_namespace: jobs[0].pod_namespace.clone(),
                pod_uid: uid.to_string(),
                containers,
            });
        }
        Ok(records)
    }

    async fn logs(&self, request: &LogRequest) -> BackendResult<Vec<u8>> {
        let path = self
            .pod_dir(&request.namespace, &request.pod_uid)
            .join(format!("{}.out", request.container_name));

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Report::new(BackendError::NotFound {
                    message: format!(
                        "no output for container {} of pod {}",
                        request.container_name, request.pod_name
                    ),
                }));
            }
            Err(e) => {
                return Err(Report::new(e).change_context(BackendError::Io {
                    message: format!("failed to read {}", path.display()),
                }))
            }
        };

        Ok(apply_log_options(&content, &request.opts))
    }
}
