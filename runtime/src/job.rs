//! Cluster job submission and watch.
//!
//! A job is created once, then a namespace-wide watch is consumed until the
//! job shows a `Complete` or `Failed` condition or the deadline passes.
//!
//! ```text
//! Submitted ──► Running ──► Complete | Failed
//!     │             │
//!     └─────────────┴──► TimedOut (deadline)
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use jctl_core::error::{JctlError, Result};
use jctl_core::JctlConfig;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, LocalObjectReference, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tokio::time::Instant;

/// Pause before re-opening a watch the server closed.
const WATCH_REOPEN_DELAY: Duration = Duration::from_secs(1);

/// Failure reported by the cluster client.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ClusterError(pub String);

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        ClusterError(err.to_string())
    }
}

/// Events from a namespace watch.
pub type JobEventStream = BoxStream<'static, std::result::Result<WatchEvent<Job>, ClusterError>>;

/// Control-plane operations the orchestrator needs.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create a job; the returned object carries the generated name.
    async fn create_job(&self, namespace: &str, job: &Job) -> std::result::Result<Job, ClusterError>;

    /// Watch every job in a namespace.
    async fn watch_namespace(&self, namespace: &str) -> std::result::Result<JobEventStream, ClusterError>;
}

/// Cluster client over `kube`.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    /// Connect using an explicit kubeconfig, or the client's default inference
    /// (`KUBECONFIG`, `~/.kube/config`, in-cluster service account).
    pub async fn connect(kubeconfig: Option<PathBuf>) -> std::result::Result<Self, ClusterError> {
        let client = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(&path).map_err(|e| {
                    ClusterError(format!("failed to read kubeconfig {}: {}", path.display(), e))
                })?;
                let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError(format!("failed to load kubeconfig: {}", e)))?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };
        Ok(Self { client })
    }

    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_job(&self, namespace: &str, job: &Job) -> std::result::Result<Job, ClusterError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), job).await?)
    }

    async fn watch_namespace(&self, namespace: &str) -> std::result::Result<JobEventStream, ClusterError> {
        let api: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        let stream = api.watch(&WatchParams::default(), "0").await?;
        Ok(stream.map(|event| event.map_err(ClusterError::from)).boxed())
    }
}

/// Terminal condition a job was observed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Complete,
    Failed,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Complete => write!(f, "Complete"),
            JobOutcome::Failed => write!(f, "Failed"),
        }
    }
}

/// The first `Complete` or `Failed` condition with status `True`, if any.
pub fn job_outcome(job: &Job) -> Option<JobOutcome> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .filter(|c| c.status == "True")
        .find_map(|c| match c.type_.as_str() {
            "Complete" => Some(JobOutcome::Complete),
            "Failed" => Some(JobOutcome::Failed),
            _ => None,
        })
}

/// Message of the `Failed` condition, for reporting.
pub fn failure_message(job: &Job) -> Option<String> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True")
        .map(|c| {
            c.message
                .clone()
                .or_else(|| c.reason.clone())
                .unwrap_or_else(|| "job failed".to_string())
        })
}

/// Shape of the job to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    pub namespace: String,
    /// Name prefix; the server appends a random suffix.
    pub name_prefix: String,
    pub image_pull_secret: String,
}

impl JobTemplate {
    pub fn from_config(config: &JctlConfig) -> Self {
        Self {
            namespace: config.namespace.clone(),
            name_prefix: config.job_name_prefix.clone(),
            image_pull_secret: config.image_pull_secret.clone(),
        }
    }

    /// One container running `image` as-is, never restarted.
    pub fn build(&self, image: &str) -> Job {
        Job {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", self.name_prefix)),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template: PodTemplateSpec {
                    metadata: None,
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: self.name_prefix.clone(),
                            image: Some(image.to_string()),
                            ..Default::default()
                        }],
                        image_pull_secrets: Some(vec![LocalObjectReference {
                            name: self.image_pull_secret.clone(),
                        }]),
                        restart_policy: Some("Never".to_string()),
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

/// A job that reached a terminal condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub name: String,
    pub outcome: JobOutcome,
    /// Failure detail when `outcome` is `Failed`.
    pub message: Option<String>,
}

/// Open namespace watch. Dropping it stops the underlying stream.
struct WatchHandle {
    job: String,
    stream: JobEventStream,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        tracing::debug!(job = %self.job, "Watch stopped");
    }
}

/// Submits a job and waits for it to finish.
pub struct JobOrchestrator {
    client: Arc<dyn ClusterClient>,
    template: JobTemplate,
    timeout_secs: u64,
}

impl JobOrchestrator {
    pub fn new(client: Arc<dyn ClusterClient>, template: JobTemplate, timeout_secs: u64) -> Self {
        Self {
            client,
            template,
            timeout_secs,
        }
    }

    /// Create the job for `program` and wait for a terminal condition or `deadline`.
    pub async fn run(&self, program: &str, image: &str, deadline: Instant) -> Result<JobRun> {
        let name = self.submit(program, image).await?;
        self.wait(program, &name, deadline).await
    }

    /// Create the job, returning its generated name.
    pub async fn submit(&self, program: &str, image: &str) -> Result<String> {
        let namespace = &self.template.namespace;
        let create_error = |message: String| JctlError::JobCreateError {
            program: program.to_string(),
            namespace: namespace.clone(),
            message,
        };
        let job = self.template.build(image);
        let created = self
            .client
            .create_job(namespace, &job)
            .await
            .map_err(|e| create_error(e.to_string()))?;
        let name = created
            .metadata
            .name
            .ok_or_else(|| create_error("created job has no name".to_string()))?;
        tracing::info!(job = %name, namespace = %namespace, program, image, "Job created");
        Ok(name)
    }

    /// Watch the namespace until job `name` finishes or `deadline` passes.
    pub async fn wait(&self, program: &str, name: &str, deadline: Instant) -> Result<JobRun> {
        let mut watch = self.open_watch(program, name).await?;
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                event = watch.stream.next() => match event {
                    Some(Ok(WatchEvent::Added(job)))
                    | Some(Ok(WatchEvent::Modified(job)))
                    | Some(Ok(WatchEvent::Deleted(job))) => {
                        if job.metadata.name.as_deref() != Some(name) {
                            continue;
                        }
                        if let Some(outcome) = job_outcome(&job) {
                            tracing::info!(job = %name, %outcome, "Job finished");
                            let message = match outcome {
                                JobOutcome::Failed => failure_message(&job),
                                JobOutcome::Complete => None,
                            };
                            return Ok(JobRun {
                                name: name.to_string(),
                                outcome,
                                message,
                            });
                        }
                        tracing::debug!(job = %name, "Job not finished yet");
                    }
                    Some(Ok(WatchEvent::Bookmark(_))) => {
                        tracing::debug!(job = %name, "Ignoring bookmark event");
                    }
                    Some(Ok(WatchEvent::Error(status))) => {
                        tracing::warn!(job = %name, code = status.code, reason = %status.message, "Ignoring non-job watch event");
                    }
                    Some(Err(e)) => {
                        return Err(JctlError::WatchStreamError {
                            program: program.to_string(),
                            job: name.to_string(),
                            message: e.to_string(),
                        });
                    }
                    None => {
                        tracing::debug!(job = %name, "Watch closed by server, reopening");
                        let reopen = async {
                            tokio::time::sleep(WATCH_REOPEN_DELAY).await;
                            self.open_watch(program, name).await
                        };
                        watch = match tokio::time::timeout_at(deadline, reopen).await {
                            Ok(reopened) => reopened?,
                            Err(_) => return Err(self.timed_out(program, name)),
                        };
                    }
                },
                _ = &mut sleep => {
                    return Err(self.timed_out(program, name));
                }
            }
        }
    }

    fn timed_out(&self, program: &str, name: &str) -> JctlError {
        tracing::warn!(job = %name, timeout_secs = self.timeout_secs, "Job did not finish before deadline");
        JctlError::JobTimeout {
            program: program.to_string(),
            job: name.to_string(),
            timeout_secs: self.timeout_secs,
        }
    }

    async fn open_watch(&self, program: &str, name: &str) -> Result<WatchHandle> {
        let stream = self
            .client
            .watch_namespace(&self.template.namespace)
            .await
            .map_err(|e| JctlError::WatchStreamError {
                program: program.to_string(),
                job: name.to_string(),
                message: e.to_string(),
            })?;
        Ok(WatchHandle {
            job: name.to_string(),
            stream,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) fn job_with(name: &str, conditions: &[(&str, &str)]) -> Job {
        Job {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: None,
            status: Some(JobStatus {
                conditions: Some(
                    conditions
                        .iter()
                        .map(|(t, s)| JobCondition {
                            type_: t.to_string(),
                            status: s.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }

    /// Sets a flag when dropped; moved into a fake stream to observe release.
    pub(crate) struct DropFlag(pub(crate) Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Cluster fake: each watch call pops the next scripted stream.
    pub(crate) struct FakeCluster {
        pub(crate) created: Mutex<Vec<Job>>,
        pub(crate) watches: Mutex<VecDeque<Vec<std::result::Result<WatchEvent<Job>, ClusterError>>>>,
        /// Stay open forever after the scripted events.
        pub(crate) hang: bool,
        pub(crate) fail_create: bool,
        /// Never return from any watch call after the first.
        pub(crate) stall_reopen: bool,
        pub(crate) watch_calls: AtomicUsize,
        pub(crate) released: Arc<AtomicBool>,
    }

    impl FakeCluster {
        pub(crate) fn new(watches: Vec<Vec<std::result::Result<WatchEvent<Job>, ClusterError>>>) -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                watches: Mutex::new(watches.into()),
                hang: false,
                fail_create: false,
                stall_reopen: false,
                watch_calls: AtomicUsize::new(0),
                released: Arc::new(AtomicBool::new(false)),
            }
        }

        pub(crate) fn hanging(mut self) -> Self {
            self.hang = true;
            self
        }
    }

    #[async_trait]
    impl ClusterClient for FakeCluster {
        async fn create_job(&self, _namespace: &str, job: &Job) -> std::result::Result<Job, ClusterError> {
            if self.fail_create {
                return Err(ClusterError("admission webhook denied the request".to_string()));
            }
            self.created.lock().unwrap().push(job.clone());
            let mut created = job.clone();
            created.metadata.name = Some("jctl-job-x7k2p".to_string());
            Ok(created)
        }

        async fn watch_namespace(&self, _namespace: &str) -> std::result::Result<JobEventStream, ClusterError> {
            if self.watch_calls.fetch_add(1, Ordering::SeqCst) > 0 && self.stall_reopen {
                futures::future::pending::<()>().await;
            }
            let events = self.watches.lock().unwrap().pop_front().unwrap_or_default();
            let flag = DropFlag(self.released.clone());
            let scripted = futures::stream::iter(events).map(move |e| {
                let _ = &flag;
                e
            });
            if self.hang {
                Ok(scripted.chain(futures::stream::pending()).boxed())
            } else {
                Ok(scripted.boxed())
            }
        }
    }

    const PROGRAM: &str = "github.com/x/hello";

    fn orchestrator(cluster: Arc<FakeCluster>) -> JobOrchestrator {
        JobOrchestrator::new(cluster, JobTemplate::from_config(&JctlConfig::default()), 300)
    }

    #[test]
    fn test_job_outcome_complete_true() {
        let job = job_with("j", &[("Complete", "True")]);
        assert_eq!(job_outcome(&job), Some(JobOutcome::Complete));
    }

    #[test]
    fn test_job_outcome_complete_false() {
        let job = job_with("j", &[("Complete", "False")]);
        assert_eq!(job_outcome(&job), None);
    }

    #[test]
    fn test_job_outcome_failed_and_first_wins() {
        assert_eq!(job_outcome(&job_with("j", &[("Failed", "True")])), Some(JobOutcome::Failed));
        let both = job_with("j", &[("Suspended", "True"), ("Failed", "True"), ("Complete", "True")]);
        assert_eq!(job_outcome(&both), Some(JobOutcome::Failed));
    }

    #[test]
    fn test_job_outcome_no_status() {
        let job = Job::default();
        assert_eq!(job_outcome(&job), None);
    }

    #[test]
    fn test_template_build() {
        let template = JobTemplate::from_config(&JctlConfig {
            namespace: "batch".to_string(),
            ..Default::default()
        });
        let job = template.build("gcr.io/p/hello@sha256:abcd");

        assert_eq!(job.metadata.generate_name.as_deref(), Some("jctl-job-"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("batch"));
        let pod = job.spec.unwrap().template.spec.unwrap();
        assert_eq!(pod.containers.len(), 1);
        assert_eq!(pod.containers[0].name, "jctl-job");
        assert_eq!(pod.containers[0].image.as_deref(), Some("gcr.io/p/hello@sha256:abcd"));
        assert!(pod.containers[0].command.is_none());
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.image_pull_secrets.unwrap()[0].name, "image-puller");
    }

    #[tokio::test]
    async fn test_run_complete() {
        let cluster = Arc::new(FakeCluster::new(vec![vec![
            Ok(WatchEvent::Added(job_with("other-job", &[("Complete", "True")]))),
            Ok(WatchEvent::Added(job_with("jctl-job-x7k2p", &[]))),
            Ok(WatchEvent::Modified(job_with("jctl-job-x7k2p", &[("Complete", "True")]))),
        ]]).hanging());
        let run = orchestrator(cluster.clone())
            .run(PROGRAM, "img", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(run.name, "jctl-job-x7k2p");
        assert_eq!(run.outcome, JobOutcome::Complete);
        assert_eq!(cluster.created.lock().unwrap().len(), 1);
        assert!(cluster.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_failed_is_a_value() {
        let mut failed = job_with("jctl-job-x7k2p", &[("Failed", "True")]);
        failed.status.as_mut().unwrap().conditions.as_mut().unwrap()[0].message =
            Some("BackoffLimitExceeded".to_string());
        let cluster = Arc::new(FakeCluster::new(vec![vec![Ok(WatchEvent::Modified(failed))]]).hanging());
        let run = orchestrator(cluster)
            .run(PROGRAM, "img", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(run.outcome, JobOutcome::Failed);
        assert_eq!(run.message.as_deref(), Some("BackoffLimitExceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_times_out_at_deadline() {
        let cluster = Arc::new(FakeCluster::new(vec![vec![
            Ok(WatchEvent::Added(job_with("jctl-job-x7k2p", &[("Complete", "False")]))),
        ]]).hanging());
        let start = Instant::now();
        let deadline = start + Duration::from_secs(300);

        let err = orchestrator(cluster.clone()).run(PROGRAM, "img", deadline).await.unwrap_err();

        assert!(matches!(
            err,
            JctlError::JobTimeout { ref program, ref job, timeout_secs: 300 }
                if program == PROGRAM && job == "jctl-job-x7k2p"
        ));
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_secs(300));
        assert!(elapsed < Duration::from_secs(301));
        assert!(cluster.released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_create_error_is_fatal() {
        let mut fake = FakeCluster::new(vec![]);
        fake.fail_create = true;
        let cluster = Arc::new(fake);
        let err = orchestrator(cluster.clone())
            .run(PROGRAM, "img", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, JctlError::JobCreateError { .. }));
        assert!(err.to_string().contains(PROGRAM));
        assert_eq!(cluster.watch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_error_is_surfaced() {
        let cluster = Arc::new(FakeCluster::new(vec![vec![Err(ClusterError(
            "connection reset".to_string(),
        ))]]).hanging());
        let err = orchestrator(cluster.clone())
            .run(PROGRAM, "img", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, JctlError::WatchStreamError { .. }));
        assert!(err.to_string().contains("connection reset"));
        assert!(cluster.released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_watch_is_reopened() {
        let cluster = Arc::new(FakeCluster::new(vec![
            vec![Ok(WatchEvent::Added(job_with("jctl-job-x7k2p", &[])))],
            vec![Ok(WatchEvent::Modified(job_with("jctl-job-x7k2p", &[("Complete", "True")])))],
        ]));
        let run = orchestrator(cluster.clone())
            .run(PROGRAM, "img", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(run.outcome, JobOutcome::Complete);
        assert_eq!(cluster.watch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_job_events_ignored() {
        let status = kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "too old resource version".to_string(),
            reason: "Expired".to_string(),
            code: 410,
        };
        let cluster = Arc::new(FakeCluster::new(vec![vec![
            Ok(WatchEvent::Error(status)),
            Ok(WatchEvent::Modified(job_with("jctl-job-x7k2p", &[("Complete", "True")]))),
        ]]).hanging());
        let run = orchestrator(cluster)
            .run(PROGRAM, "img", Instant::now() + Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(run.outcome, JobOutcome::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_reopen_times_out_at_deadline() {
        let mut fake = FakeCluster::new(vec![vec![Ok(WatchEvent::Added(job_with("jctl-job-x7k2p", &[])))]]);
        fake.stall_reopen = true;
        let cluster = Arc::new(fake);
        let start = Instant::now();

        let err = orchestrator(cluster.clone())
            .run(PROGRAM, "img", start + Duration::from_secs(30))
            .await
            .unwrap_err();

        assert!(matches!(err, JctlError::JobTimeout { .. }));
        let elapsed = Instant::now() - start;
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(31));
        assert_eq!(cluster.watch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_watches_are_paced_until_deadline() {
        let cluster = Arc::new(FakeCluster::new(vec![]));
        let start = Instant::now();

        let err = orchestrator(cluster.clone())
            .run(PROGRAM, "img", start + Duration::from_secs(10))
            .await
            .unwrap_err();

        assert!(matches!(err, JctlError::JobTimeout { .. }));
        assert!(Instant::now() - start < Duration::from_secs(11));
        assert!(cluster.watch_calls.load(Ordering::SeqCst) <= 11);
    }
}
