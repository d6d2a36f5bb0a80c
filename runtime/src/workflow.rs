//! End-to-end workflow: resolve, assemble, publish, then run as a job.

use std::sync::Arc;

use jctl_core::error::{JctlError, Result};
use jctl_core::JctlConfig;
use tokio::time::Instant;

use crate::compiler::Compiler;
use crate::job::{ClusterClient, JobOrchestrator, JobOutcome, JobRun, JobTemplate};
use crate::oci::assemble::ImageAssembler;
use crate::oci::image::{BaseImage, Image};
use crate::oci::publish::Publisher;
use crate::oci::reference::ImageReference;
use crate::oci::registry::RegistryTransport;
use crate::resolve::{CanonicalRef, PackageMetadata, PathResolver};

/// Result of a publish.
#[derive(Debug, Clone)]
pub struct Published {
    pub program: CanonicalRef,
    /// Digest-qualified reference.
    pub reference: ImageReference,
}

/// Sequences the pipeline stages for one program.
pub struct Workflow {
    config: JctlConfig,
    resolver: Arc<PathResolver>,
    assembler: Arc<ImageAssembler>,
    publisher: Publisher,
    cluster: Option<Arc<dyn ClusterClient>>,
    quiet: bool,
}

impl Workflow {
    /// Build a workflow. The configuration is validated before anything else.
    pub fn new(
        config: JctlConfig,
        metadata: Arc<dyn PackageMetadata>,
        compiler: Arc<dyn Compiler>,
        base: BaseImage,
        transport: Arc<dyn RegistryTransport>,
    ) -> Result<Self> {
        config.validate()?;
        let publisher = Publisher::new(config.docker_repo.clone(), transport)?;
        Ok(Self {
            resolver: Arc::new(PathResolver::new(metadata)),
            assembler: Arc::new(ImageAssembler::new(base, compiler)),
            publisher,
            cluster: None,
            quiet: false,
            config,
        })
    }

    /// Cluster to submit jobs to.
    pub fn with_cluster(mut self, cluster: Arc<dyn ClusterClient>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    /// Suppress progress lines on stdout.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn progress(&self, line: &str) {
        if !self.quiet {
            println!("{}", line);
        }
    }

    /// Resolve, assemble and publish a program.
    pub async fn publish(&self, reference: &str) -> Result<Published> {
        let (program, image) = self.build(reference).await?;
        self.progress("publishing image...");
        let published = self.publisher.publish(&image, &program).await?;
        Ok(Published {
            program,
            reference: published,
        })
    }

    /// Publish a program, run it as a job and wait for it to finish.
    ///
    /// A job that ends `Failed` is reported as [`JctlError::JobFailed`].
    pub async fn run(&self, reference: &str) -> Result<JobRun> {
        let deadline = Instant::now()
            .checked_add(self.config.timeout())
            .ok_or_else(|| {
                JctlError::ConfigError(format!("timeout of {}s is too large", self.config.timeout_secs))
            })?;
        let cluster = self
            .cluster
            .clone()
            .ok_or_else(|| JctlError::ConfigError("no cluster client configured".to_string()))?;

        let published = self.publish(reference).await?;

        self.progress("creating job...");
        let orchestrator = JobOrchestrator::new(
            cluster,
            JobTemplate::from_config(&self.config),
            self.config.timeout_secs,
        );
        let program = published.program.to_string();
        let run = orchestrator
            .run(&program, &published.reference.to_string(), deadline)
            .await?;

        match run.outcome {
            JobOutcome::Complete => {
                self.progress(&format!("Job: {} finished", run.name));
                Ok(run)
            }
            JobOutcome::Failed => Err(JctlError::JobFailed {
                program,
                job: run.name,
                message: run.message.unwrap_or_else(|| "job failed".to_string()),
            }),
        }
    }

    async fn build(&self, reference: &str) -> Result<(CanonicalRef, Image)> {
        self.progress("building image...");
        let resolver = self.resolver.clone();
        let assembler = self.assembler.clone();
        let reference = reference.to_string();

        tokio::task::spawn_blocking(move || {
            let program = resolver.resolve(&reference)?;
            let image = assembler.assemble(&program)?;
            Ok((program, image))
        })
        .await
        .map_err(|e| JctlError::Other(format!("build task failed: {}", e)))?
    }
}
