use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::error::{JctlError, Result};

/// Environment variable naming the destination repository.
pub const DOCKER_REPO_ENV: &str = "JCTL_DOCKER_REPO";

/// Environment variable naming a kubeconfig file.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Default base image for assembled programs.
pub const DEFAULT_BASE_IMAGE: &str = "gcr.io/distroless/static:latest";

/// Default job watch timeout: five minutes.
pub const DEFAULT_TIMEOUT_SECS: u64 = 5 * 60;

/// jctl configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JctlConfig {
    /// Registry destination (e.g. "gcr.io/my-project")
    pub docker_repo: String,

    /// Namespace the job is created in
    pub namespace: String,

    /// Explicit kubeconfig path; inferred when unset
    pub kubeconfig: Option<PathBuf>,

    /// Job watch timeout in seconds
    pub timeout_secs: u64,

    /// Base image the program is layered onto
    pub base_image: String,

    /// Image-pull secret attached to the job's pod
    pub image_pull_secret: String,

    /// Prefix for the server-generated job name
    pub job_name_prefix: String,
}

impl Default for JctlConfig {
    fn default() -> Self {
        Self {
            docker_repo: String::new(),
            namespace: "default".to_string(),
            kubeconfig: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            base_image: DEFAULT_BASE_IMAGE.to_string(),
            image_pull_secret: "image-puller".to_string(),
            job_name_prefix: "jctl-job".to_string(),
        }
    }
}

impl JctlConfig {
    /// Build a configuration from defaults plus `JCTL_DOCKER_REPO` and `KUBECONFIG`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(repo) = std::env::var(DOCKER_REPO_ENV) {
            config.docker_repo = repo.trim().to_string();
        }
        if let Some(path) = std::env::var_os(KUBECONFIG_ENV).filter(|p| !p.is_empty()) {
            config.kubeconfig = Some(PathBuf::from(path));
        }
        config
    }

    /// Reject configurations that cannot possibly publish.
    pub fn validate(&self) -> Result<()> {
        if self.docker_repo.trim().is_empty() {
            return Err(JctlError::ConfigError(format!(
                "{} environment variable is required",
                DOCKER_REPO_ENV
            )));
        }
        if self.namespace.trim().is_empty() {
            return Err(JctlError::ConfigError("namespace must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(JctlError::ConfigError("timeout must be greater than zero".to_string()));
        }
        if Instant::now().checked_add(self.timeout()).is_none() {
            return Err(JctlError::ConfigError(format!(
                "timeout of {}s is too large",
                self.timeout_secs
            )));
        }
        Ok(())
    }

    /// Job watch timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
