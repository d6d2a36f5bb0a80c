use thiserror::Error;

/// jctl error types
#[derive(Error, Debug)]
pub enum JctlError {
    /// A local reference expanded to zero or several packages
    #[error("Resolution error: {reference} - found {count} packages, expected exactly 1")]
    AmbiguousTarget { reference: String, count: usize },

    /// The reference could not be located at all
    #[error("Resolution error: {reference} - target not found: {message}")]
    TargetNotFound { reference: String, message: String },

    /// The reference builds to a library, not an executable
    #[error("Resolution error: {reference} - not an executable program (package {package})")]
    NotExecutable { reference: String, package: String },

    /// External compiler exited unsuccessfully
    #[error("Compile error: {program} - {message}")]
    CompileError { program: String, message: String },

    /// The base image could not be fetched or read
    #[error("Base image error: {reference} - {message}")]
    BaseImageError { reference: String, message: String },

    /// Archive or I/O failure while building a layer
    #[error("Packaging error: {program} - {message}")]
    PackagingError { program: String, message: String },

    /// Image configuration rewrite failed
    #[error("Config mutation error: {program} - {message}")]
    ConfigMutationError { program: String, message: String },

    /// Registry configuration, auth, or transport failure
    #[error("Publish error: {program} - {registry}: {message}")]
    PublishError {
        program: String,
        registry: String,
        message: String,
    },

    /// The control plane rejected the job
    #[error("Job create error: {program} - namespace {namespace}: {message}")]
    JobCreateError {
        program: String,
        namespace: String,
        message: String,
    },

    /// Deadline passed before the job reached a terminal condition
    #[error("Job timeout: {program} - job {job} did not finish within {timeout_secs}s")]
    JobTimeout {
        program: String,
        job: String,
        timeout_secs: u64,
    },

    /// The watch stream broke before a terminal condition or the deadline
    #[error("Watch stream error: {program} - job {job}: {message}")]
    WatchStreamError {
        program: String,
        job: String,
        message: String,
    },

    /// The job ran to completion with a `Failed` condition
    #[error("Job failed: {program} - job {job}: {message}")]
    JobFailed {
        program: String,
        job: String,
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for JctlError {
    fn from(err: serde_json::Error) -> Self {
        JctlError::SerializationError(err.to_string())
    }
}

/// Result type alias for jctl operations
pub type Result<T> = std::result::Result<T, JctlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_target_display() {
        let error = JctlError::AmbiguousTarget {
            reference: "./...".to_string(),
            count: 2,
        };
        assert_eq!(
            error.to_string(),
            "Resolution error: ./... - found 2 packages, expected exactly 1"
        );
    }

    #[test]
    fn test_not_executable_display() {
        let error = JctlError::NotExecutable {
            reference: "github.com/x/lib".to_string(),
            package: "lib".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Resolution error: github.com/x/lib - not an executable program (package lib)"
        );
    }

    #[test]
    fn test_compile_error_display() {
        let error = JctlError::CompileError {
            program: "github.com/x/hello".to_string(),
            message: "undefined: foo".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Compile error: github.com/x/hello - undefined: foo"
        );
    }

    #[test]
    fn test_publish_error_display() {
        let error = JctlError::PublishError {
            program: "github.com/x/hello".to_string(),
            registry: "gcr.io".to_string(),
            message: "unauthorized".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Publish error: github.com/x/hello - gcr.io: unauthorized"
        );
    }

    #[test]
    fn test_job_timeout_display() {
        let error = JctlError::JobTimeout {
            program: "github.com/x/hello".to_string(),
            job: "jctl-job-x7k2p".to_string(),
            timeout_secs: 300,
        };
        assert_eq!(
            error.to_string(),
            "Job timeout: github.com/x/hello - job jctl-job-x7k2p did not finish within 300s"
        );
    }

    #[test]
    fn test_job_failed_display() {
        let error = JctlError::JobFailed {
            program: "github.com/x/hello".to_string(),
            job: "jctl-job-x7k2p".to_string(),
            message: "BackoffLimitExceeded".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Job failed: github.com/x/hello - job jctl-job-x7k2p: BackoffLimitExceeded"
        );
    }

    #[test]
    fn test_base_image_error_display() {
        let error = JctlError::BaseImageError {
            reference: "gcr.io/distroless/static:latest".to_string(),
            message: "manifest unknown".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Base image error: gcr.io/distroless/static:latest - manifest unknown"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: JctlError = io_error.into();
        assert!(matches!(error, JctlError::IoError(_)));
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let error: JctlError = result.unwrap_err().into();
        assert!(matches!(error, JctlError::SerializationError(_)));
    }

    #[test]
    fn test_config_error_display() {
        let error = JctlError::ConfigError("JCTL_DOCKER_REPO is required".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: JCTL_DOCKER_REPO is required"
        );
    }
}
