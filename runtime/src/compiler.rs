//! Program compilation.

use std::path::{Path, PathBuf};
use std::process::Command;

use jctl_core::error::{JctlError, Result};
use tempfile::TempDir;

use crate::oci::image::Platform;
use crate::resolve::CanonicalRef;

/// A freshly built binary in a private temporary directory.
///
/// The directory is removed when the artifact is dropped.
#[derive(Debug)]
pub struct CompiledArtifact {
    dir: TempDir,
    path: PathBuf,
    platform: Platform,
}

impl CompiledArtifact {
    /// Take ownership of a temporary directory holding a built binary.
    pub fn new(dir: TempDir, path: PathBuf, platform: Platform) -> Self {
        Self { dir, path, platform }
    }

    /// Path to the binary.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the binary lives in.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Platform the binary was built for.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }
}

/// Builds a static executable for a target platform.
pub trait Compiler: Send + Sync {
    fn compile(&self, program: &CanonicalRef, platform: &Platform) -> Result<CompiledArtifact>;
}

/// Compiler backed by `go build`.
#[derive(Debug, Clone, Default)]
pub struct GoCompiler;

impl GoCompiler {
    pub fn new() -> Self {
        Self
    }

    /// Build environment for a platform. Variables already set by the
    /// caller are left alone.
    pub fn build_env(platform: &Platform) -> Vec<(&'static str, String)> {
        let mut env = vec![
            ("CGO_ENABLED", "0".to_string()),
            ("GOOS", platform.os.clone()),
            ("GOARCH", platform.architecture.clone()),
        ];
        if platform.architecture == "arm" {
            if let Some(ref variant) = platform.variant {
                env.push(("GOARM", variant.trim_start_matches('v').to_string()));
            }
        }
        env.into_iter()
            .filter(|(key, _)| std::env::var_os(key).is_none())
            .collect()
    }
}

impl Compiler for GoCompiler {
    fn compile(&self, program: &CanonicalRef, platform: &Platform) -> Result<CompiledArtifact> {
        let dir = tempfile::Builder::new().prefix("jctl").tempdir()?;
        let out = dir.path().join("out");

        tracing::info!(program = %program, platform = %platform, "Compiling");
        let output = Command::new("go")
            .arg("build")
            .arg("-o")
            .arg(&out)
            .arg(&program.path)
            .envs(Self::build_env(platform))
            .output()
            .map_err(|e| JctlError::CompileError {
                program: program.to_string(),
                message: format!("failed to run go build: {}", e),
            })?;

        if !output.status.success() {
            let mut message = String::from_utf8_lossy(&output.stdout).into_owned();
            message.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(JctlError::CompileError {
                program: program.to_string(),
                message: message.trim().to_string(),
            });
        }

        Ok(CompiledArtifact::new(dir, out, platform.clone()))
    }
}
