//! jctl runtime - build Go programs into images and run them as cluster jobs.
//!
//! This crate provides the pipeline behind the `jctl` CLI: program
//! resolution, compilation, image assembly, registry publishing, and job
//! submission with a watch loop.

#![allow(clippy::result_large_err)]

pub mod compiler;
pub mod job;
pub mod oci;
pub mod resolve;
pub mod workflow;

// Re-export common types
pub use compiler::{CompiledArtifact, Compiler, GoCompiler};
pub use job::{ClusterClient, JobOrchestrator, JobOutcome, JobRun, JobTemplate, KubeClusterClient};
pub use oci::{BaseImage, Image, ImageAssembler, ImageReference, Publisher, RegistryPuller, RegistryPusher};
pub use resolve::{CanonicalRef, GoToolchain, PackageMetadata, PathResolver};
pub use workflow::{Published, Workflow};

/// jctl runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
