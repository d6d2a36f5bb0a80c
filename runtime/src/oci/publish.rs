//! Publishing assembled images under a deterministic name.

use std::sync::Arc;

use jctl_core::error::{JctlError, Result};
use md5::{Digest, Md5};

use super::image::Image;
use super::reference::{ImageReference, DEFAULT_TAG};
use super::registry::{RegistryError, RegistryTransport};
use crate::resolve::CanonicalRef;

/// Repository-local name for a program path.
///
/// Lower-cased basename, a dash, then the hex MD5 of the full path.
/// Programs sharing a basename get distinct names.
pub fn repository_name(program_path: &str) -> String {
    let base = program_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    let hash = Md5::digest(program_path.as_bytes());
    format!("{}-{}", base, hex::encode(hash))
}

/// Pushes images to a destination repository.
pub struct Publisher {
    repository: String,
    transport: Arc<dyn RegistryTransport>,
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("repository", &self.repository)
            .finish()
    }
}

impl Publisher {
    /// Publisher for a destination like `gcr.io/my-project`.
    ///
    /// Fails with a configuration error when the destination is empty.
    pub fn new(repository: impl Into<String>, transport: Arc<dyn RegistryTransport>) -> Result<Self> {
        let repository = repository.into().trim().trim_end_matches('/').to_string();
        if repository.is_empty() {
            return Err(JctlError::ConfigError(format!(
                "registry destination is empty, set {}",
                jctl_core::config::DOCKER_REPO_ENV
            )));
        }
        Ok(Self { repository, transport })
    }

    /// Tagged reference a program is published under.
    pub fn tag_reference(&self, program: &CanonicalRef) -> Result<ImageReference> {
        ImageReference::in_repository(&self.repository, &repository_name(&program.path), DEFAULT_TAG)
    }

    /// Push the image and return its digest-qualified reference.
    pub async fn publish(&self, image: &Image, program: &CanonicalRef) -> Result<ImageReference> {
        let tagged = self.tag_reference(program)?;
        let publish_error = |e: RegistryError| JctlError::PublishError {
            program: program.to_string(),
            registry: e.registry,
            message: e.message,
        };

        tracing::info!(program = %program, reference = %tagged, "Publishing image");
        self.transport.push(&tagged, image).await.map_err(publish_error)?;
        let digest = self.transport.digest(&tagged, image).await.map_err(publish_error)?;

        let published = tagged.with_digest(digest);
        tracing::info!(program = %program, reference = %published, "Published image");
        Ok(published)
    }
}
