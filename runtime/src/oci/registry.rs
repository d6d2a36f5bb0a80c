//! Registry client for pulling the base image and pushing assembled images.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (GCR, GHCR, Docker Hub, local registries).

use async_trait::async_trait;
use jctl_core::error::{JctlError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol, PushResponse};
use oci_distribution::manifest::ImageIndexEntry;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::Client;

use super::credentials::CredentialStore;
use super::image::{BaseImage, Image};
use super::layer::LayerBlob;
use super::reference::ImageReference;

/// Failure talking to a registry.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RegistryError {
    pub registry: String,
    pub message: String,
}

impl RegistryError {
    pub fn new(registry: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            message: message.into(),
        }
    }
}

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Anonymous access (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Credentials from `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, if both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("REGISTRY_USERNAME").ok()?;
        let password = std::env::var("REGISTRY_PASSWORD").ok()?;
        Some(Self::basic(username, password))
    }

    /// Resolve credentials for a registry host: the credential file, then
    /// the environment, then anonymous.
    pub fn resolve(registry: &str) -> Self {
        match CredentialStore::default_path().and_then(|store| store.get(registry)) {
            Ok(Some((username, password))) => return Self::basic(username, password),
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(registry, error = %e, "Credential file unusable");
            }
        }
        if let Some(auth) = Self::from_env() {
            return auth;
        }
        tracing::warn!(registry, "No credentials found, falling back to anonymous access");
        Self::anonymous()
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

fn new_client(pin_platform: bool) -> Client {
    let mut config = ClientConfig {
        protocol: ClientProtocol::Https,
        ..Default::default()
    };
    if pin_platform {
        config.platform_resolver = Some(Box::new(linux_amd64_resolver));
    }
    Client::new(config)
}

/// Pulls the base image the program is layered onto.
pub struct RegistryPuller {
    client: Client,
}

impl Default for RegistryPuller {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryPuller {
    pub fn new() -> Self {
        Self {
            client: new_client(true),
        }
    }

    /// Fetch config and layers of the base image.
    pub async fn pull_base(&self, reference: &str) -> Result<BaseImage> {
        let base_error = |message: String| JctlError::BaseImageError {
            reference: reference.to_string(),
            message,
        };
        let parsed = ImageReference::parse(reference)?;
        let oci_ref = parsed.to_oci_reference()?;
        let auth = RegistryAuth::resolve(&parsed.registry).to_oci_auth();

        tracing::info!(reference = %parsed, "Pulling base image");
        let (manifest, digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| base_error(format!("failed to pull manifest: {}", e)))?;

        let mut config_data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config_data)
            .await
            .map_err(|e| base_error(format!("failed to pull config blob: {}", e)))?;

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for descriptor in &manifest.layers {
            tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Pulling base layer");
            let mut data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(&oci_ref, descriptor, &mut data)
                .await
                .map_err(|e| base_error(format!("failed to pull layer {}: {}", descriptor.digest, e)))?;
            let layer = LayerBlob::from_compressed(data, descriptor.media_type.clone())
                .map_err(|e| base_error(format!("failed to read layer {}: {}", descriptor.digest, e)))?;
            layers.push(layer);
        }

        tracing::info!(reference = %parsed, digest = %digest, layers = layers.len(), "Base image pulled");
        BaseImage::new(reference, &config_data, layers).map_err(|e| base_error(e.to_string()))
    }
}

/// Pushes images and reports their published digest.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Upload blobs and manifest under `reference`'s tag.
    async fn push(&self, reference: &ImageReference, image: &Image) -> std::result::Result<(), RegistryError>;

    /// Content digest ("sha256:<hex>") of the manifest as stored at `reference`.
    async fn digest(&self, reference: &ImageReference, image: &Image) -> std::result::Result<String, RegistryError>;
}

/// Registry transport over `oci-distribution`.
pub struct RegistryPusher {
    client: Client,
    auth: Option<RegistryAuth>,
}

impl Default for RegistryPusher {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryPusher {
    /// Pusher resolving credentials per registry from the ambient store.
    pub fn new() -> Self {
        Self {
            client: new_client(false),
            auth: None,
        }
    }

    /// Pusher with fixed credentials.
    pub fn with_auth(auth: RegistryAuth) -> Self {
        Self {
            client: new_client(false),
            auth: Some(auth),
        }
    }

    fn auth_for(&self, registry: &str) -> OciRegistryAuth {
        match self.auth {
            Some(ref auth) => auth.to_oci_auth(),
            None => RegistryAuth::resolve(registry).to_oci_auth(),
        }
    }
}

#[async_trait]
impl RegistryTransport for RegistryPusher {
    async fn push(&self, reference: &ImageReference, image: &Image) -> std::result::Result<(), RegistryError> {
        let registry_error = |message: String| RegistryError::new(reference.registry.clone(), message);
        let oci_ref = reference
            .to_oci_reference()
            .map_err(|e| registry_error(e.to_string()))?;
        let (layers, config, manifest) = image
            .to_push_parts()
            .map_err(|e| registry_error(e.to_string()))?;
        let auth = self.auth_for(&reference.registry);

        tracing::info!(reference = %reference, layers = layers.len(), "Pushing image to registry");
        let response: PushResponse = self
            .client
            .push(&oci_ref, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| registry_error(format!("failed to push image: {}", e)))?;

        tracing::info!(
            reference = %reference,
            manifest_url = %response.manifest_url,
            "Image pushed"
        );
        Ok(())
    }

    async fn digest(&self, reference: &ImageReference, _image: &Image) -> std::result::Result<String, RegistryError> {
        let registry_error = |message: String| RegistryError::new(reference.registry.clone(), message);
        let oci_ref = reference
            .to_oci_reference()
            .map_err(|e| registry_error(e.to_string()))?;
        let auth = self.auth_for(&reference.registry);
        self.client
            .fetch_manifest_digest(&oci_ref, &auth)
            .await
            .map_err(|e| registry_error(format!("failed to fetch manifest digest: {}", e)))
    }
}

/// Selects the linux/amd64 entry of a multi-platform base image.
fn linux_amd64_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == "amd64")
        })
        .map(|entry| entry.digest.clone())
}
