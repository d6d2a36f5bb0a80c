//! OCI image support for jctl.
//!
//! Builds program images on top of a base image and publishes them:
//!
//! - Deterministic tar+gzip layers from a directory tree or a single file
//! - An in-memory image model with config rewriting
//! - Assembly of the data and binary layers onto the base image
//! - Registry pull (base image) and push (program image)
//!
//! # Image layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ binary layer   /jctl-app/<name>              │  ← Entrypoint
//! ├──────────────────────────────────────────────┤
//! │ data layer     /var/app/jctl/...             │  ← $JCTL_DATA_PATH
//! ├──────────────────────────────────────────────┤
//! │ base image layers (gcr.io/distroless/static) │
//! └──────────────────────────────────────────────┘
//! ```

pub mod assemble;
pub mod credentials;
pub mod image;
pub mod layer;
pub mod publish;
pub mod reference;
pub mod registry;

pub use assemble::ImageAssembler;
pub use credentials::CredentialStore;
pub use image::{BaseImage, Image, ImageError, LayerHistory, Platform};
pub use layer::{build_layer, build_single_file_layer, LayerBlob};
pub use publish::{repository_name, Publisher};
pub use reference::ImageReference;
pub use registry::{RegistryAuth, RegistryError, RegistryPuller, RegistryPusher, RegistryTransport};
