//! In-memory OCI image model.
//!
//! An [`Image`] is a base image's configuration and layers plus the layers
//! appended on top of it. The configuration is kept as raw JSON so that
//! fields this crate does not know about survive a rewrite untouched.

use chrono::{DateTime, SecondsFormat, Utc};
use oci_distribution::client::{Config, ImageLayer};
use oci_distribution::manifest::OciImageManifest;
use oci_spec::image::ImageConfiguration;
use serde_json::{json, Map, Value};

use super::layer::{sha256_bytes, LayerBlob};

/// Media type of the image configuration blob.
pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";

/// Errors raised while reading or rewriting an image configuration.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("invalid image config: {0}")]
    InvalidConfig(String),

    #[error("config has {diff_ids} diff ids but image has {layers} layers")]
    LayerMismatch { diff_ids: usize, layers: usize },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Target platform of an image (and of the binary built for it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(ref variant) = self.variant {
            write!(f, "/{}", variant)?;
        }
        Ok(())
    }
}

/// Provenance recorded in the config history for an appended layer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LayerHistory {
    pub author: String,
    pub created_by: String,
    pub comment: String,
}

/// A pre-existing image the program is layered onto. Read-only.
#[derive(Debug, Clone)]
pub struct BaseImage {
    reference: String,
    config: Value,
    platform: Platform,
    layers: Vec<LayerBlob>,
}

impl BaseImage {
    /// Create a base image from its raw config blob and its layers.
    pub fn new(
        reference: impl Into<String>,
        config_data: &[u8],
        layers: Vec<LayerBlob>,
    ) -> Result<Self, ImageError> {
        let parsed: ImageConfiguration = serde_json::from_slice(config_data)
            .map_err(|e| ImageError::InvalidConfig(e.to_string()))?;
        let platform = Platform {
            os: enum_str(serde_json::to_value(parsed.os())?),
            architecture: enum_str(serde_json::to_value(parsed.architecture())?),
            variant: parsed.variant().clone(),
        };

        let config: Value = serde_json::from_slice(config_data)?;
        let diff_ids = config
            .pointer("/rootfs/diff_ids")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if diff_ids != layers.len() {
            return Err(ImageError::LayerMismatch {
                diff_ids,
                layers: layers.len(),
            });
        }

        Ok(Self {
            reference: reference.into(),
            config,
            platform,
            layers,
        })
    }

    /// Reference the base image was resolved from.
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// OS/architecture the base image runs on.
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Base layers, bottom to top.
    pub fn layers(&self) -> &[LayerBlob] {
        &self.layers
    }
}

fn enum_str(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

/// A base image plus appended layers and a rewritten configuration.
#[derive(Debug, Clone)]
pub struct Image {
    config: Value,
    layers: Vec<LayerBlob>,
}

impl Image {
    /// Start an image from a base image. No layers are appended yet.
    pub fn from_base(base: &BaseImage) -> Self {
        Self {
            config: base.config.clone(),
            layers: base.layers.clone(),
        }
    }

    /// Append a layer on top, recording its diff id and history entry.
    pub fn append(&mut self, layer: LayerBlob, history: LayerHistory) -> Result<(), ImageError> {
        let root = as_object(&mut self.config)?;

        let rootfs = root
            .entry("rootfs")
            .or_insert_with(|| json!({"type": "layers", "diff_ids": []}));
        let diff_ids = rootfs
            .as_object_mut()
            .ok_or_else(|| ImageError::InvalidConfig("rootfs is not an object".to_string()))?
            .entry("diff_ids")
            .or_insert_with(|| json!([]))
            .as_array_mut()
            .ok_or_else(|| ImageError::InvalidConfig("rootfs.diff_ids is not an array".to_string()))?;
        diff_ids.push(Value::String(layer.prefixed_diff_id()));

        let entries = root
            .entry("history")
            .or_insert_with(|| json!([]))
            .as_array_mut()
            .ok_or_else(|| ImageError::InvalidConfig("history is not an array".to_string()))?;
        entries.push(json!({
            "author": history.author,
            "created_by": history.created_by,
            "comment": history.comment,
        }));

        self.layers.push(layer);
        Ok(())
    }

    /// A deep copy of the current configuration.
    pub fn config_file(&self) -> Value {
        self.config.clone()
    }

    /// Replace the configuration.
    ///
    /// The new configuration must still describe exactly this image's layers.
    pub fn set_config_file(&mut self, config: Value) -> Result<(), ImageError> {
        if !config.is_object() {
            return Err(ImageError::InvalidConfig("config is not an object".to_string()));
        }
        let diff_ids = config
            .pointer("/rootfs/diff_ids")
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);
        if diff_ids != self.layers.len() {
            return Err(ImageError::LayerMismatch {
                diff_ids,
                layers: self.layers.len(),
            });
        }
        self.config = config;
        Ok(())
    }

    /// Stamp the image creation time.
    pub fn set_created_at(&mut self, created: DateTime<Utc>) -> Result<(), ImageError> {
        let root = as_object(&mut self.config)?;
        root.insert(
            "created".to_string(),
            Value::String(created.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        Ok(())
    }

    /// All layers, bottom to top.
    pub fn layers(&self) -> &[LayerBlob] {
        &self.layers
    }

    /// Configured entrypoint, if any.
    pub fn entrypoint(&self) -> Option<Vec<String>> {
        string_list(self.config.pointer("/config/Entrypoint"))
    }

    /// Configured environment (`KEY=value` entries).
    pub fn env(&self) -> Vec<String> {
        string_list(self.config.pointer("/config/Env")).unwrap_or_default()
    }

    /// Image author.
    pub fn author(&self) -> Option<&str> {
        self.config.get("author").and_then(Value::as_str)
    }

    /// Image creation time as written in the config.
    pub fn created(&self) -> Option<&str> {
        self.config.get("created").and_then(Value::as_str)
    }

    /// History entries, oldest first.
    pub fn history(&self) -> Vec<LayerHistory> {
        let field = |entry: &Value, key: &str| {
            entry
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        self.config
            .get("history")
            .and_then(Value::as_array)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| LayerHistory {
                        author: field(e, "author"),
                        created_by: field(e, "created_by"),
                        comment: field(e, "comment"),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Serialized configuration blob.
    pub fn config_bytes(&self) -> Result<Vec<u8>, ImageError> {
        Ok(serde_json::to_vec(&self.config)?)
    }

    /// Layers, config and manifest in the form the registry client pushes.
    pub fn to_push_parts(&self) -> Result<(Vec<ImageLayer>, Config, OciImageManifest), ImageError> {
        let layers: Vec<ImageLayer> = self
            .layers
            .iter()
            .map(|l| ImageLayer::new(l.data.clone(), l.media_type.clone(), None))
            .collect();
        let config = Config::new(self.config_bytes()?, CONFIG_MEDIA_TYPE.to_string(), None);
        let manifest = OciImageManifest::build(&layers, &config, None);
        Ok((layers, config, manifest))
    }

    /// Local content digest of the image manifest ("sha256:<hex>").
    pub fn digest(&self) -> Result<String, ImageError> {
        let (_, _, manifest) = self.to_push_parts()?;
        let bytes = serde_json::to_vec(&manifest)?;
        Ok(format!("sha256:{}", sha256_bytes(&bytes)))
    }
}

fn as_object(config: &mut Value) -> Result<&mut Map<String, Value>, ImageError> {
    config
        .as_object_mut()
        .ok_or_else(|| ImageError::InvalidConfig("config is not an object".to_string()))
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    value.and_then(Value::as_array).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    })
}
