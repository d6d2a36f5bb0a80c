//! Image assembly: compile a program and layer it onto a base image.
//!
//! Two layers are appended, in order:
//!
//! 1. the data layer, `<package dir>/jctldata` placed at [`DATA_ROOT`]
//! 2. the binary layer, the compiled program at `/jctl-app/<name>`
//!
//! The config entrypoint then points at the binary and [`DATA_PATH_ENV`]
//! points at the data root.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jctl_core::error::{JctlError, Result};
use serde_json::{json, Value};

use super::image::{BaseImage, Image, LayerHistory};
use super::layer::{build_layer, build_single_file_layer};
use crate::compiler::Compiler;
use crate::resolve::CanonicalRef;

/// Directory the binary is placed in.
pub const APP_DIR: &str = "/jctl-app";

/// Binary file name when the program path has no usable basename.
pub const DEFAULT_APP_FILENAME: &str = "jctl-app";

/// In-image root of the data layer.
pub const DATA_ROOT: &str = "/var/app/jctl";

/// Environment variable pointing at [`DATA_ROOT`].
pub const DATA_PATH_ENV: &str = "JCTL_DATA_PATH";

/// Data directory name, beside the program's sources.
pub const DATA_DIR_NAME: &str = "jctldata";

/// Author recorded on the image and its layers.
pub const AUTHOR: &str = "github.com/toshi0607/jctl";

/// Compiles programs and layers them onto a base image.
pub struct ImageAssembler {
    base: BaseImage,
    compiler: Arc<dyn Compiler>,
    creation_time: Option<DateTime<Utc>>,
}

impl ImageAssembler {
    pub fn new(base: BaseImage, compiler: Arc<dyn Compiler>) -> Self {
        Self {
            base,
            compiler,
            creation_time: None,
        }
    }

    /// Stamp every assembled image with a fixed creation time.
    pub fn with_creation_time(mut self, created: DateTime<Utc>) -> Self {
        self.creation_time = Some(created);
        self
    }

    /// Build the image for a resolved program.
    pub fn assemble(&self, program: &CanonicalRef) -> Result<Image> {
        let platform = self.base.platform();
        let artifact = self.compiler.compile(program, platform)?;

        let packaging = |e: std::io::Error| JctlError::PackagingError {
            program: program.to_string(),
            message: e.to_string(),
        };
        let data_layer = build_layer(&program.dir.join(DATA_DIR_NAME), DATA_ROOT).map_err(packaging)?;
        let app_path = app_path(&program.path);
        let binary_layer = build_single_file_layer(artifact.path(), &app_path).map_err(packaging)?;
        drop(artifact);

        let mutation = |e: super::image::ImageError| JctlError::ConfigMutationError {
            program: program.to_string(),
            message: e.to_string(),
        };
        let created_by = format!("jctl {}", program.path);
        let mut image = Image::from_base(&self.base);
        image
            .append(
                data_layer,
                LayerHistory {
                    author: AUTHOR.to_string(),
                    created_by: created_by.clone(),
                    comment: format!("jctl contents, at ${}", DATA_PATH_ENV),
                },
            )
            .map_err(mutation)?;
        image
            .append(
                binary_layer,
                LayerHistory {
                    author: AUTHOR.to_string(),
                    created_by,
                    comment: format!("go build output, at {}", app_path),
                },
            )
            .map_err(mutation)?;

        let mut config = image.config_file();
        rewrite_config(&mut config, &app_path).map_err(|message| JctlError::ConfigMutationError {
            program: program.to_string(),
            message,
        })?;
        image.set_config_file(config).map_err(mutation)?;

        if let Some(created) = self.creation_time {
            image.set_created_at(created).map_err(mutation)?;
        }

        tracing::info!(
            program = %program,
            layers = image.layers().len(),
            entrypoint = %app_path,
            "Assembled image"
        );
        Ok(image)
    }
}

/// In-image path of the binary for a program path.
pub fn app_path(program_path: &str) -> String {
    let name = program_path.rsplit('/').next().unwrap_or_default();
    let name = if name.is_empty() || name == "." || name == ".." {
        DEFAULT_APP_FILENAME
    } else {
        name
    };
    format!("{}/{}", APP_DIR, name)
}

fn rewrite_config(config: &mut Value, app_path: &str) -> std::result::Result<(), String> {
    let root = config
        .as_object_mut()
        .ok_or_else(|| "config is not an object".to_string())?;
    root.insert("author".to_string(), Value::String(AUTHOR.to_string()));

    let runtime = root
        .entry("config")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| "config.config is not an object".to_string())?;
    runtime.insert("Entrypoint".to_string(), json!([app_path]));

    let env = runtime.entry("Env").or_insert_with(|| json!([]));
    if env.is_null() {
        *env = json!([]);
    }
    env.as_array_mut()
        .ok_or_else(|| "config.Env is not an array".to_string())?
        .push(Value::String(format!("{}={}", DATA_PATH_ENV, DATA_ROOT)));
    Ok(())
}
