//! Ambient registry credentials.
//!
//! Reads the Docker-compatible credential file at
//! `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
//! The store is read-only; logging in is left to other tools.

use std::collections::HashMap;
use std::path::PathBuf;

use base64::Engine;
use jctl_core::error::{JctlError, Result};
use serde::Deserialize;

/// Environment variable overriding the credential file directory.
pub const DOCKER_CONFIG_ENV: &str = "DOCKER_CONFIG";

/// One `auths` entry.
#[derive(Debug, Clone, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Credential file format.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

/// Registry credentials keyed by registry host.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store at the default location.
    pub fn default_path() -> Result<Self> {
        if let Some(dir) = std::env::var_os(DOCKER_CONFIG_ENV).filter(|d| !d.is_empty()) {
            return Ok(Self::new(PathBuf::from(dir).join("config.json")));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            JctlError::ConfigError("cannot determine home directory for credential store".to_string())
        })?;
        Ok(Self::new(home.join(".docker").join("config.json")))
    }

    /// Store at a custom path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Credentials for a registry as `(username, password)`.
    pub fn get(&self, registry: &str) -> Result<Option<(String, String)>> {
        let file = self.load()?;
        let wanted = normalize_registry(registry);
        let entry = file
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry);

        match entry {
            Some(entry) => decode_entry(entry).map(Some),
            None => Ok(None),
        }
    }

    /// Load the credential file. A missing file is an empty store.
    fn load(&self) -> Result<ConfigFile> {
        if !self.path.exists() {
            return Ok(ConfigFile::default());
        }
        let data = std::fs::read_to_string(&self.path).map_err(|e| {
            JctlError::ConfigError(format!(
                "failed to read credential file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        serde_json::from_str(&data).map_err(|e| {
            JctlError::ConfigError(format!(
                "failed to parse credential file {}: {}",
                self.path.display(),
                e
            ))
        })
    }
}

fn decode_entry(entry: &AuthEntry) -> Result<(String, String)> {
    if let (Some(user), Some(pass)) = (&entry.username, &entry.password) {
        return Ok((user.clone(), pass.clone()));
    }
    let encoded = entry
        .auth
        .as_deref()
        .ok_or_else(|| JctlError::ConfigError("credential entry has no auth".to_string()))?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| JctlError::ConfigError(format!("invalid base64 in credential entry: {}", e)))?;
    let decoded = String::from_utf8(decoded)
        .map_err(|e| JctlError::ConfigError(format!("credential entry is not UTF-8: {}", e)))?;
    let (user, pass) = decoded
        .split_once(':')
        .ok_or_else(|| JctlError::ConfigError("credential entry is not user:password".to_string()))?;
    Ok((user.to_string(), pass.to_string()))
}

/// Normalize registry names ("docker.io", "https://index.docker.io/v1/" → "index.docker.io").
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = r.split('/').next().unwrap_or_default();
    if host == "docker.io" || host == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        host.to_string()
    }
}
