//! Program reference resolution.
//!
//! Turns a user-supplied reference (`.`, `./cmd/x`, `github.com/x/hello`)
//! into exactly one canonical, executable Go package.

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use jctl_core::error::{JctlError, Result};
use serde::Deserialize;

/// One package as reported by the package metadata source.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PackageInfo {
    #[serde(rename = "ImportPath")]
    pub import_path: String,

    /// Package name; `main` for executables.
    #[serde(rename = "Name", default)]
    pub name: String,

    /// Source directory on disk.
    #[serde(rename = "Dir", default)]
    pub dir: PathBuf,

    /// Lookup error reported for this package, if any.
    #[serde(rename = "Error", default, deserialize_with = "deserialize_package_error")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct PackageError {
    #[serde(rename = "Err", default)]
    err: String,
}

fn deserialize_package_error<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let error: Option<PackageError> = Option::deserialize(deserializer)?;
    Ok(error.map(|e| e.err))
}

/// Package metadata source.
pub trait PackageMetadata: Send + Sync {
    /// List the packages matching a pattern.
    fn list(&self, pattern: &str) -> Result<Vec<PackageInfo>>;
}

/// Package metadata from `go list -e -json`.
#[derive(Debug, Clone, Default)]
pub struct GoToolchain {
    work_dir: Option<PathBuf>,
}

impl GoToolchain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `go` in a specific directory instead of the current one.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }
}

impl PackageMetadata for GoToolchain {
    fn list(&self, pattern: &str) -> Result<Vec<PackageInfo>> {
        let mut cmd = Command::new("go");
        cmd.args(["list", "-e", "-json", pattern]);
        if let Some(ref dir) = self.work_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| JctlError::TargetNotFound {
            reference: pattern.to_string(),
            message: format!("failed to run go list: {}", e),
        })?;
        if !output.status.success() {
            return Err(JctlError::TargetNotFound {
                reference: pattern.to_string(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        tracing::debug!(pattern, "Listed packages");
        parse_package_list(&output.stdout)
    }
}

/// Parse the concatenated JSON objects printed by `go list -json`.
pub fn parse_package_list(data: &[u8]) -> Result<Vec<PackageInfo>> {
    serde_json::Deserializer::from_slice(data)
        .into_iter::<PackageInfo>()
        .map(|p| p.map_err(JctlError::from))
        .collect()
}

/// A resolved, fully qualified, executable program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRef {
    /// Fully qualified import path.
    pub path: String,
    /// Package source directory.
    pub dir: PathBuf,
}

impl std::fmt::Display for CanonicalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// True when the reference is relative to the working directory.
pub fn is_local_reference(reference: &str) -> bool {
    reference.starts_with('.')
}

/// Resolves program references against a metadata source.
pub struct PathResolver {
    metadata: Arc<dyn PackageMetadata>,
}

impl PathResolver {
    pub fn new(metadata: Arc<dyn PackageMetadata>) -> Self {
        Self { metadata }
    }

    /// Resolve a reference to exactly one executable package.
    pub fn resolve(&self, reference: &str) -> Result<CanonicalRef> {
        let mut packages = self.metadata.list(reference)?;

        if is_local_reference(reference) && packages.len() != 1 {
            return Err(JctlError::AmbiguousTarget {
                reference: reference.to_string(),
                count: packages.len(),
            });
        }

        let package = match packages.len() {
            1 => packages.remove(0),
            0 => {
                return Err(JctlError::TargetNotFound {
                    reference: reference.to_string(),
                    message: "no matching package".to_string(),
                })
            }
            count => {
                return Err(JctlError::AmbiguousTarget {
                    reference: reference.to_string(),
                    count,
                })
            }
        };

        if let Some(message) = package.error {
            return Err(JctlError::TargetNotFound {
                reference: reference.to_string(),
                message,
            });
        }
        if package.name.is_empty() {
            return Err(JctlError::TargetNotFound {
                reference: reference.to_string(),
                message: "package has no Go files".to_string(),
            });
        }
        if package.name != "main" {
            return Err(JctlError::NotExecutable {
                reference: reference.to_string(),
                package: package.name,
            });
        }

        tracing::info!(reference, path = %package.import_path, "Resolved program");
        Ok(CanonicalRef {
            path: package.import_path,
            dir: package.dir,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Metadata source backed by a fixed pattern table.
    #[derive(Default)]
    pub(crate) struct FakeMetadata {
        pub(crate) packages: HashMap<String, Vec<PackageInfo>>,
    }

    impl FakeMetadata {
        pub(crate) fn with(mut self, pattern: &str, packages: Vec<PackageInfo>) -> Self {
            self.packages.insert(pattern.to_string(), packages);
            self
        }
    }

    impl PackageMetadata for FakeMetadata {
        fn list(&self, pattern: &str) -> Result<Vec<PackageInfo>> {
            Ok(self.packages.get(pattern).cloned().unwrap_or_default())
        }
    }

    pub(crate) fn package(import_path: &str, name: &str) -> PackageInfo {
        PackageInfo {
            import_path: import_path.to_string(),
            name: name.to_string(),
            dir: PathBuf::from("/src").join(import_path),
            error: None,
        }
    }

    fn resolver(metadata: FakeMetadata) -> PathResolver {
        PathResolver::new(Arc::new(metadata))
    }

    #[test]
    fn test_is_local_reference() {
        assert!(is_local_reference("."));
        assert!(is_local_reference(".."));
        assert!(is_local_reference("./cmd/hello"));
        assert!(is_local_reference("../hello"));
        assert!(!is_local_reference("github.com/x/hello"));
        assert!(!is_local_reference("/abs/path"));
    }

    #[test]
    fn test_resolve_dot_single_package() {
        let r = resolver(FakeMetadata::default().with(".", vec![package("github.com/x/hello", "main")]));
        let resolved = r.resolve(".").unwrap();
        assert_eq!(resolved.path, "github.com/x/hello");
        assert_eq!(resolved.to_string(), "github.com/x/hello");
        assert_eq!(resolved.dir, PathBuf::from("/src/github.com/x/hello"));
    }

    #[test]
    fn test_resolve_dot_no_packages_is_ambiguous() {
        let r = resolver(FakeMetadata::default());
        let err = r.resolve(".").unwrap_err();
        assert!(matches!(err, JctlError::AmbiguousTarget { count: 0, .. }));
    }

    #[test]
    fn test_resolve_dot_two_packages_is_ambiguous() {
        let r = resolver(FakeMetadata::default().with(
            "./...",
            vec![package("github.com/x/a", "main"), package("github.com/x/b", "main")],
        ));
        let err = r.resolve("./...").unwrap_err();
        assert!(matches!(err, JctlError::AmbiguousTarget { count: 2, .. }));
        assert!(err.to_string().starts_with("Resolution error: ./..."));
    }

    #[test]
    fn test_resolve_library_is_not_executable() {
        let r = resolver(FakeMetadata::default().with("github.com/x/lib", vec![package("github.com/x/lib", "lib")]));
        let err = r.resolve("github.com/x/lib").unwrap_err();
        match err {
            JctlError::NotExecutable { package, .. } => assert_eq!(package, "lib"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_lookup_error_is_not_found() {
        let mut missing = package("github.com/x/missing", "");
        missing.error = Some("cannot find module providing package".to_string());
        let r = resolver(FakeMetadata::default().with("github.com/x/missing", vec![missing]));
        let err = r.resolve("github.com/x/missing").unwrap_err();
        assert!(matches!(err, JctlError::TargetNotFound { .. }));
        assert!(err.to_string().contains("cannot find module"));
    }

    #[test]
    fn test_resolve_qualified_without_match() {
        let r = resolver(FakeMetadata::default());
        let err = r.resolve("github.com/x/nothing").unwrap_err();
        assert!(matches!(err, JctlError::TargetNotFound { .. }));
    }

    #[test]
    fn test_parse_package_list_concatenated() {
        let out = br#"{
    "Dir": "/home/me/hello",
    "ImportPath": "github.com/x/hello",
    "Name": "main"
}
{
    "ImportPath": "github.com/x/missing",
    "Error": {
        "Err": "package github.com/x/missing is not in std"
    }
}
"#;
        let packages = parse_package_list(out).unwrap();
        assert_eq!(packages.len(), 2);
        assert_eq!(packages[0].name, "main");
        assert_eq!(packages[0].dir, PathBuf::from("/home/me/hello"));
        assert!(packages[0].error.is_none());
        assert_eq!(packages[1].name, "");
        assert!(packages[1].error.as_deref().unwrap().contains("not in std"));
    }

    #[test]
    fn test_parse_package_list_empty() {
        assert!(parse_package_list(b"").unwrap().is_empty());
    }
}
