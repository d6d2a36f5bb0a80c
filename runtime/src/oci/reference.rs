//! Image reference parsing.
//!
//! Parses references like `gcr.io/my-project/hello-<hash>:latest` into
//! structured components.

use jctl_core::error::{JctlError, Result};

/// Registry used when none is given.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Tag used when neither tag nor digest is given.
pub const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port if any (e.g. "gcr.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g. "my-project/hello-0a1b...")
    pub repository: String,
    pub tag: Option<String>,
    /// Content digest ("sha256:<hex>")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// - `busybox` → docker.io/library/busybox:latest
    /// - `gcr.io/distroless/static` → gcr.io/distroless/static:latest
    /// - `localhost:5000/hello:v1` → localhost:5000/hello:v1
    /// - `gcr.io/p/hello@sha256:abc…` → digest only, no tag
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(JctlError::ConfigError("empty image reference".to_string()));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name, digest)) => {
                if !digest.contains(':') {
                    return Err(JctlError::ConfigError(format!(
                        "invalid digest in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        let (registry, repository) = split_registry(name, reference)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(Self {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Reference for `name` inside a destination repository prefix.
    ///
    /// `gcr.io/my-project` + `hello` → `gcr.io/my-project/hello:<tag>`
    pub fn in_repository(prefix: &str, name: &str, tag: &str) -> Result<Self> {
        let prefix = prefix.trim().trim_end_matches('/');
        if prefix.is_empty() {
            return Err(JctlError::ConfigError("empty repository prefix".to_string()));
        }
        Self::parse(&format!("{}/{}:{}", prefix, name, tag))
    }

    /// The same repository, pinned to a digest.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            digest: Some(digest.into()),
            ..self.clone()
        }
    }

    /// Full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }

    /// Registry client form of this reference.
    pub fn to_oci_reference(&self) -> Result<oci_distribution::Reference> {
        let mut s = format!("{}/{}", self.registry, self.repository);
        match (&self.tag, &self.digest) {
            (_, Some(digest)) => {
                s.push('@');
                s.push_str(digest);
            }
            (Some(tag), None) => {
                s.push(':');
                s.push_str(tag);
            }
            (None, None) => {
                s.push(':');
                s.push_str(DEFAULT_TAG);
            }
        }
        s.parse::<oci_distribution::Reference>()
            .map_err(|e| JctlError::ConfigError(format!("invalid image reference '{}': {}", s, e)))
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_reference())
    }
}

/// Split `name[:tag]`. A colon before the last slash, or one followed only
/// by digits with no slash at all, belongs to a registry port.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_segment_start = name_tag.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name_tag[last_segment_start..].rfind(':') {
        Some(colon) => {
            let colon = last_segment_start + colon;
            let tag = &name_tag[colon + 1..];
            if last_segment_start == 0 && tag.chars().all(|c| c.is_ascii_digit()) {
                (name_tag, None)
            } else {
                (&name_tag[..colon], Some(tag))
            }
        }
        None => (name_tag, None),
    }
}

fn split_registry(name: &str, reference: &str) -> Result<(String, String)> {
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(JctlError::ConfigError(format!(
                    "empty repository in reference '{}'",
                    reference
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
        return Ok((DEFAULT_REGISTRY.to_string(), name.to_string()));
    }
    Ok((DEFAULT_REGISTRY.to_string(), format!("library/{}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("busybox").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/busybox");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_default_base_image() {
        let r = ImageReference::parse("gcr.io/distroless/static:latest").unwrap();
        assert_eq!(r.registry, "gcr.io");
        assert_eq!(r.repository, "distroless/static");
        assert_eq!(r.tag.as_deref(), Some("latest"));
    }

    #[test]
    fn test_parse_registry_port() {
        let r = ImageReference::parse("localhost:5000/hello:v1").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "hello");
        assert_eq!(r.tag.as_deref(), Some("v1"));
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse("gcr.io/p/hello@sha256:abcd").unwrap();
        assert_eq!(r.repository, "p/hello");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some("sha256:abcd"));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse("gcr.io/p/hello:latest@sha256:abcd").unwrap();
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert_eq!(r.digest.as_deref(), Some("sha256:abcd"));
        assert_eq!(r.to_string(), "gcr.io/p/hello:latest@sha256:abcd");
    }

    #[test]
    fn test_parse_user_repo_on_docker_hub() {
        let r = ImageReference::parse("someone/tool:1.0").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "someone/tool");
    }

    #[test]
    fn test_parse_errors() {
        assert!(ImageReference::parse("").is_err());
        assert!(ImageReference::parse("   ").is_err());
        assert!(ImageReference::parse("gcr.io/p/hello@abcd").is_err());
        assert!(ImageReference::parse("gcr.io/").is_err());
    }

    #[test]
    fn test_in_repository() {
        let r = ImageReference::in_repository("gcr.io/my-project/", "hello-00ff", "latest").unwrap();
        assert_eq!(r.registry, "gcr.io");
        assert_eq!(r.repository, "my-project/hello-00ff");
        assert_eq!(r.tag.as_deref(), Some("latest"));
        assert!(ImageReference::in_repository("  ", "hello", "latest").is_err());
    }

    #[test]
    fn test_with_digest() {
        let r = ImageReference::parse("gcr.io/p/hello:latest").unwrap();
        let pinned = r.with_digest("sha256:1234");
        assert_eq!(pinned.to_string(), "gcr.io/p/hello:latest@sha256:1234");
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_to_oci_reference() {
        let r = ImageReference::parse("localhost:5000/hello:v1").unwrap();
        let oci = r.to_oci_reference().unwrap();
        assert_eq!(oci.registry(), "localhost:5000");
        assert_eq!(oci.repository(), "hello");
        assert_eq!(oci.tag(), Some("v1"));
    }

    #[test]
    fn test_to_oci_reference_prefers_digest() {
        let digest = format!("sha256:{}", "ab".repeat(32));
        let r = ImageReference::parse("gcr.io/p/hello:latest").unwrap().with_digest(digest.clone());
        let oci = r.to_oci_reference().unwrap();
        assert_eq!(oci.digest(), Some(digest.as_str()));
    }
}
