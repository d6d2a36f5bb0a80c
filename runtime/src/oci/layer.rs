//! Deterministic layer creation.
//!
//! Layers are gzip-compressed tarballs built fully in memory. Every header
//! uses a fixed mode, zero owner ids and a zero mtime, so identical inputs
//! produce byte-identical archives regardless of machine, umask or clock.
//!
//! Entry names are relative to the image root (`/jctl-app/hello` is stored
//! as `jctl-app/hello`).

use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

/// Permission bits for every entry: read + execute for all.
pub const MODE_READ_EXEC: u32 = 0o555;

/// Media type of the layers produced here.
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// A compressed layer blob and its content identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerBlob {
    /// Compressed tar bytes
    pub data: Vec<u8>,
    /// Media type of `data`
    pub media_type: String,
    /// SHA256 of the compressed bytes (hex, without "sha256:" prefix)
    pub digest: String,
    /// SHA256 of the uncompressed tar (hex, without "sha256:" prefix)
    pub diff_id: String,
}

impl LayerBlob {
    /// Wrap already-compressed bytes, computing digest and diff id.
    pub fn from_compressed(data: Vec<u8>, media_type: impl Into<String>) -> io::Result<Self> {
        let digest = sha256_bytes(&data);
        let diff_id = compute_diff_id(&data)?;
        Ok(Self {
            data,
            media_type: media_type.into(),
            digest,
            diff_id,
        })
    }

    /// Get the digest with "sha256:" prefix.
    pub fn prefixed_digest(&self) -> String {
        format!("sha256:{}", self.digest)
    }

    /// Get the diff id with "sha256:" prefix.
    pub fn prefixed_diff_id(&self) -> String {
        format!("sha256:{}", self.diff_id)
    }

    /// Compressed size in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Build a layer holding the contents of `source_root` under `dest_root`.
///
/// One directory entry is written for `dest_root` itself, then one regular
/// file entry per file found below `source_root`. Plain subdirectories get no
/// entry of their own. Symlinks are chased: a link to a file is stored as that
/// file's content, a link to a directory gets a directory entry and its
/// contents. There is no cycle detection, a symlink pointing at one of its
/// own ancestors will not terminate.
///
/// A missing `source_root` yields a layer with only the root directory entry.
pub fn build_layer(source_root: &Path, dest_root: &str) -> io::Result<LayerBlob> {
    let dest_root = archive_path(dest_root);
    let mut builder = new_builder();

    append_dir_header(&mut builder, &dest_root)?;
    match std::fs::metadata(source_root) {
        Ok(meta) if meta.is_dir() => append_tree(&mut builder, source_root, &dest_root)?,
        Ok(_) => {
            tracing::debug!(source = %source_root.display(), "Layer source is not a directory, skipping contents");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(source = %source_root.display(), "Layer source does not exist, writing empty root");
        }
        Err(e) => return Err(with_path(e, source_root)),
    }

    finish_layer(builder)
}

/// Build a layer holding a single file at `dest_path`.
///
/// Ancestor directories of `dest_path` are written first, shallowest to
/// deepest.
pub fn build_single_file_layer(source_file: &Path, dest_path: &str) -> io::Result<LayerBlob> {
    let dest_path = archive_path(dest_path);
    let mut builder = new_builder();

    if let Some(parent) = dest_path.parent() {
        append_ancestor_dirs(&mut builder, parent)?;
    }
    append_file(&mut builder, source_file, &dest_path)?;

    finish_layer(builder)
}

type LayerBuilder = tar::Builder<GzEncoder<Vec<u8>>>;

fn new_builder() -> LayerBuilder {
    let encoder = GzEncoder::new(Vec::new(), Compression::fast());
    tar::Builder::new(encoder)
}

/// Close the tar stream, then the gzip stream, and wrap the bytes.
///
/// On early returns the builder is dropped instead, which finishes both
/// writers and discards the buffer.
fn finish_layer(builder: LayerBuilder) -> io::Result<LayerBlob> {
    let encoder = builder.into_inner()?;
    let data = encoder.finish()?;
    LayerBlob::from_compressed(data, LAYER_MEDIA_TYPE)
}

/// Directory entries for `dir` and each of its ancestors, root first.
fn append_ancestor_dirs(builder: &mut LayerBuilder, dir: &Path) -> io::Result<()> {
    let mut ancestors: Vec<&Path> = dir
        .ancestors()
        .filter(|p| !p.as_os_str().is_empty())
        .collect();
    ancestors.reverse();
    for ancestor in ancestors {
        append_dir_header(builder, ancestor)?;
    }
    Ok(())
}

fn append_dir_header(builder: &mut LayerBuilder, name: &Path) -> io::Result<()> {
    let mut header = fixed_header(tar::EntryType::Directory, 0);
    builder.append_data(&mut header, name, io::empty())
}

fn append_file(builder: &mut LayerBuilder, source: &Path, name: &Path) -> io::Result<()> {
    let file = File::open(source).map_err(|e| with_path(e, source))?;
    let size = file.metadata().map_err(|e| with_path(e, source))?.len();
    let mut header = fixed_header(tar::EntryType::Regular, size);
    builder
        .append_data(&mut header, name, file.take(size))
        .map_err(|e| with_path(e, source))
}

/// Depth-first, name-ordered walk with an explicit stack.
fn append_tree(builder: &mut LayerBuilder, source_root: &Path, dest_root: &Path) -> io::Result<()> {
    let mut stack: Vec<(PathBuf, PathBuf)> = Vec::new();
    push_children(&mut stack, source_root, dest_root)?;

    while let Some((source, dest)) = stack.pop() {
        let link_meta = std::fs::symlink_metadata(&source).map_err(|e| with_path(e, &source))?;
        if link_meta.is_dir() {
            push_children(&mut stack, &source, &dest)?;
            continue;
        }

        let real = std::fs::canonicalize(&source).map_err(|e| with_path(e, &source))?;
        let meta = std::fs::metadata(&real).map_err(|e| with_path(e, &real))?;
        if meta.is_dir() {
            append_dir_header(builder, &dest)?;
            push_children(&mut stack, &real, &dest)?;
        } else if meta.is_file() {
            append_file(builder, &real, &dest)?;
        } else {
            tracing::warn!(path = %source.display(), "Skipping non-regular file");
        }
    }

    Ok(())
}

/// Push the entries of `dir` so that they pop in ascending name order.
fn push_children(stack: &mut Vec<(PathBuf, PathBuf)>, dir: &Path, dest: &Path) -> io::Result<()> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| with_path(e, dir))? {
        let entry = entry.map_err(|e| with_path(e, dir))?;
        names.push(entry.file_name());
    }
    names.sort();

    for name in names.into_iter().rev() {
        stack.push((dir.join(&name), dest.join(&name)));
    }
    Ok(())
}

fn fixed_header(entry_type: tar::EntryType, size: u64) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_size(size);
    header.set_mode(MODE_READ_EXEC);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
}

/// Convert an in-image path into an archive entry name.
pub fn archive_path(path: &str) -> PathBuf {
    Path::new(path)
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

fn with_path(err: io::Error, path: &Path) -> io::Error {
    io::Error::new(err.kind(), format!("{}: {}", path.display(), err))
}

/// Compute SHA256 digest of raw bytes.
pub fn sha256_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the diff_id (SHA256 of uncompressed layer content).
fn compute_diff_id(compressed: &[u8]) -> io::Result<String> {
    let mut decoder = flate2::read::GzDecoder::new(compressed);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
