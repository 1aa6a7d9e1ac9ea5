//! Mirror builder: the producer side of a sync.
//!
//! Every regular file under the source directory becomes one transport-compressed
//! object named by its content digest. When a previous version of the tree is given,
//! files whose contents changed also get a BSDIFF40 patch object from the old state.

use crate::bsdiff;
use crate::codec::Codec;
use crate::digest::{self, Digest, HashAlgorithm};
use crate::manifest::{Manifest, ManifestEntry, PatchEntry, MANIFEST_NAME};
use crate::platform::tags_for_os;
use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct PublishOptions {
    pub hash: HashAlgorithm,
    pub codec: Codec,
    /// Tags written to every entry's `only` list.
    pub only: Vec<String>,
    /// Earlier version of the source tree to generate patches from.
    pub previous: Option<PathBuf>,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            hash: HashAlgorithm::default(),
            codec: Codec::default(),
            only: tags_for_os(std::env::consts::OS).iter().map(|s| s.to_string()).collect(),
            previous: None,
        }
    }
}

/// Write objects for every file under `src` into `mirror`, then the manifest.
pub fn publish(src: &Path, mirror: &Path, opts: &PublishOptions) -> Result<Manifest> {
    fs::create_dir_all(mirror).with_context(|| format!("create dir {:?}", mirror))?;
    let files = list_files(src)?;
    info!(files = files.len(), src = %src.display(), "publishing");

    let entries: Vec<(String, ManifestEntry)> = files
        .par_iter()
        .map(|rel| publish_one(src, mirror, rel, opts).map(|e| (rel.clone(), e)))
        .collect::<Result<_>>()?;

    let manifest = Manifest { entries: entries.into_iter().collect(), rejected: Vec::new() };
    let json = manifest.to_json_pretty()?;
    write_atomic(mirror, MANIFEST_NAME, json.as_bytes())?;
    info!(entries = manifest.len(), mirror = %mirror.display(), "manifest written");
    Ok(manifest)
}

fn publish_one(src: &Path, mirror: &Path, rel: &str, opts: &PublishOptions) -> Result<ManifestEntry> {
    let path = src.join(rel);
    let data = fs::read(&path).with_context(|| format!("read {:?}", path))?;
    let target_hash = digest::hash_bytes(opts.hash, &data);
    let (source_location, compressed_hash) =
        write_object(mirror, &format!("{}.{}", target_hash, opts.codec.extension()), &data, opts)?;

    let mut patches = BTreeMap::new();
    if let Some(prev_root) = &opts.previous {
        let prev = prev_root.join(rel);
        if prev.is_file() {
            let old = fs::read(&prev).with_context(|| format!("read {:?}", prev))?;
            let origin = digest::hash_bytes(opts.hash, &old);
            if origin != target_hash {
                let patch = bsdiff::diff(&old, &data).with_context(|| format!("diff {rel}"))?;
                let patch_hash = digest::hash_bytes(opts.hash, &patch);
                let name = format!("{}-{}.patch.{}", origin, target_hash, opts.codec.extension());
                let (remote_name, compressed_patch_hash) =
                    write_object(mirror, &name, &patch, opts)?;
                debug!(path = %rel, from = %origin, bytes = patch.len(), "patch generated");
                patches.insert(
                    origin,
                    PatchEntry { remote_name, patch_hash, compressed_patch_hash },
                );
            }
        }
    }

    Ok(ManifestEntry {
        source_location,
        platform_tags: opts.only.clone(),
        target_hash,
        compressed_hash,
        patches,
    })
}

/// Compress `data` into the object `name`, returning the name and compressed digest.
fn write_object(
    mirror: &Path,
    name: &str,
    data: &[u8],
    opts: &PublishOptions,
) -> Result<(String, Digest)> {
    let compressed = opts.codec.encode_all(data).with_context(|| format!("compress {name}"))?;
    let compressed_hash = digest::hash_bytes(opts.hash, &compressed);
    write_atomic(mirror, name, &compressed)?;
    Ok((name.to_string(), compressed_hash))
}

// Identical content maps to the same object name, so concurrent writers may race on
// one name; each rename installs complete bytes.
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".publish-")
        .tempfile_in(dir)
        .with_context(|| format!("create temp file in {:?}", dir))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    let dest = dir.join(name);
    tmp.persist(&dest).with_context(|| format!("persist {:?}", dest))?;
    Ok(())
}

/// Regular files under `root` as sorted `/`-separated relative paths.
fn list_files(root: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for ent in walkdir::WalkDir::new(root).min_depth(1) {
        let ent = ent?;
        if !ent.file_type().is_file() {
            continue;
        }
        let rel = pathdiff::diff_paths(ent.path(), root)
            .with_context(|| format!("relativize {:?}", ent.path()))?;
        out.push(rel.to_string_lossy().replace('\\', "/"));
    }
    out.sort();
    Ok(out)
}
