use crate::config::CONFIG_NAME;
use crate::digest::{Digest, HashAlgorithm};
use crate::error::{SyncError, SyncResult};
use crate::fetch::TEMP_PREFIX;
use crate::path_safety;
use crate::sync::LOCK_NAME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// File name of the manifest inside a mirror.
pub const MANIFEST_NAME: &str = "patchmanifest.txt";

/// One binary patch from a known prior state to the entry's target content.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PatchEntry {
    /// Remote object holding the transport-compressed patch.
    #[serde(rename = "filename")]
    pub remote_name: String,
    /// Digest of the decompressed patch bytes.
    #[serde(rename = "patchHash")]
    pub patch_hash: Digest,
    /// Digest of the compressed patch bytes.
    #[serde(rename = "compPatchHash")]
    pub compressed_patch_hash: Digest,
}

/// One tracked file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Remote object holding the full, transport-compressed content.
    #[serde(rename = "dl")]
    pub source_location: String,
    /// Platforms this entry applies to. Empty means none.
    #[serde(rename = "only", default)]
    pub platform_tags: Vec<String>,
    #[serde(rename = "hash")]
    pub target_hash: Digest,
    #[serde(rename = "compHash")]
    pub compressed_hash: Digest,
    /// Patches keyed by the digest of the file state they apply from.
    #[serde(default)]
    pub patches: BTreeMap<Digest, PatchEntry>,
}

impl ManifestEntry {
    pub fn patch_from(&self, origin: &Digest) -> Option<&PatchEntry> {
        self.patches.get(origin)
    }
}

/// An entry dropped while parsing, with the reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedEntry {
    pub path: String,
    pub reason: String,
}

/// Decoded remote manifest. Read-only once fetched.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    pub entries: BTreeMap<String, ManifestEntry>,
    pub rejected: Vec<RejectedEntry>,
}

impl Manifest {
    /// Decode a manifest payload.
    ///
    /// The payload is untrusted. A payload that is not a JSON object fails with
    /// [`SyncError::ManifestFormat`]; individual entries that do not decode or do not
    /// validate are skipped, logged and recorded in [`Manifest::rejected`].
    ///
    /// Keys are stored in canonical form (see [`path_safety::normalize`]). When two
    /// keys name the same file, a key already in canonical form wins and the other
    /// spelling is rejected.
    pub fn parse(bytes: &[u8], algo: HashAlgorithm) -> SyncResult<Manifest> {
        let raw: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(bytes)
            .map_err(|e| SyncError::ManifestFormat(e.to_string()))?;
        let mut mf = Manifest::default();
        let mut keyed = Vec::with_capacity(raw.len());
        for (path, value) in raw {
            match canonical_key(&path) {
                Ok(key) => keyed.push((key, path, value)),
                Err(reason) => mf.reject(path, reason),
            }
        }
        // Exact spellings first so an alias never displaces them.
        keyed.sort_by_key(|(key, path, _)| key != path);
        for (key, path, value) in keyed {
            if mf.entries.contains_key(&key) {
                mf.reject(path, format!("names the same file as {key:?}"));
                continue;
            }
            match decode_entry(&path, value, algo) {
                Ok(entry) => {
                    mf.entries.insert(key, entry);
                }
                Err(reason) => mf.reject(path, reason),
            }
        }
        Ok(mf)
    }

    fn reject(&mut self, path: String, reason: String) {
        warn!(path = %path, %reason, "skipping malformed manifest entry");
        self.rejected.push(RejectedEntry { path, reason });
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }

    pub fn get(&self, path: &str) -> Option<&ManifestEntry> {
        self.entries.get(path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Normalize a key and refuse names the engine keeps for itself in the data dir.
fn canonical_key(path: &str) -> Result<String, String> {
    let key = path_safety::normalize(path).map_err(|e| e.to_string())?;
    if key == LOCK_NAME || key == CONFIG_NAME {
        return Err(format!("{key:?} is reserved"));
    }
    if key.split('/').any(|c| c.starts_with(TEMP_PREFIX)) {
        return Err(format!("names starting with {TEMP_PREFIX:?} are reserved"));
    }
    Ok(key)
}

fn decode_entry(
    path: &str,
    value: serde_json::Value,
    algo: HashAlgorithm,
) -> Result<ManifestEntry, String> {
    let mut entry: ManifestEntry = serde_json::from_value(value).map_err(|e| e.to_string())?;
    path_safety::check_object_name(&entry.source_location).map_err(|e| e.to_string())?;
    let want = algo.output_len();
    for (what, d) in [("hash", &entry.target_hash), ("compHash", &entry.compressed_hash)] {
        if d.len() != want {
            return Err(format!("{what} is {} bytes, {algo} digests are {want}", d.len()));
        }
    }
    if entry.patches.remove(&entry.target_hash).is_some() {
        warn!(path = %path, "dropping patch keyed by the entry's own target hash");
    }
    let mut bad = Vec::new();
    for (origin, p) in &entry.patches {
        let ok = origin.len() == want
            && p.patch_hash.len() == want
            && p.compressed_patch_hash.len() == want
            && path_safety::check_object_name(&p.remote_name).is_ok();
        if !ok {
            bad.push(origin.clone());
        }
    }
    for origin in bad {
        warn!(path = %path, origin = %origin, "dropping malformed patch");
        entry.patches.remove(&origin);
    }
    Ok(entry)
}
