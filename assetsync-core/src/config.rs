use crate::codec::Codec;
use crate::digest::HashAlgorithm;
use crate::path_safety::PathPolicy;
use crate::platform::{AnyPlatform, PlatformFilter, PlatformTags};
use crate::sync::{default_jobs, FailurePolicy, PatchFallback, SyncOptions};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const CONFIG_NAME: &str = "assetsync.json";

/// Persistent settings, stored as JSON in the data directory.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct SyncConfig {
    /// Mirror directory holding the manifest and objects.
    pub mirror: Option<PathBuf>,
    pub jobs: usize,
    pub hash: HashAlgorithm,
    pub codec: Codec,
    pub fail_fast: bool,
    pub patch_fallback: bool,
    /// `None` selects the tags of the running OS; `["*"]` accepts every entry.
    pub platform_tags: Option<Vec<String>>,
    pub follow_symlinks: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            mirror: None,
            jobs: default_jobs(),
            hash: HashAlgorithm::default(),
            codec: Codec::default(),
            fail_fast: false,
            patch_fallback: true,
            platform_tags: None,
            follow_symlinks: false,
        }
    }
}

impl SyncConfig {
    /// Read `path`, writing the defaults there first if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let cfg = SyncConfig::default();
            cfg.save(path)?;
            return Ok(cfg);
        }
        let f = File::open(path).with_context(|| format!("open {:?}", path))?;
        serde_json::from_reader(f).with_context(|| format!("parse {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).with_context(|| format!("create dir {:?}", dir))?;
        }
        let mut f = File::create(path).with_context(|| format!("create {:?}", path))?;
        f.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
        Ok(())
    }

    pub fn platform(&self) -> Arc<dyn PlatformFilter> {
        match &self.platform_tags {
            None => Arc::new(PlatformTags::current()),
            Some(tags) if tags.iter().any(|t| t == "*") => Arc::new(AnyPlatform),
            Some(tags) => Arc::new(PlatformTags::new(tags.iter().cloned())),
        }
    }

    pub fn to_options(&self, data_dir: &Path) -> SyncOptions {
        SyncOptions {
            data_dir: data_dir.to_path_buf(),
            hash: self.hash,
            codec: self.codec,
            jobs: self.jobs.max(1),
            failure_policy: if self.fail_fast {
                FailurePolicy::FailFast
            } else {
                FailurePolicy::ReportAll
            },
            patch_fallback: if self.patch_fallback {
                PatchFallback::FullFetch
            } else {
                PatchFallback::Fail
            },
            platform: self.platform(),
            path_policy: PathPolicy { follow_symlinks: self.follow_symlinks },
            progress: false,
        }
    }
}

/// `<user cache dir>/assetsync-data`, or `./assetsync-data` when no cache dir is known.
pub fn default_data_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")).join("assetsync-data")
}
