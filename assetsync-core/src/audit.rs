use crate::config::CONFIG_NAME;
use crate::digest::HashAlgorithm;
use crate::fetch::TEMP_PREFIX;
use crate::manifest::Manifest;
use crate::path_safety::{self, PathPolicy};
use crate::planner::{self, Action, LocalState};
use crate::platform::PlatformFilter;
use crate::sync::LOCK_NAME;
use anyhow::Result;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalStatus {
    UpToDate,
    /// A known patch applies to the current contents.
    Patchable,
    /// Present but needs a full download.
    Stale,
    Missing,
    Unreadable(String),
}

impl fmt::Display for LocalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalStatus::UpToDate => f.write_str("OK"),
            LocalStatus::Patchable => f.write_str("PATCHABLE"),
            LocalStatus::Stale => f.write_str("STALE"),
            LocalStatus::Missing => f.write_str("MISSING"),
            LocalStatus::Unreadable(e) => write!(f, "UNREADABLE ({e})"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditReport {
    pub entries: Vec<(String, LocalStatus)>,
    /// Files under the root that the manifest does not track.
    pub untracked: Vec<String>,
}

impl AuditReport {
    pub fn all_current(&self) -> bool {
        self.entries.iter().all(|(_, s)| *s == LocalStatus::UpToDate)
    }
}

/// Classify every applicable entry against `root` without touching the network.
pub fn audit(
    manifest: &Manifest,
    root: &Path,
    algo: HashAlgorithm,
    platform: &dyn PlatformFilter,
) -> Result<AuditReport> {
    let mut entries = Vec::new();
    for (rel, entry) in &manifest.entries {
        if !platform.applies(&entry.platform_tags) {
            continue;
        }
        let path = match path_safety::validate_path(root, rel, PathPolicy::default()) {
            Ok(p) => p,
            Err(e) => {
                entries.push((rel.clone(), LocalStatus::Unreadable(e.to_string())));
                continue;
            }
        };
        let local = planner::probe(&path, algo);
        let status = match (&local, planner::plan(entry, &local)) {
            (LocalState::Missing, _) => LocalStatus::Missing,
            (LocalState::Unreadable(e), _) => LocalStatus::Unreadable(e.clone()),
            (_, Action::Skip) => LocalStatus::UpToDate,
            (_, Action::Patch(_)) => LocalStatus::Patchable,
            (_, Action::FullFetch) => LocalStatus::Stale,
        };
        entries.push((rel.clone(), status));
    }

    let tracked: HashSet<&str> = manifest.entries.keys().map(String::as_str).collect();
    let mut untracked = Vec::new();
    if root.exists() {
        for ent in WalkDir::new(root).min_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !ent.file_type().is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy();
            if name.starts_with(TEMP_PREFIX) || name == LOCK_NAME || name == CONFIG_NAME {
                continue;
            }
            let rel = pathdiff::diff_paths(ent.path(), root)
                .unwrap_or_else(|| ent.path().to_path_buf());
            let rel = rel.to_string_lossy().replace('\\', "/");
            if !tracked.contains(rel.as_str()) {
                untracked.push(rel);
            }
        }
    }
    untracked.sort();
    Ok(AuditReport { entries, untracked })
}
