use crate::error::{SyncError, SyncResult};
use std::path::{Component, Path, PathBuf};

#[derive(Clone, Copy, Debug, Default)]
pub struct PathPolicy {
    pub follow_symlinks: bool,
}

/// Reject manifest keys that are not plain relative paths.
/// Checked lexically at parse time, before anything touches the filesystem.
pub fn check_relative(rel: &str) -> SyncResult<()> {
    if rel.is_empty() {
        return Err(SyncError::UnsafePath("empty path".into()));
    }
    let p = Path::new(rel);
    if p.is_absolute() || rel.starts_with('/') || rel.starts_with('\\') {
        return Err(SyncError::UnsafePath(format!("absolute paths are not allowed: {rel:?}")));
    }
    for comp in p.components() {
        match comp {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(SyncError::UnsafePath(format!("parent traversal not allowed: {rel:?}")))
            }
        }
    }
    if rel.split(['/', '\\']).any(|c| c == "..") {
        return Err(SyncError::UnsafePath(format!("parent traversal not allowed: {rel:?}")));
    }
    Ok(())
}

/// Canonical spelling of a manifest key: `/`-separated, with empty and `.`
/// segments dropped. Two keys naming the same file normalize to the same string.
pub fn normalize(rel: &str) -> SyncResult<String> {
    check_relative(rel)?;
    let parts: Vec<&str> =
        rel.split(['/', '\\']).filter(|c| !c.is_empty() && *c != ".").collect();
    if parts.is_empty() {
        return Err(SyncError::UnsafePath(format!("path names no file: {rel:?}")));
    }
    Ok(parts.join("/"))
}

/// Remote object names are flat: no separators, no traversal.
pub fn check_object_name(name: &str) -> SyncResult<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(SyncError::UnsafePath(format!("bad object name: {name:?}")));
    }
    Ok(())
}

/// Ensure `rel` is safe relative to `root`: no absolute, no `..`, and
/// if `follow_symlinks` then the canonicalized parent must stay under root; otherwise
/// any symlink along the way is rejected.
pub fn validate_path(root: &Path, rel: &str, policy: PathPolicy) -> SyncResult<PathBuf> {
    check_relative(rel)?;
    let rel = Path::new(rel);
    let candidate = root.join(rel);
    if !policy.follow_symlinks {
        // Also check any ancestor components are not symlinks
        let mut cur = root.to_path_buf();
        for comp in rel.components() {
            cur = cur.join(comp);
            if let Ok(m) = std::fs::symlink_metadata(&cur) {
                if m.file_type().is_symlink() {
                    return Err(SyncError::UnsafePath(format!(
                        "symlink in path (not following): {}",
                        cur.display()
                    )));
                }
            }
        }
        Ok(candidate)
    } else {
        // The file itself may not exist yet; containment is decided on its parent.
        let root_can = std::fs::canonicalize(root).map_err(|e| SyncError::io(root, e))?;
        let parent = candidate.parent().unwrap_or(root);
        let parent_can = match std::fs::canonicalize(parent) {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(candidate),
            Err(e) => return Err(SyncError::io(parent, e)),
        };
        if !parent_can.starts_with(&root_can) {
            return Err(SyncError::UnsafePath(format!("path escapes root: {}", rel.display())));
        }
        if let Ok(target) = std::fs::canonicalize(&candidate) {
            if !target.starts_with(&root_can) {
                return Err(SyncError::UnsafePath(format!(
                    "path escapes root: {}",
                    rel.display()
                )));
            }
        }
        Ok(candidate)
    }
}
