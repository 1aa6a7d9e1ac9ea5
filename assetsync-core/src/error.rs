//! Error types for the sync engine.

use crate::digest::Digest;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Point in a file's pipeline where a computed digest is compared against the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Transport bytes as received, before decompression.
    Compressed,
    /// Bytes after transport decompression.
    Decompressed,
    /// Output of the patch applier.
    Patched,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Checkpoint::Compressed => "compressed",
            Checkpoint::Decompressed => "decompressed",
            Checkpoint::Patched => "patched",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while fetching a manifest or synchronizing a file.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Manifest or object fetch failed at the transport layer. Retryable by the caller.
    #[error("transport error fetching {object}: {source}")]
    Transport {
        object: String,
        #[source]
        source: io::Error,
    },

    /// The manifest payload could not be decoded at all.
    #[error("malformed manifest: {0}")]
    ManifestFormat(String),

    /// A digest checkpoint failed.
    #[error("integrity mismatch for {path} at {checkpoint} checkpoint: expected {expected}, got {actual}")]
    IntegrityMismatch { path: String, checkpoint: Checkpoint, expected: Digest, actual: Digest },

    /// Transport decompression failed on bytes that passed the compressed checkpoint.
    #[error("failed to decode {object}: {source}")]
    Decode {
        object: String,
        #[source]
        source: io::Error,
    },

    /// Malformed patch header or control stream.
    #[error("malformed patch: {0}")]
    PatchFormat(String),

    /// Patch reads outside the bounds of the old file.
    #[error("patch reads {len} bytes at old offset {old_pos}, old file is {old_len} bytes")]
    PatchRange { old_pos: i64, len: u64, old_len: u64 },

    /// Local filesystem failure.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Path or object name that would escape its root.
    #[error("unsafe path: {0}")]
    UnsafePath(String),

    /// The sync was cancelled before this file reached a terminal state.
    #[error("cancelled")]
    Cancelled,

    /// Another sync holds the data directory lock.
    #[error("data directory is locked by another sync: {}", .0.display())]
    Locked(PathBuf),

    /// Invalid engine configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        SyncError::Io { path: path.as_ref().to_path_buf(), source }
    }

    pub fn transport(object: impl Into<String>, source: io::Error) -> Self {
        SyncError::Transport { object: object.into(), source }
    }

    /// Patch-path failures that a fallback policy may recover from with a full fetch.
    pub fn is_patch_failure(&self) -> bool {
        matches!(self, SyncError::PatchFormat(_) | SyncError::PatchRange { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }
}
