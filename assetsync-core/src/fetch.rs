//! Per-file pipeline stages.
//!
//! Each stage is a named step with its own failure mode:
//!
//! ```text
//! Probing -> Downloading -> VerifyingCompressed -> Decompressing -> VerifyingDecompressed
//!         -> [Patching -> VerifyingPatched] -> Writing
//! ```
//!
//! Compressed bytes are spooled to a temp file and checked before the decompressor
//! sees them. Output is written to a temp file next to the destination and renamed
//! over it only after the final checkpoint passes, so a tracked path only ever holds
//! its old contents or fully verified new contents.

use crate::bspatch;
use crate::cancel::CancelToken;
use crate::codec::Codec;
use crate::digest::{self, Digest, HashAlgorithm, HashingReader, HashingWriter};
use crate::error::{Checkpoint, SyncError, SyncResult};
use crate::manifest::{ManifestEntry, PatchEntry};
use crate::progress::Progress;
use crate::source::Downloader;
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::debug;

/// Prefix of every temp file the engine creates inside the data directory.
pub const TEMP_PREFIX: &str = ".assetsync-";

const COPY_BUF: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Probing,
    Downloading,
    VerifyingCompressed,
    Decompressing,
    VerifyingDecompressed,
    Patching,
    VerifyingPatched,
    Writing,
}

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Probing,
        Stage::Downloading,
        Stage::VerifyingCompressed,
        Stage::Decompressing,
        Stage::VerifyingDecompressed,
        Stage::Patching,
        Stage::VerifyingPatched,
        Stage::Writing,
    ];
}

/// Observer called with `(relative path, stage)` on every stage transition.
pub type StageHook = Arc<dyn Fn(&str, Stage) + Send + Sync>;

/// Everything one file task needs. Borrowed from the coordinator for one pass.
pub(crate) struct Pipeline<'a> {
    pub rel: &'a str,
    pub dest: &'a Path,
    pub algo: HashAlgorithm,
    pub codec: Codec,
    pub downloader: &'a dyn Downloader,
    pub cancel: &'a CancelToken,
    pub hook: Option<&'a StageHook>,
    pub progress: &'a Progress,
}

impl Pipeline<'_> {
    /// Record a stage transition; every transition is a cancellation point.
    pub fn enter(&self, stage: Stage) -> SyncResult<()> {
        debug!(path = %self.rel, ?stage, "stage");
        if let Some(hook) = self.hook {
            hook(self.rel, stage);
        }
        self.cancel.check()
    }

    pub fn full_fetch(&self, entry: &ManifestEntry) -> SyncResult<()> {
        self.enter(Stage::Downloading)?;
        let (spool, compressed) = self.download(&entry.source_location)?;

        self.enter(Stage::VerifyingCompressed)?;
        digest::check(self.rel, Checkpoint::Compressed, &entry.compressed_hash, compressed)?;

        self.enter(Stage::Decompressing)?;
        let out = BufWriter::new(self.temp()?);
        let (out, content) = self.decompress(&entry.source_location, spool, out)?;
        let out = out.into_inner().map_err(|e| SyncError::io(self.dest, e.into_error()))?;

        self.enter(Stage::VerifyingDecompressed)?;
        digest::check(self.rel, Checkpoint::Decompressed, &entry.target_hash, content)?;

        self.enter(Stage::Writing)?;
        self.commit(out)
    }

    pub fn patch(&self, entry: &ManifestEntry, patch: &PatchEntry) -> SyncResult<()> {
        self.enter(Stage::Downloading)?;
        let (spool, compressed) = self.download(&patch.remote_name)?;

        self.enter(Stage::VerifyingCompressed)?;
        digest::check(self.rel, Checkpoint::Compressed, &patch.compressed_patch_hash, compressed)?;

        self.enter(Stage::Decompressing)?;
        let (patch_bytes, decompressed) = self.decompress(&patch.remote_name, spool, Vec::new())?;

        self.enter(Stage::VerifyingDecompressed)?;
        digest::check(self.rel, Checkpoint::Decompressed, &patch.patch_hash, decompressed)?;

        self.enter(Stage::Patching)?;
        let old = File::open(self.dest).map_err(|e| SyncError::io(self.dest, e))?;
        let old_len = old.metadata().map_err(|e| SyncError::io(self.dest, e))?.len();
        let map = if old_len == 0 {
            None
        } else {
            // The task owns this path for the whole pass; nothing else writes it.
            Some(unsafe { Mmap::map(&old) }.map_err(|e| SyncError::io(self.dest, e))?)
        };
        let old_bytes: &[u8] = map.as_deref().unwrap_or(&[]);
        let mut out = HashingWriter::new(self.algo, BufWriter::new(self.temp()?));
        bspatch::apply(old_bytes, &patch_bytes, &mut out)?;
        let (out, patched) = out.finalize();
        let out = out.into_inner().map_err(|e| SyncError::io(self.dest, e.into_error()))?;
        drop(map);

        self.enter(Stage::VerifyingPatched)?;
        digest::check(self.rel, Checkpoint::Patched, &entry.target_hash, patched)?;

        self.enter(Stage::Writing)?;
        self.commit(out)
    }

    /// Pull `object` into a spool file, hashing the transport bytes on the way.
    fn download(&self, object: &str) -> SyncResult<(NamedTempFile, Digest)> {
        let stream = self.downloader.download(object)?;
        let mut src = HashingReader::new(self.algo, stream);
        let mut spool = BufWriter::new(self.temp()?);
        self.pump(&mut src, &mut spool, |e| SyncError::transport(object, e), true)?;
        let spool = spool.into_inner().map_err(|e| SyncError::io(self.dest, e.into_error()))?;
        let (_, compressed) = src.finalize();
        debug!(path = %self.rel, object, %compressed, "downloaded");
        Ok((spool, compressed))
    }

    /// Decode a verified spool into `out`, hashing the decoded bytes.
    fn decompress<W: Write>(
        &self,
        object: &str,
        mut spool: NamedTempFile,
        out: W,
    ) -> SyncResult<(W, Digest)> {
        spool.rewind().map_err(|e| SyncError::io(spool.path(), e))?;
        let mut dec = self
            .codec
            .decoder(BufReader::new(&mut spool))
            .map_err(|e| SyncError::Decode { object: object.to_string(), source: e })?;
        let mut out = HashingWriter::new(self.algo, out);
        self.pump(
            &mut dec,
            &mut out,
            |e| SyncError::Decode { object: object.to_string(), source: e },
            false,
        )?;
        Ok(out.finalize())
    }

    fn pump<R: Read, W: Write>(
        &self,
        src: &mut R,
        dst: &mut W,
        read_err: impl Fn(io::Error) -> SyncError,
        fetched: bool,
    ) -> SyncResult<u64> {
        let mut buf = vec![0u8; COPY_BUF];
        let mut total = 0u64;
        loop {
            self.cancel.check()?;
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_err(e)),
            };
            dst.write_all(&buf[..n]).map_err(|e| SyncError::io(self.dest, e))?;
            total += n as u64;
            if fetched {
                self.progress.add_bytes(n as u64);
            }
        }
        dst.flush().map_err(|e| SyncError::io(self.dest, e))?;
        Ok(total)
    }

    fn temp(&self) -> SyncResult<NamedTempFile> {
        let dir = self.dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|e| SyncError::io(dir, e))?;
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".part")
            .tempfile_in(dir)
            .map_err(|e| SyncError::io(dir, e))
    }

    /// Atomically replace the destination with a fully verified temp file.
    fn commit(&self, tmp: NamedTempFile) -> SyncResult<()> {
        let perms = match fs::metadata(self.dest) {
            Ok(m) => Some(m.permissions()),
            Err(_) => default_permissions(),
        };
        if let Some(perms) = perms {
            tmp.as_file().set_permissions(perms).map_err(|e| SyncError::io(tmp.path(), e))?;
        }
        tmp.as_file().sync_all().map_err(|e| SyncError::io(tmp.path(), e))?;
        tmp.persist(self.dest).map_err(|e| SyncError::io(self.dest, e.error))?;
        debug!(path = %self.rel, "committed");
        Ok(())
    }
}

#[cfg(unix)]
fn default_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn default_permissions() -> Option<fs::Permissions> {
    None
}
