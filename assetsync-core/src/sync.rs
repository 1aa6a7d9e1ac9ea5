//! Sync coordinator.
//!
//! One task per applicable manifest entry runs on a bounded rayon pool. Tasks share
//! nothing but the read-only manifest and the downloader; each owns exactly one
//! path. A failing task never aborts its siblings unless [`FailurePolicy::FailFast`]
//! is selected, and even then `run` returns only after every task is terminal.

use crate::cancel::CancelToken;
use crate::codec::Codec;
use crate::digest::HashAlgorithm;
use crate::error::{SyncError, SyncResult};
use crate::fetch::{Pipeline, Stage, StageHook};
use crate::manifest::{Manifest, ManifestEntry, RejectedEntry};
use crate::path_safety::{self, PathPolicy};
use crate::planner::{self, Action};
use crate::platform::{PlatformFilter, PlatformTags};
use crate::progress::Progress;
use crate::source::Downloader;
use fs2::FileExt;
use rayon::prelude::*;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lock file taken for the duration of a sync.
pub const LOCK_NAME: &str = ".assetsync.lock";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Let every task run to completion and report all failures.
    #[default]
    ReportAll,
    /// Cancel remaining tasks at their next suspension point after the first failure.
    FailFast,
}

/// What to do when a patch turns out to be malformed or out of range.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchFallback {
    /// Retry the file with a full download.
    #[default]
    FullFetch,
    /// Report the patch failure.
    Fail,
}

#[derive(Clone)]
pub struct SyncOptions {
    pub data_dir: PathBuf,
    pub hash: HashAlgorithm,
    pub codec: Codec,
    /// Worker pool size; bounds concurrent downloads and open files.
    pub jobs: usize,
    pub failure_policy: FailurePolicy,
    pub patch_fallback: PatchFallback,
    pub platform: Arc<dyn PlatformFilter>,
    pub path_policy: PathPolicy,
    pub progress: bool,
}

impl SyncOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            hash: HashAlgorithm::default(),
            codec: Codec::default(),
            jobs: default_jobs(),
            failure_policy: FailurePolicy::default(),
            patch_fallback: PatchFallback::default(),
            platform: Arc::new(PlatformTags::current()),
            path_policy: PathPolicy::default(),
            progress: false,
        }
    }
}

impl fmt::Debug for SyncOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOptions")
            .field("data_dir", &self.data_dir)
            .field("hash", &self.hash)
            .field("codec", &self.codec)
            .field("jobs", &self.jobs)
            .field("failure_policy", &self.failure_policy)
            .field("patch_fallback", &self.patch_fallback)
            .field("path_policy", &self.path_policy)
            .finish_non_exhaustive()
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8)
}

/// Terminal classification of one file.
#[derive(Debug)]
pub enum SyncOutcome {
    UpToDate,
    Patched,
    FullyFetched,
    Failed(SyncError),
}

impl SyncOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, SyncOutcome::Failed(_))
    }

    pub fn error(&self) -> Option<&SyncError> {
        match self {
            SyncOutcome::Failed(e) => Some(e),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SyncOutcome::UpToDate => "up-to-date",
            SyncOutcome::Patched => "patched",
            SyncOutcome::FullyFetched => "fetched",
            SyncOutcome::Failed(_) => "FAILED",
        }
    }
}

#[derive(Debug)]
pub struct FileReport {
    pub path: String,
    pub outcome: SyncOutcome,
    /// Position in completion order across the run.
    pub finished_seq: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub up_to_date: usize,
    pub patched: usize,
    pub fully_fetched: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct SyncReport {
    pub started_utc: String,
    pub finished_utc: String,
    /// Applicable entries, ordered by path.
    pub files: Vec<FileReport>,
    /// Entries not applicable to this platform; never probed.
    pub excluded: Vec<String>,
    /// Entries dropped while parsing the manifest.
    pub rejected: Vec<RejectedEntry>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.files.iter().all(|f| !f.outcome.is_failed())
    }

    pub fn outcome(&self, path: &str) -> Option<&SyncOutcome> {
        self.files.iter().find(|f| f.path == path).map(|f| &f.outcome)
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| f.outcome.is_failed())
    }

    /// Earliest failure to complete. Cancellations caused by another failure rank last.
    pub fn first_failure(&self) -> Option<&FileReport> {
        self.failures().min_by_key(|f| {
            let cancelled = f.outcome.error().is_some_and(SyncError::is_cancelled);
            (cancelled, f.finished_seq)
        })
    }

    pub fn counts(&self) -> OutcomeCounts {
        let mut c = OutcomeCounts::default();
        for f in &self.files {
            match f.outcome {
                SyncOutcome::UpToDate => c.up_to_date += 1,
                SyncOutcome::Patched => c.patched += 1,
                SyncOutcome::FullyFetched => c.fully_fetched += 1,
                SyncOutcome::Failed(_) => c.failed += 1,
            }
        }
        c
    }
}

pub struct Syncer<D> {
    downloader: D,
    opts: SyncOptions,
    cancel: CancelToken,
    hook: Option<StageHook>,
}

impl<D: Downloader> Syncer<D> {
    pub fn new(downloader: D, opts: SyncOptions) -> Self {
        Self { downloader, opts, cancel: CancelToken::new(), hook: None }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_stage_hook(mut self, hook: impl Fn(&str, Stage) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.opts
    }

    /// Fetch the manifest and synchronize every applicable entry.
    pub fn run(&self) -> SyncResult<SyncReport> {
        debug!("fetching manifest");
        let manifest = self.downloader.fetch_manifest()?;
        info!(entries = manifest.len(), rejected = manifest.rejected.len(), "manifest fetched");
        self.run_manifest(&manifest)
    }

    /// Synchronize against an already fetched manifest.
    pub fn run_manifest(&self, manifest: &Manifest) -> SyncResult<SyncReport> {
        let started_utc = chrono::Utc::now().to_rfc3339();
        let data_dir = &self.opts.data_dir;
        fs::create_dir_all(data_dir).map_err(|e| SyncError::io(data_dir, e))?;
        let lock_path = data_dir.join(LOCK_NAME);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| SyncError::io(&lock_path, e))?;
        lock.try_lock_exclusive().map_err(|_| SyncError::Locked(lock_path.clone()))?;

        let mut applicable: Vec<(&str, &ManifestEntry)> = Vec::new();
        let mut excluded = Vec::new();
        for (path, entry) in &manifest.entries {
            if self.opts.platform.applies(&entry.platform_tags) {
                applicable.push((path, entry));
            } else {
                debug!(path = %path, "skipping entry for another platform");
                excluded.push(path.clone());
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.opts.jobs.max(1))
            .thread_name(|i| format!("assetsync-{i}"))
            .build()
            .map_err(|e| SyncError::Config(format!("worker pool: {e}")))?;

        let progress = Progress::new(self.opts.progress);
        progress.set_files_total(applicable.len());
        progress.start();

        let run_cancel = self.cancel.child();
        let seq = AtomicUsize::new(0);
        let files: Vec<FileReport> = pool.install(|| {
            applicable
                .par_iter()
                .map(|&(rel, entry)| {
                    let outcome = self.sync_one(rel, entry, &run_cancel, &progress);
                    if let SyncOutcome::Failed(e) = &outcome {
                        if self.opts.failure_policy == FailurePolicy::FailFast && !e.is_cancelled()
                        {
                            run_cancel.cancel();
                        }
                    }
                    progress.inc_file();
                    let finished_seq = seq.fetch_add(1, Ordering::SeqCst);
                    FileReport { path: rel.to_string(), outcome, finished_seq }
                })
                .collect()
        });
        progress.stop();
        // Every task is terminal here; nothing can race the caller past this point.
        if let Err(e) = FileExt::unlock(&lock) {
            debug!(path = %lock_path.display(), error = %e, "unlock failed; released on close");
        }
        drop(lock);

        let report = SyncReport {
            started_utc,
            finished_utc: chrono::Utc::now().to_rfc3339(),
            files,
            excluded,
            rejected: manifest.rejected.clone(),
        };
        let c = report.counts();
        info!(
            up_to_date = c.up_to_date,
            patched = c.patched,
            fetched = c.fully_fetched,
            failed = c.failed,
            excluded = report.excluded.len(),
            "sync finished"
        );
        Ok(report)
    }

    fn sync_one(
        &self,
        rel: &str,
        entry: &ManifestEntry,
        cancel: &CancelToken,
        progress: &Progress,
    ) -> SyncOutcome {
        match self.try_sync_one(rel, entry, cancel, progress) {
            Ok(outcome) => {
                debug!(path = %rel, outcome = outcome.label(), "file done");
                outcome
            }
            Err(e) => {
                warn!(path = %rel, error = %e, "file failed");
                SyncOutcome::Failed(e)
            }
        }
    }

    fn try_sync_one(
        &self,
        rel: &str,
        entry: &ManifestEntry,
        cancel: &CancelToken,
        progress: &Progress,
    ) -> SyncResult<SyncOutcome> {
        let dest = path_safety::validate_path(&self.opts.data_dir, rel, self.opts.path_policy)?;
        let pipe = Pipeline {
            rel,
            dest: &dest,
            algo: self.opts.hash,
            codec: self.opts.codec,
            downloader: &self.downloader,
            cancel,
            hook: self.hook.as_ref(),
            progress,
        };
        pipe.enter(Stage::Probing)?;
        let local = planner::probe(&dest, self.opts.hash);
        match planner::plan(entry, &local) {
            Action::Skip => Ok(SyncOutcome::UpToDate),
            Action::FullFetch => {
                pipe.full_fetch(entry)?;
                Ok(SyncOutcome::FullyFetched)
            }
            Action::Patch(patch) => match pipe.patch(entry, patch) {
                Ok(()) => Ok(SyncOutcome::Patched),
                Err(e)
                    if e.is_patch_failure()
                        && self.opts.patch_fallback == PatchFallback::FullFetch =>
                {
                    warn!(path = %rel, error = %e, "patch unusable, falling back to full download");
                    pipe.full_fetch(entry)?;
                    Ok(SyncOutcome::FullyFetched)
                }
                Err(e) => Err(e),
            },
        }
    }
}
