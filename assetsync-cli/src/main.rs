use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

use assetsync_core::audit;
use assetsync_core::bsdiff;
use assetsync_core::bspatch;
use assetsync_core::codec::Codec;
use assetsync_core::config::{default_data_dir, SyncConfig, CONFIG_NAME};
use assetsync_core::digest::{self, Digest, HashAlgorithm};
use assetsync_core::publish::{self, PublishOptions};
use assetsync_core::source::{DirSource, Downloader};
use assetsync_core::sync::Syncer;

#[derive(Parser)]
#[command(name = "assetsync", version, about = "Keep a local asset directory in sync with a mirror")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// Local asset directory (defaults to the user cache dir)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Bring the data directory up to date with a mirror
    Sync {
        #[arg(long)] mirror: Option<PathBuf>,
        #[arg(long)] jobs: Option<usize>,
        #[arg(long, default_value_t = false)] fail_fast: bool,
        #[arg(long, default_value_t = false)] no_patch_fallback: bool,
        /// Platform tag to accept (repeatable); `*` accepts everything
        #[arg(long = "platform")] platforms: Vec<String>,
        #[arg(long)] hash: Option<HashAlgorithm>,
        #[arg(long)] codec: Option<Codec>,
        #[arg(long, default_value_t = false)] progress: bool,
    },
    /// Report local state against the mirror manifest without downloading objects
    Audit {
        #[arg(long)] mirror: Option<PathBuf>,
        #[arg(long = "platform")] platforms: Vec<String>,
        #[arg(long)] hash: Option<HashAlgorithm>,
    },
    /// Build a mirror (objects + manifest) from a directory
    Publish {
        src: PathBuf,
        mirror: PathBuf,
        /// Previous version of `src` to generate patches from
        #[arg(long)] previous: Option<PathBuf>,
        /// Platform tags written to every entry (repeatable)
        #[arg(long)] only: Vec<String>,
        #[arg(long, default_value_t = HashAlgorithm::Sha1)] hash: HashAlgorithm,
        #[arg(long, default_value_t = Codec::Bzip2)] codec: Codec,
    },
    /// Write a BSDIFF40 patch turning OLD into NEW
    Diff { old: PathBuf, new: PathBuf, out: PathBuf },
    /// Apply a BSDIFF40 patch
    Patch {
        old: PathBuf,
        patch: PathBuf,
        out: PathBuf,
        /// Refuse to write unless the result has this digest
        #[arg(long)] expect: Option<String>,
        #[arg(long, default_value_t = HashAlgorithm::Sha1)] hash: HashAlgorithm,
    },
    /// Print the data directory
    Dir,
    /// Print the effective configuration, creating it with defaults if absent
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    match cli.cmd {
        Cmd::Sync { mirror, jobs, fail_fast, no_patch_fallback, platforms, hash, codec, progress } => {
            let mut cfg = load_config(&data_dir)?;
            if let Some(m) = mirror { cfg.mirror = Some(m); }
            if let Some(j) = jobs { cfg.jobs = j; }
            if let Some(h) = hash { cfg.hash = h; }
            if let Some(c) = codec { cfg.codec = c; }
            if fail_fast { cfg.fail_fast = true; }
            if no_patch_fallback { cfg.patch_fallback = false; }
            if !platforms.is_empty() { cfg.platform_tags = Some(platforms); }
            sync(&cfg, &data_dir, progress)?;
        }
        Cmd::Audit { mirror, platforms, hash } => {
            let mut cfg = load_config(&data_dir)?;
            if let Some(m) = mirror { cfg.mirror = Some(m); }
            if let Some(h) = hash { cfg.hash = h; }
            if !platforms.is_empty() { cfg.platform_tags = Some(platforms); }
            audit_cmd(&cfg, &data_dir)?;
        }
        Cmd::Publish { src, mirror, previous, only, hash, codec } => {
            let mut opts = PublishOptions { hash, codec, previous, ..PublishOptions::default() };
            if !only.is_empty() { opts.only = only; }
            let mf = publish::publish(&src, &mirror, &opts)?;
            let patches: usize = mf.entries.values().map(|e| e.patches.len()).sum();
            eprintln!("Published {} file(s), {} patch(es) to {}", mf.len(), patches, mirror.display());
        }
        Cmd::Diff { old, new, out } => {
            let o = fs::read(&old).with_context(|| format!("read {}", old.display()))?;
            let n = fs::read(&new).with_context(|| format!("read {}", new.display()))?;
            let patch = bsdiff::diff(&o, &n)?;
            fs::write(&out, &patch).with_context(|| format!("write {}", out.display()))?;
            eprintln!("Wrote {} byte patch to {}", patch.len(), out.display());
        }
        Cmd::Patch { old, patch, out, expect, hash } => apply_patch(&old, &patch, &out, expect, hash)?,
        Cmd::Dir => println!("{}", data_dir.display()),
        Cmd::Config => {
            let cfg = load_config(&data_dir)?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
        }
    }
    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .with_context(|| format!("bad log level {level:?}"))?;
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
    Ok(())
}

fn load_config(data_dir: &Path) -> Result<SyncConfig> {
    SyncConfig::load(&data_dir.join(CONFIG_NAME))
}

fn mirror_source(cfg: &SyncConfig) -> Result<DirSource> {
    let mirror = cfg.mirror.as_ref().ok_or_else(|| {
        anyhow!("no mirror configured; pass --mirror or set \"mirror\" in {}", CONFIG_NAME)
    })?;
    Ok(DirSource::new(mirror, cfg.hash))
}

fn sync(cfg: &SyncConfig, data_dir: &Path, progress: bool) -> Result<()> {
    let src = mirror_source(cfg)?;
    let mut opts = cfg.to_options(data_dir);
    opts.progress = progress;
    let report = Syncer::new(src, opts).run()?;

    for f in &report.files {
        match f.outcome.error() {
            Some(e) => println!("{:<10} {}: {}", f.outcome.label(), f.path, e),
            None => println!("{:<10} {}", f.outcome.label(), f.path),
        }
    }
    for r in &report.rejected {
        println!("{:<10} {}: {}", "REJECTED", r.path, r.reason);
    }
    let c = report.counts();
    eprintln!(
        "up-to-date {}, patched {}, fetched {}, failed {}, other platforms {}",
        c.up_to_date, c.patched, c.fully_fetched, c.failed, report.excluded.len()
    );
    if let Some(first) = report.first_failure() {
        bail!("{} file(s) failed; first: {}", c.failed, first.path);
    }
    Ok(())
}

fn audit_cmd(cfg: &SyncConfig, data_dir: &Path) -> Result<()> {
    let manifest = mirror_source(cfg)?.fetch_manifest()?;
    let platform = cfg.platform();
    let report = audit::audit(&manifest, data_dir, cfg.hash, platform.as_ref())?;
    for (path, status) in &report.entries {
        println!("{:<10} {}", status.to_string(), path);
    }
    for path in &report.untracked {
        println!("{:<10} {}", "UNTRACKED", path);
    }
    if report.all_current() { println!("OK"); } else { println!("NEEDS SYNC"); }
    Ok(())
}

fn apply_patch(old: &Path, patch: &Path, out: &Path, expect: Option<String>, hash: HashAlgorithm) -> Result<()> {
    let o = fs::read(old).with_context(|| format!("read {}", old.display()))?;
    let p = fs::read(patch).with_context(|| format!("read {}", patch.display()))?;
    let new = bspatch::apply_to_vec(&o, &p)?;
    if let Some(want) = expect {
        let want = Digest::from_hex(&want).with_context(|| format!("bad digest {want:?}"))?;
        let got = digest::hash_bytes(hash, &new);
        if got != want {
            bail!("patched output has {hash} {got}, expected {want}");
        }
    }
    fs::write(out, &new).with_context(|| format!("write {}", out.display()))?;
    eprintln!("Wrote {} bytes to {}", new.len(), out.display());
    Ok(())
}

