#![allow(dead_code)]

use assetsync_core::codec::Codec;
use assetsync_core::digest::HashAlgorithm;
use assetsync_core::error::{SyncError, SyncResult};
use assetsync_core::manifest::{Manifest, MANIFEST_NAME};
use assetsync_core::platform::AnyPlatform;
use assetsync_core::publish::{self, PublishOptions};
use assetsync_core::source::{DirSource, Downloader, ObjectStream};
use assetsync_core::sync::SyncOptions;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashSet;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

/// `base` with a few scattered edits and a short tail, so patches stay small.
pub fn mutate(base: &[u8], seed: u64) -> Vec<u8> {
    let mut out = base.to_vec();
    let mut rng = fastrand::Rng::with_seed(seed);
    for _ in 0..8 {
        if out.is_empty() {
            break;
        }
        let i = rng.usize(..out.len());
        out[i] = out[i].wrapping_add(1);
    }
    out.extend_from_slice(b"-tail");
    out
}

pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, data) in files {
        let p = root.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, data).unwrap();
    }
}

/// Scratch layout: `v1/` and `v2/` source trees, `mirror/`, and the `data/` dir.
pub struct Fixture {
    pub td: TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let td = tempfile::tempdir().unwrap();
        for d in ["v1", "v2", "mirror", "data"] {
            std::fs::create_dir_all(td.path().join(d)).unwrap();
        }
        Self { td }
    }

    pub fn v1(&self) -> PathBuf {
        self.td.path().join("v1")
    }
    pub fn v2(&self) -> PathBuf {
        self.td.path().join("v2")
    }
    pub fn mirror(&self) -> PathBuf {
        self.td.path().join("mirror")
    }
    pub fn data(&self) -> PathBuf {
        self.td.path().join("data")
    }

    /// Publish `src` into the mirror, with patches from `previous` when given.
    pub fn publish(&self, src: &Path, previous: Option<&Path>) -> Manifest {
        let opts = PublishOptions {
            hash: HashAlgorithm::Sha1,
            codec: Codec::Bzip2,
            only: vec!["test".into()],
            previous: previous.map(Path::to_path_buf),
        };
        publish::publish(src, &self.mirror(), &opts).unwrap()
    }

    pub fn write_manifest(&self, mf: &Manifest) {
        std::fs::write(self.mirror().join(MANIFEST_NAME), mf.to_json_pretty().unwrap()).unwrap();
    }

    pub fn options(&self) -> SyncOptions {
        let mut opts = SyncOptions::new(self.data());
        opts.jobs = 4;
        opts.platform = Arc::new(AnyPlatform);
        opts
    }

    pub fn source(&self) -> Recorder {
        Recorder::new(DirSource::new(self.mirror(), HashAlgorithm::Sha1))
    }

    pub fn read_data(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.data().join(rel)).ok()
    }

    /// Temp files the engine left behind in the data dir.
    pub fn leftovers(&self) -> Vec<PathBuf> {
        walkdir::WalkDir::new(self.data())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".assetsync-"))
            .map(|e| e.path().to_path_buf())
            .collect()
    }
}

/// Downloader wrapper that records requests and injects faults per object.
pub struct Recorder {
    inner: DirSource,
    pub log: Mutex<Vec<String>>,
    pub fail: HashSet<String>,
    pub corrupt: HashSet<String>,
}

impl Recorder {
    pub fn new(inner: DirSource) -> Self {
        Self { inner, log: Mutex::new(Vec::new()), fail: HashSet::new(), corrupt: HashSet::new() }
    }

    pub fn failing(mut self, object: &str) -> Self {
        self.fail.insert(object.to_string());
        self
    }

    pub fn corrupting(mut self, object: &str) -> Self {
        self.corrupt.insert(object.to_string());
        self
    }

    pub fn downloads(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

impl Downloader for Recorder {
    fn fetch_manifest(&self) -> SyncResult<Manifest> {
        self.inner.fetch_manifest()
    }

    fn download(&self, object: &str) -> SyncResult<ObjectStream> {
        self.log.lock().unwrap().push(object.to_string());
        if self.fail.contains(object) {
            return Err(SyncError::transport(
                object,
                io::Error::new(io::ErrorKind::ConnectionReset, "injected"),
            ));
        }
        let mut stream = self.inner.download(object)?;
        if !self.corrupt.contains(object) {
            return Ok(stream);
        }
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x01;
        Ok(Box::new(Cursor::new(bytes)))
    }
}
