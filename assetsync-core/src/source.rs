//! Remote side of a sync: where the manifest and objects come from.
//!
//! The HTTP session, authentication and CDN layout of a real deployment live outside
//! this crate; they plug in by implementing [`Downloader`]. [`DirSource`] serves a
//! mirror laid out on a local or mounted filesystem.

use crate::digest::HashAlgorithm;
use crate::error::{SyncError, SyncResult};
use crate::manifest::{Manifest, MANIFEST_NAME};
use crate::path_safety;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// A readable remote object. Callers consume it fully and drop it.
pub type ObjectStream = Box<dyn Read + Send>;

/// Manifest source and object downloader.
///
/// Failures are transport failures ([`SyncError::Transport`]) or, for the manifest,
/// [`SyncError::ManifestFormat`]. Integrity is checked by the caller.
pub trait Downloader: Send + Sync {
    fn fetch_manifest(&self) -> SyncResult<Manifest>;
    fn download(&self, object: &str) -> SyncResult<ObjectStream>;
}

impl<D: Downloader + ?Sized> Downloader for &D {
    fn fetch_manifest(&self) -> SyncResult<Manifest> {
        (**self).fetch_manifest()
    }
    fn download(&self, object: &str) -> SyncResult<ObjectStream> {
        (**self).download(object)
    }
}

impl<D: Downloader + ?Sized> Downloader for std::sync::Arc<D> {
    fn fetch_manifest(&self) -> SyncResult<Manifest> {
        (**self).fetch_manifest()
    }
    fn download(&self, object: &str) -> SyncResult<ObjectStream> {
        (**self).download(object)
    }
}

/// Mirror directory: `patchmanifest.txt` plus one file per object.
#[derive(Clone, Debug)]
pub struct DirSource {
    root: PathBuf,
    algo: HashAlgorithm,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>, algo: HashAlgorithm) -> Self {
        Self { root: root.into(), algo }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Downloader for DirSource {
    fn fetch_manifest(&self) -> SyncResult<Manifest> {
        let path = self.root.join(MANIFEST_NAME);
        let bytes = std::fs::read(&path).map_err(|e| SyncError::transport(MANIFEST_NAME, e))?;
        Manifest::parse(&bytes, self.algo)
    }

    fn download(&self, object: &str) -> SyncResult<ObjectStream> {
        path_safety::check_object_name(object)?;
        let f = File::open(self.root.join(object)).map_err(|e| SyncError::transport(object, e))?;
        Ok(Box::new(BufReader::new(f)))
    }
}
