use crate::digest::{self, Digest, HashAlgorithm};
use crate::manifest::{ManifestEntry, PatchEntry};
use std::io;
use std::path::Path;

/// What a read-only probe found at a tracked path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LocalState {
    Missing,
    Present(Digest),
    /// The path exists but could not be hashed.
    Unreadable(String),
}

impl LocalState {
    pub fn digest(&self) -> Option<&Digest> {
        match self {
            LocalState::Present(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action<'a> {
    Skip,
    Patch(&'a PatchEntry),
    FullFetch,
}

/// Hash the current contents of `path`. Never cached across runs.
pub fn probe(path: &Path, algo: HashAlgorithm) -> LocalState {
    match digest::hash_file(algo, path) {
        Ok(d) => LocalState::Present(d),
        Err(e) if e.kind() == io::ErrorKind::NotFound => LocalState::Missing,
        Err(e) => LocalState::Unreadable(e.to_string()),
    }
}

/// Decide how to bring one entry up to date from its probed local state.
pub fn plan<'a>(entry: &'a ManifestEntry, local: &LocalState) -> Action<'a> {
    match local {
        LocalState::Present(d) if *d == entry.target_hash => Action::Skip,
        LocalState::Present(d) => match entry.patch_from(d) {
            Some(p) => Action::Patch(p),
            None => Action::FullFetch,
        },
        // No origin state to patch from, and an unreadable file is never trusted.
        LocalState::Missing | LocalState::Unreadable(_) => Action::FullFetch,
    }
}
