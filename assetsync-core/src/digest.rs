//! Streaming content digests.
//!
//! Every transformation boundary in a file's pipeline (bytes off the wire, bytes out
//! of the decompressor, bytes out of the patch applier) is hashed as the data flows
//! through it. [`HashingReader`] and [`HashingWriter`] attach a hasher to any stream;
//! the digest is taken with `finalize` once the stream has been fully consumed.

use crate::error::{Checkpoint, SyncError, SyncResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Digest as _;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;
use std::str::FromStr;

/// Hash function used for every digest in a manifest.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Hex SHA-1, as published by the upstream patch mirror.
    #[default]
    Sha1,
    Blake3,
}

impl HashAlgorithm {
    /// Digest length in bytes.
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Blake3 => 32,
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashAlgorithm::Sha1),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(format!("unknown hash algorithm {other:?}")),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashAlgorithm::Sha1 => "sha1",
            HashAlgorithm::Blake3 => "blake3",
        })
    }
}

/// A content digest. Serialized as lowercase hex.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest(Vec<u8>);

impl Digest {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Digest(bytes.to_vec())
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(s.trim()).map(Digest)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).map_err(|e| serde::de::Error::custom(format!("bad digest {s:?}: {e}")))
    }
}

/// Incremental hasher over one of the supported algorithms.
#[derive(Clone)]
pub struct Hasher {
    inner: Inner,
}

#[derive(Clone)]
enum Inner {
    Sha1(sha1::Sha1),
    Blake3(Box<blake3::Hasher>),
}

impl Hasher {
    pub fn new(algo: HashAlgorithm) -> Self {
        let inner = match algo {
            HashAlgorithm::Sha1 => Inner::Sha1(sha1::Sha1::new()),
            HashAlgorithm::Blake3 => Inner::Blake3(Box::new(blake3::Hasher::new())),
        };
        Self { inner }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.inner {
            Inner::Sha1(h) => h.update(data),
            Inner::Blake3(h) => {
                h.update(data);
            }
        }
    }

    pub fn finalize(self) -> Digest {
        match self.inner {
            Inner::Sha1(h) => Digest(h.finalize().to_vec()),
            Inner::Blake3(h) => Digest(h.finalize().as_bytes().to_vec()),
        }
    }
}

/// Reader adapter that hashes every byte read through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Hasher,
    bytes: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(algo: HashAlgorithm, inner: R) -> Self {
        Self { inner, hasher: Hasher::new(algo), bytes: 0 }
    }

    /// Bytes read so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Digest of everything read. Only meaningful once the stream hit EOF.
    pub fn finalize(self) -> (R, Digest) {
        (self.inner, self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }
}

/// Writer adapter that hashes every byte accepted by the inner writer.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Hasher,
    bytes: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(algo: HashAlgorithm, inner: W) -> Self {
        Self { inner, hasher: Hasher::new(algo), bytes: 0 }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn finalize(self) -> (W, Digest) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Attach a digest to `stream`; shorthand for [`HashingReader::new`].
pub fn wrap<R: Read>(algo: HashAlgorithm, stream: R) -> HashingReader<R> {
    HashingReader::new(algo, stream)
}

pub fn hash_bytes(algo: HashAlgorithm, data: &[u8]) -> Digest {
    let mut h = Hasher::new(algo);
    h.update(data);
    h.finalize()
}

pub fn hash_reader<R: Read>(algo: HashAlgorithm, reader: R) -> io::Result<Digest> {
    let mut r = HashingReader::new(algo, reader);
    io::copy(&mut r, &mut io::sink())?;
    Ok(r.finalize().1)
}

pub fn hash_file(algo: HashAlgorithm, path: &Path) -> io::Result<Digest> {
    let f = std::fs::File::open(path)?;
    hash_reader(algo, io::BufReader::with_capacity(1 << 16, f))
}

/// Compare a computed digest with the manifest's expectation.
pub fn check(
    path: &str,
    checkpoint: Checkpoint,
    expected: &Digest,
    actual: Digest,
) -> SyncResult<()> {
    if *expected == actual {
        Ok(())
    } else {
        Err(SyncError::IntegrityMismatch {
            path: path.to_string(),
            checkpoint,
            expected: expected.clone(),
            actual,
        })
    }
}
