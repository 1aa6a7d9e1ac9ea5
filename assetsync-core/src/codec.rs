use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

/// Transport compression applied to every remote object.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Bzip2,
    Zstd,
    /// Objects are stored uncompressed.
    Identity,
}

impl Codec {
    /// Wrap `src` in a decompressing reader.
    pub fn decoder<'a, R: Read + 'a>(self, src: R) -> io::Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Codec::Bzip2 => Box::new(bzip2::read::BzDecoder::new(src)),
            Codec::Zstd => Box::new(zstd::stream::read::Decoder::new(src)?),
            Codec::Identity => Box::new(src),
        })
    }

    /// Compress all of `src` into `dst`.
    pub fn encode<R: Read, W: Write>(self, mut src: R, dst: W) -> io::Result<()> {
        match self {
            Codec::Bzip2 => {
                let mut enc = bzip2::write::BzEncoder::new(dst, bzip2::Compression::best());
                io::copy(&mut src, &mut enc)?;
                enc.finish()?;
            }
            Codec::Zstd => zstd::stream::copy_encode(src, dst, 3)?,
            Codec::Identity => {
                let mut dst = dst;
                io::copy(&mut src, &mut dst)?;
            }
        }
        Ok(())
    }

    pub fn encode_all(self, data: &[u8]) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        self.encode(data, &mut out)?;
        Ok(out)
    }

    /// Suffix used for published object names.
    pub fn extension(self) -> &'static str {
        match self {
            Codec::Bzip2 => "bz2",
            Codec::Zstd => "zst",
            Codec::Identity => "bin",
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bzip2" | "bz2" => Ok(Codec::Bzip2),
            "zstd" | "zst" => Ok(Codec::Zstd),
            "identity" | "none" => Ok(Codec::Identity),
            other => Err(format!("unknown codec {other:?}")),
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Codec::Bzip2 => "bzip2",
            Codec::Zstd => "zstd",
            Codec::Identity => "identity",
        })
    }
}
