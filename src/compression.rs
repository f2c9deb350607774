//! Pluggable batch compression codecs.
//!
//! The algorithm is negotiated per stream and recorded in every chunk
//! header, so consumers always decode with the codec the producer used
//! regardless of their own configuration. Decompression failure means the
//! chunk is corrupt; callers surface that, they never skip it.

use std::io::{self, Read, Write};

use bytes::Bytes;
use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Deserialize;

/// Batch compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    #[default]
    None,
    /// DEFLATE with gzip framing.
    Gzip,
    /// LZ4 block format with a length prefix.
    Lz4,
    /// Snappy raw block format.
    Snappy,
}

impl Compression {
    /// Wire id recorded in the chunk header.
    pub const fn id(self) -> u8 {
        match self {
            Compression::None => 0,
            Compression::Gzip => 1,
            Compression::Lz4 => 2,
            Compression::Snappy => 3,
        }
    }

    /// Decode a wire id back into an algorithm.
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Compression::None),
            1 => Some(Compression::Gzip),
            2 => Some(Compression::Lz4),
            3 => Some(Compression::Snappy),
            _ => None,
        }
    }

    /// Configuration/metric label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            Compression::Lz4 => "lz4",
            Compression::Snappy => "snappy",
        }
    }
}

impl std::str::FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "gzip" => Ok(Compression::Gzip),
            "lz4" => Ok(Compression::Lz4),
            "snappy" => Ok(Compression::Snappy),
            other => Err(format!("unknown compression type `{other}`")),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compress an encoded batch body.
pub fn compress(data: &[u8], algorithm: Compression) -> io::Result<Bytes> {
    match algorithm {
        Compression::None => Ok(Bytes::copy_from_slice(data)),
        Compression::Gzip => {
            let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), GzLevel::default());
            encoder.write_all(data)?;
            Ok(Bytes::from(encoder.finish()?))
        }
        Compression::Lz4 => Ok(Bytes::from(lz4_flex::compress_prepend_size(data))),
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map(Bytes::from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}

/// Decompress a chunk body with the algorithm from its header.
///
/// Any failure here means the payload is corrupt; the caller maps it to a
/// chunk-level error with partition/offset context attached.
pub fn decompress(data: &[u8], algorithm: Compression) -> io::Result<Bytes> {
    match algorithm {
        Compression::None => Ok(Bytes::copy_from_slice(data)),
        Compression::Gzip => {
            let mut decoder = GzDecoder::new(data);
            let mut out = Vec::with_capacity(data.len() * 2);
            decoder.read_to_end(&mut out)?;
            Ok(Bytes::from(out))
        }
        Compression::Lz4 => lz4_flex::decompress_size_prepended(data)
            .map(Bytes::from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string())),
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(data)
            .map(Bytes::from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e)),
    }
}
