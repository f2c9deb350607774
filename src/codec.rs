//! Low-level wire helpers shared by the chunk codec.
//!
//! Encoding renders into any [`BufMut`] via the [`ToWire`] trait; decoding
//! uses `nom` combinators over byte slices. All decode helpers validate
//! length prefixes against the limits in [`crate::constants`] so untrusted
//! chunk bodies cannot drive unbounded allocations, and the encode helpers
//! enforce the same limits so nothing the decoder would reject is ever
//! written to the log.

use std::collections::HashMap;

use bytes::{BufMut, Bytes};
use nom::{
    IResult,
    bytes::complete::take,
    number::complete::{be_u16, be_u32, be_u64},
};

use crate::constants::MAX_ATTRIBUTE_COUNT;
use crate::error::{Result, StreamError};

/// Serialize a value into the chunk wire format.
pub trait ToWire {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()>;
}

impl ToWire for u8 {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        buffer.put_u8(*self);
        Ok(())
    }
}

impl ToWire for u16 {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        buffer.put_u16(*self);
        Ok(())
    }
}

impl ToWire for u32 {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        buffer.put_u32(*self);
        Ok(())
    }
}

impl ToWire for u64 {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        buffer.put_u64(*self);
        Ok(())
    }
}

impl ToWire for str {
    /// Length-prefixed (u16) UTF-8 string.
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        if self.len() > u16::MAX as usize {
            return Err(StreamError::WireLimitExceeded {
                reason: format!(
                    "string of {} bytes does not fit a u16 length prefix",
                    self.len()
                ),
            });
        }
        buffer.put_u16(self.len() as u16);
        buffer.put(self.as_bytes());
        Ok(())
    }
}

impl ToWire for String {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        self.as_str().encode(buffer)
    }
}

impl ToWire for [u8] {
    /// Length-prefixed (u32) byte blob.
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        if self.len() > u32::MAX as usize {
            return Err(StreamError::WireLimitExceeded {
                reason: format!(
                    "blob of {} bytes does not fit a u32 length prefix",
                    self.len()
                ),
            });
        }
        buffer.put_u32(self.len() as u32);
        buffer.put(self);
        Ok(())
    }
}

impl ToWire for Bytes {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        self.as_ref().encode(buffer)
    }
}

/// Encode a string-to-string attribute map: u16 count, then length-prefixed
/// key/value pairs in sorted key order so encoding is deterministic. The
/// count is bounded by [`MAX_ATTRIBUTE_COUNT`], mirroring the decoder.
pub fn encode_attributes<B: BufMut>(
    attributes: &HashMap<String, String>,
    buffer: &mut B,
) -> Result<()> {
    if attributes.len() > MAX_ATTRIBUTE_COUNT {
        return Err(StreamError::WireLimitExceeded {
            reason: format!(
                "{} attributes exceeds the limit of {MAX_ATTRIBUTE_COUNT}",
                attributes.len()
            ),
        });
    }
    buffer.put_u16(attributes.len() as u16);
    let mut keys: Vec<&String> = attributes.keys().collect();
    keys.sort();
    for key in keys {
        key.encode(buffer)?;
        attributes[key].encode(buffer)?;
    }
    Ok(())
}

/// Parse a length-prefixed (u16) UTF-8 string.
pub fn parse_string(input: &[u8]) -> IResult<&[u8], String> {
    let (input, length) = be_u16(input)?;
    let (input, raw) = take(length)(input)?;
    match std::str::from_utf8(raw) {
        Ok(s) => Ok((input, s.to_string())),
        Err(_) => Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        ))),
    }
}

/// Parse a length-prefixed (u32) byte blob.
pub fn parse_bytes(input: &[u8]) -> IResult<&[u8], Bytes> {
    let (input, length) = be_u32(input)?;
    let (input, raw) = take(length)(input)?;
    Ok((input, Bytes::copy_from_slice(raw)))
}

/// Parse an attribute map, bounded by [`MAX_ATTRIBUTE_COUNT`].
pub fn parse_attributes(input: &[u8]) -> IResult<&[u8], HashMap<String, String>> {
    let (mut input, count) = be_u16(input)?;
    if count as usize > MAX_ATTRIBUTE_COUNT {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let mut attributes = HashMap::with_capacity(count as usize);
    for _ in 0..count {
        let (rest, key) = parse_string(input)?;
        let (rest, value) = parse_string(rest)?;
        attributes.insert(key, value);
        input = rest;
    }
    Ok((input, attributes))
}

/// Parse a big-endian u64.
pub fn parse_u64(input: &[u8]) -> IResult<&[u8], u64> {
    be_u64(input)
}

/// Stable 64-bit FNV-1a hash with a seed.
///
/// Used for partition routing and the chunk filter index. Both sides of the
/// wire must agree on this function across releases, so it is pinned here
/// instead of going through `std`'s unspecified default hasher.
pub fn fnv1a64(seed: u64, bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = FNV_OFFSET ^ seed.wrapping_mul(FNV_PRIME);
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
