//! Chunks: the append-only unit of broker storage.
//!
//! A chunk is one sealed batch rendered for the log: a fixed header carrying
//! the filter metadata, followed by the compressed concatenation of the
//! batch's messages. Consumers read the header first and may skip the body
//! entirely when admission fails.
//!
//! Wire layout:
//!
//! ```text
//! magic              u16    0x534C
//! compression id     u8
//! flags              u8     bit 0: unfiltered
//! filter value       u16-length-prefixed UTF-8
//! filter index       64 bytes
//! message count      u32
//! uncompressed len   u32
//! body               u32-length-prefixed compressed bytes
//! ```

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use nom::{bytes::complete::take, number::complete::be_u8};

use crate::codec::{self, ToWire};
use crate::compression::{self, Compression};
use crate::constants::{
    CHUNK_MAGIC, FILTER_INDEX_BYTES, MAX_CHUNK_MESSAGE_COUNT, MAX_FILTER_VALUE_LEN,
};
use crate::error::{Result, StreamError};
use crate::filter::{ChunkMeta, FilterIndex};
use crate::message::{self, Message};
use crate::types::{ChunkOffset, FilterValue};

const FLAG_UNFILTERED: u8 = 0b0000_0001;

/// Chunk header: everything a consumer needs for the admission decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Algorithm the body was compressed with.
    pub compression: Compression,
    /// The chunk carries no usable filter tag; admission must pass it.
    pub unfiltered: bool,
    /// The batch-wide filter value (wildcard when `unfiltered`).
    pub filter_value: FilterValue,
    /// Probabilistic index over the filter values inside.
    pub filter_index: FilterIndex,
    /// Number of messages in the body.
    pub message_count: u32,
    /// Body length before compression, for allocation and integrity checks.
    pub uncompressed_len: u32,
}

impl ChunkHeader {
    /// The slice of the header the admission tier probes.
    pub fn meta(&self) -> ChunkMeta {
        ChunkMeta {
            filter_index: self.filter_index,
            unfiltered: self.unfiltered,
        }
    }
}

/// One sealed batch in broker form.
///
/// The offset is zero until the broker appends the chunk and stamps its
/// position in the partition log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    header: ChunkHeader,
    body: Bytes,
    offset: ChunkOffset,
}

impl Chunk {
    /// Render a sealed batch into a chunk.
    ///
    /// The caller supplies the tagging outcome: the batch-wide filter value,
    /// the index over the values present, and whether the chunk goes out
    /// unfiltered.
    pub fn build(
        messages: &[Message],
        filter_value: FilterValue,
        filter_index: FilterIndex,
        unfiltered: bool,
        algorithm: Compression,
    ) -> Result<Self> {
        debug_assert!(!messages.is_empty(), "empty batches are never sealed");
        if messages.len() > MAX_CHUNK_MESSAGE_COUNT as usize {
            return Err(StreamError::WireLimitExceeded {
                reason: format!(
                    "{} messages exceeds the per-chunk limit of {MAX_CHUNK_MESSAGE_COUNT}",
                    messages.len()
                ),
            });
        }
        // The decoder rejects overlong filter values, so building one is a
        // batch failure, not a deferred consumer error.
        if filter_value.as_str().len() > MAX_FILTER_VALUE_LEN {
            return Err(StreamError::WireLimitExceeded {
                reason: format!(
                    "filter value of {} bytes exceeds the limit of {MAX_FILTER_VALUE_LEN}",
                    filter_value.as_str().len()
                ),
            });
        }

        let uncompressed: usize = messages.iter().map(Message::encoded_len).sum();
        let mut raw = BytesMut::with_capacity(uncompressed);
        for msg in messages {
            msg.encode(&mut raw)?;
        }
        let body = compression::compress(&raw, algorithm)?;

        Ok(Self {
            header: ChunkHeader {
                compression: algorithm,
                unfiltered,
                filter_value,
                filter_index,
                message_count: messages.len() as u32,
                uncompressed_len: uncompressed as u32,
            },
            body,
            offset: ChunkOffset::default(),
        })
    }

    /// The header.
    #[inline]
    pub fn header(&self) -> &ChunkHeader {
        &self.header
    }

    /// The compressed body.
    #[inline]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Position in the partition log.
    #[inline]
    pub fn offset(&self) -> ChunkOffset {
        self.offset
    }

    /// Stamp the log position on append.
    pub(crate) fn with_offset(mut self, offset: ChunkOffset) -> Self {
        self.offset = offset;
        self
    }

    /// Encode header and body into one self-delimiting frame.
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(
            2 + 1 + 1 + 2 + self.header.filter_value.as_str().len() + FILTER_INDEX_BYTES + 4 + 4
                + 4
                + self.body.len(),
        );
        CHUNK_MAGIC.encode(&mut buf)?;
        self.header.compression.id().encode(&mut buf)?;
        let flags = if self.header.unfiltered {
            FLAG_UNFILTERED
        } else {
            0
        };
        flags.encode(&mut buf)?;
        self.header.filter_value.as_str().encode(&mut buf)?;
        buf.put_slice(self.header.filter_index.as_bytes());
        self.header.message_count.encode(&mut buf)?;
        self.header.uncompressed_len.encode(&mut buf)?;
        self.body.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode one frame. The offset is not on the wire; the caller stamps it
    /// from the log position.
    pub fn decode(input: &[u8]) -> io::Result<Self> {
        parse_chunk(input)
            .map(|(_, chunk)| chunk)
            .map_err(|e| corrupt(&e.to_string()))
    }

    /// Decompress the body and parse the messages out of it.
    ///
    /// Any failure means the chunk is corrupt; the caller attaches partition
    /// and offset context.
    pub fn open(&self) -> io::Result<Vec<Message>> {
        let raw = compression::decompress(&self.body, self.header.compression)?;
        if raw.len() != self.header.uncompressed_len as usize {
            return Err(corrupt(&format!(
                "uncompressed length mismatch: header says {}, body is {}",
                self.header.uncompressed_len,
                raw.len()
            )));
        }

        let mut messages = Vec::with_capacity(self.header.message_count as usize);
        let mut rest: &[u8] = &raw;
        for _ in 0..self.header.message_count {
            let (remaining, msg) = message::parse_message(rest)
                .map_err(|_| corrupt("truncated or malformed message"))?;
            messages.push(msg);
            rest = remaining;
        }
        if !rest.is_empty() {
            return Err(corrupt("trailing bytes after last message"));
        }
        Ok(messages)
    }
}

fn corrupt(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason.to_string())
}

fn parse_chunk(input: &[u8]) -> nom::IResult<&[u8], Chunk> {
    let (input, magic) = nom::number::complete::be_u16(input)?;
    if magic != CHUNK_MAGIC {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    let (input, compression_id) = be_u8(input)?;
    let Some(algorithm) = Compression::from_id(compression_id) else {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Alt,
        )));
    };
    let (input, flags) = be_u8(input)?;
    let (input, filter_value) = codec::parse_string(input)?;
    let (input, index_bytes) = take(FILTER_INDEX_BYTES)(input)?;
    let (input, message_count) = nom::number::complete::be_u32(input)?;
    if message_count > MAX_CHUNK_MESSAGE_COUNT || filter_value.len() > MAX_FILTER_VALUE_LEN {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (input, uncompressed_len) = nom::number::complete::be_u32(input)?;
    let (input, body) = codec::parse_bytes(input)?;

    let mut bits = [0u8; FILTER_INDEX_BYTES];
    bits.copy_from_slice(index_bytes);

    Ok((
        input,
        Chunk {
            header: ChunkHeader {
                compression: algorithm,
                unfiltered: flags & FLAG_UNFILTERED != 0,
                filter_value: FilterValue::new(filter_value),
                filter_index: FilterIndex::from_bytes(bits),
                message_count,
                uncompressed_len,
            },
            body,
            offset: ChunkOffset::default(),
        },
    ))
}
