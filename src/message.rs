//! Messages: opaque payloads with routing/filtering attributes.

use std::collections::HashMap;

use bytes::{BufMut, Bytes};

use crate::codec::{self, ToWire};
use crate::constants::MAX_ATTRIBUTE_COUNT;
use crate::error::{Result, StreamError};
use crate::types::SequenceNumber;

/// A single message: opaque payload bytes plus string attributes used for
/// routing and filtering.
///
/// The producer assigns the sequence number when it accepts the message;
/// from that point on the message is immutable. Routing, tagging and
/// filtering only ever consult the attribute map, never the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sequence: SequenceNumber,
    payload: Bytes,
    attributes: HashMap<String, String>,
}

impl Message {
    /// Start building a message.
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// The producer-assigned sequence number (zero until accepted).
    #[inline]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// The opaque payload.
    #[inline]
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Look up one attribute.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// All attributes.
    #[inline]
    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    /// Size of this message on the wire, used for the batch byte budget.
    pub fn encoded_len(&self) -> usize {
        let attrs: usize = self
            .attributes
            .iter()
            .map(|(k, v)| 2 + k.len() + 2 + v.len())
            .sum();
        8 + 2 + attrs + 4 + self.payload.len()
    }

    /// Check the message against the wire-format limits.
    ///
    /// Everything refused here would have encoded into a chunk the decoder
    /// rejects, so the gate sits at `publish`, before the message is
    /// accepted into a batch.
    pub(crate) fn check_wire_limits(&self) -> Result<()> {
        if self.attributes.len() > MAX_ATTRIBUTE_COUNT {
            return Err(StreamError::WireLimitExceeded {
                reason: format!(
                    "{} attributes exceeds the limit of {MAX_ATTRIBUTE_COUNT}",
                    self.attributes.len()
                ),
            });
        }
        for (key, value) in &self.attributes {
            if key.len() > u16::MAX as usize || value.len() > u16::MAX as usize {
                return Err(StreamError::WireLimitExceeded {
                    reason: format!("an attribute key or value exceeds {} bytes", u16::MAX),
                });
            }
        }
        if self.payload.len() > u32::MAX as usize {
            return Err(StreamError::WireLimitExceeded {
                reason: format!("payload exceeds {} bytes", u32::MAX),
            });
        }
        Ok(())
    }

    /// Stamp the sequence number, consuming the unsequenced message.
    pub(crate) fn with_sequence(mut self, sequence: SequenceNumber) -> Self {
        self.sequence = sequence;
        self
    }

    /// Reassemble a message decoded from a chunk body.
    pub(crate) fn from_parts(
        sequence: SequenceNumber,
        payload: Bytes,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            sequence,
            payload,
            attributes,
        }
    }
}

impl ToWire for Message {
    fn encode<B: BufMut>(&self, buffer: &mut B) -> Result<()> {
        self.sequence.value().encode(buffer)?;
        codec::encode_attributes(&self.attributes, buffer)?;
        self.payload.encode(buffer)?;
        Ok(())
    }
}

/// Parse one message from a chunk body.
pub(crate) fn parse_message(input: &[u8]) -> nom::IResult<&[u8], Message> {
    let (input, sequence) = codec::parse_u64(input)?;
    let (input, attributes) = codec::parse_attributes(input)?;
    let (input, payload) = codec::parse_bytes(input)?;
    Ok((
        input,
        Message::from_parts(SequenceNumber::new(sequence), payload, attributes),
    ))
}

/// Builder for [`Message`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    payload: Bytes,
    attributes: HashMap<String, String>,
}

impl MessageBuilder {
    /// Set the payload.
    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Add one attribute.
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Finish the message. The sequence number is assigned by the producer
    /// on accept.
    pub fn build(self) -> Message {
        Message {
            sequence: SequenceNumber::default(),
            payload: self.payload,
            attributes: self.attributes,
        }
    }
}
