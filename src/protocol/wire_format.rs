//! Wire format encoding and decoding.
//!
//! Implements the 14-byte record header:
//! ```text
//! ┌───────────┬───────────┬──────────┬───────────┬─────────────┐
//! │ Timestamp │ Src addr  │ Src port │ Topic len │ Payload len │
//! │ 4 bytes   │ 4 bytes   │ 2 bytes  │ 2 bytes   │ 2 bytes     │
//! │ uint32 LE │ uint32 LE │ uint16 LE│ uint16 LE │ uint16 LE   │
//! └───────────┴───────────┴──────────┴───────────┴─────────────┘
//! ```
//!
//! All multi-byte integers are Little Endian, packed with no padding. The
//! header is followed by `topic_length` topic bytes (absent when zero) and
//! `payload_length` payload bytes. There is no file header and no sync marker.

use crate::error::{BagError, Result};
use crate::transport::EndpointKey;

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Maximum size of one encoded frame (header + topic + payload).
///
/// Equal to the writer's scratch buffer capacity: a frame must always fit in
/// one buffer.
pub const MAX_FRAME_SIZE: usize = 65_535;

/// Maximum combined topic + payload size.
pub const MAX_BODY_SIZE: usize = MAX_FRAME_SIZE - HEADER_SIZE;

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Monotonic milliseconds at capture time.
    pub timestamp: u32,
    /// Packed IPv4 address of the source endpoint.
    pub source_address: u32,
    /// Port of the source endpoint.
    pub source_port: u16,
    /// Topic length in bytes (0 = no topic part).
    pub topic_length: u16,
    /// Payload length in bytes.
    pub payload_length: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(timestamp: u32, source: EndpointKey, topic_length: u16, payload_length: u16) -> Self {
        Self {
            timestamp,
            source_address: source.address,
            source_port: source.port,
            topic_length,
            payload_length,
        }
    }

    /// Encode header to bytes (Little Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use zmq_bag::protocol::Header;
    /// use zmq_bag::transport::EndpointKey;
    ///
    /// let header = Header::new(1000, EndpointKey::new(0x0A000005, 9090), 5, 4);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 14);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (14 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.timestamp.to_le_bytes());
        buf[4..8].copy_from_slice(&self.source_address.to_le_bytes());
        buf[8..10].copy_from_slice(&self.source_port.to_le_bytes());
        buf[10..12].copy_from_slice(&self.topic_length.to_le_bytes());
        buf[12..14].copy_from_slice(&self.payload_length.to_le_bytes());
    }

    /// Decode header from bytes (Little Endian).
    ///
    /// Fails with `TruncatedRecord` if fewer than 14 bytes are available.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(BagError::TruncatedRecord {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        Ok(Self {
            timestamp: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            source_address: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            source_port: u16::from_le_bytes([buf[8], buf[9]]),
            topic_length: u16::from_le_bytes([buf[10], buf[11]]),
            payload_length: u16::from_le_bytes([buf[12], buf[13]]),
        })
    }

    /// Identity of the endpoint this frame arrived on (or is replayed to).
    #[inline]
    pub fn source(&self) -> EndpointKey {
        EndpointKey::new(self.source_address, self.source_port)
    }

    /// Check if the frame carries no topic part.
    #[inline]
    pub fn is_topicless(&self) -> bool {
        self.topic_length == 0
    }

    /// Number of bytes following the header.
    #[inline]
    pub fn body_len(&self) -> usize {
        self.topic_length as usize + self.payload_length as usize
    }

    /// Total encoded size of the frame.
    #[inline]
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.body_len()
    }

    /// Check the frame fits in a single writer buffer.
    pub fn validate(&self) -> Result<()> {
        if self.frame_len() > MAX_FRAME_SIZE {
            return Err(BagError::FrameTooLarge {
                size: self.frame_len(),
                capacity: MAX_FRAME_SIZE,
            });
        }
        Ok(())
    }
}

/// Encode a header from its raw fields (standalone function).
#[inline]
pub fn encode_header(
    timestamp: u32,
    source_address: u32,
    source_port: u16,
    topic_length: u16,
    payload_length: u16,
) -> [u8; HEADER_SIZE] {
    Header {
        timestamp,
        source_address,
        source_port,
        topic_length,
        payload_length,
    }
    .encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Result<Header> {
    Header::decode(buf)
}
