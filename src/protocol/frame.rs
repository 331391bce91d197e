//! Frame struct: one captured message with header, optional topic and payload.
//!
//! Uses `bytes::Bytes` so topic and payload can be handed to a socket
//! without copying.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use zmq_bag::protocol::Frame;
//! use zmq_bag::transport::EndpointKey;
//!
//! let source: EndpointKey = "10.0.0.5:9090".parse().unwrap();
//! let frame = Frame::new(1000, source, Some(Bytes::from_static(b"alpha")), Bytes::from_static(b"data")).unwrap();
//!
//! assert_eq!(frame.topic(), Some(&b"alpha"[..]));
//! assert_eq!(frame.encode().len(), 14 + 5 + 4);
//! ```

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::wire_format::{Header, HEADER_SIZE, MAX_FRAME_SIZE};
use crate::error::{BagError, Result};
use crate::transport::{EndpointKey, Multipart};

/// A complete recorded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Topic part, `None` for topicless frames.
    pub topic: Option<Bytes>,
    /// Payload part.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame for a message received on `source`.
    ///
    /// An empty topic is treated as no topic. Fails with `FrameTooLarge` if
    /// the encoded frame would not fit in [`MAX_FRAME_SIZE`]; nothing is ever
    /// truncated.
    pub fn new(
        timestamp: u32,
        source: EndpointKey,
        topic: Option<Bytes>,
        payload: Bytes,
    ) -> Result<Self> {
        let topic = topic.filter(|t| !t.is_empty());
        let topic_len = topic.as_ref().map_or(0, Bytes::len);

        let size = HEADER_SIZE + topic_len + payload.len();
        if size > MAX_FRAME_SIZE {
            return Err(BagError::FrameTooLarge {
                size,
                capacity: MAX_FRAME_SIZE,
            });
        }

        // Both lengths fit in u16 since their sum is below MAX_FRAME_SIZE.
        let header = Header::new(timestamp, source, topic_len as u16, payload.len() as u16);
        Ok(Self {
            header,
            topic,
            payload,
        })
    }

    /// Assemble a frame from an already-decoded header and body.
    pub fn from_parts(header: Header, topic: Option<Bytes>, payload: Bytes) -> Self {
        Self {
            header,
            topic,
            payload,
        }
    }

    /// Recorded timestamp in milliseconds.
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.header.timestamp
    }

    /// Source endpoint identity.
    #[inline]
    pub fn source(&self) -> EndpointKey {
        self.header.source()
    }

    /// Topic bytes, if present.
    #[inline]
    pub fn topic(&self) -> Option<&[u8]> {
        self.topic.as_deref()
    }

    /// Payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check if this frame has no topic part.
    #[inline]
    pub fn is_topicless(&self) -> bool {
        self.topic.is_none()
    }

    /// Total encoded size.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        self.header.frame_len()
    }

    /// Encode header, topic and payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.header.encode());
        if let Some(topic) = &self.topic {
            buf.extend_from_slice(topic);
        }
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Convert into the two-part message to dispatch: `[topic, payload]`.
    ///
    /// Topicless frames still send a topic part, left empty.
    pub fn into_multipart(self) -> Multipart {
        vec![self.topic.unwrap_or_default(), self.payload]
    }
}

/// Read up to `buf.len()` bytes, stopping early only at end-of-file.
///
/// Returns the number of bytes actually read.
pub(crate) async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Read the topic and payload declared by `header` from `reader`.
///
/// Reads exactly `topic_length` then `payload_length` bytes. No topic bytes
/// are read when `topic_length == 0`. Fails with `TruncatedRecord` on a
/// short read.
pub async fn decode_body<R>(header: &Header, reader: &mut R) -> Result<(Option<Bytes>, Bytes)>
where
    R: AsyncRead + Unpin,
{
    let needed = header.body_len();
    let mut body = BytesMut::zeroed(needed);

    let available = read_full(reader, &mut body).await?;
    if available < needed {
        return Err(BagError::TruncatedRecord { needed, available });
    }

    let mut body = body.freeze();
    let topic = if header.is_topicless() {
        None
    } else {
        Some(body.split_to(header.topic_length as usize))
    };
    Ok((topic, body))
}
