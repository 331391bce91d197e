//! Sequential recording reader.
//!
//! A recording has no index and no sync markers, so it can only be scanned
//! forward. The reader alternates between two steps:
//! - `next_header`: read 14 bytes (clean end-of-file yields `None`)
//! - `read_body`: read exactly the topic and payload the header declares
//!
//! Splitting the steps lets the replay scheduler look at a frame's timestamp
//! before it commits to reading the body.
//!
//! # Example
//!
//! ```ignore
//! use zmq_bag::protocol::RecordReader;
//!
//! let mut reader = RecordReader::open("zmq.bin").await?;
//! while let Some(frame) = reader.next_frame().await? {
//!     println!("{} bytes from {}", frame.payload().len(), frame.source());
//! }
//! ```

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};

use super::frame::{decode_body, read_full, Frame};
use super::wire_format::{Header, HEADER_SIZE};
use crate::error::{BagError, Result};

/// Forward-only reader over a recording.
pub struct RecordReader<R> {
    /// Underlying byte source.
    inner: R,
    /// Frames fully read so far.
    frames_read: u64,
    /// Bytes consumed so far.
    offset: u64,
}

impl RecordReader<BufReader<File>> {
    /// Open a recording file for sequential reads.
    ///
    /// Any failure to open the file is reported as `MissingInputFile`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).await.map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Cannot open recording");
            BagError::MissingInputFile(path.to_path_buf())
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R> RecordReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap an async byte source.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            frames_read: 0,
            offset: 0,
        }
    }

    /// Read the next header.
    ///
    /// Returns:
    /// - `Ok(Some(header))` if a complete header was read
    /// - `Ok(None)` at a clean end-of-file (no bytes left)
    /// - `Err(TruncatedRecord)` if the file ends inside a header
    pub async fn next_header(&mut self) -> Result<Option<Header>> {
        let mut buf = [0u8; HEADER_SIZE];
        let n = read_full(&mut self.inner, &mut buf).await?;
        self.offset += n as u64;

        match n {
            0 => Ok(None),
            HEADER_SIZE => Header::decode(&buf).map(Some),
            _ => Err(BagError::TruncatedRecord {
                needed: HEADER_SIZE,
                available: n,
            }),
        }
    }

    /// Read the body that follows `header`.
    pub async fn read_body(&mut self, header: Header) -> Result<Frame> {
        let (topic, payload) = decode_body(&header, &mut self.inner).await?;
        self.offset += header.body_len() as u64;
        self.frames_read += 1;
        Ok(Frame::from_parts(header, topic, payload))
    }

    /// Read the next complete frame, or `None` at end-of-file.
    pub async fn next_frame(&mut self) -> Result<Option<Frame>> {
        match self.next_header().await? {
            Some(header) => self.read_body(header).await.map(Some),
            None => Ok(None),
        }
    }

    /// Number of frames fully read.
    #[inline]
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Number of bytes consumed.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::EndpointKey;
    use bytes::Bytes;

    fn frame(ts: u32, topic: Option<&'static [u8]>, payload: &'static [u8]) -> Frame {
        Frame::new(
            ts,
            EndpointKey::new(0x7F00_0001, 9090),
            topic.map(Bytes::from_static),
            Bytes::from_static(payload),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_read_sequence() {
        let frames = vec![
            frame(1000, Some(b"alpha"), b"one"),
            frame(1000, None, b"two"),
            frame(2000, Some(b"beta"), b""),
        ];
        let bytes: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();

        let mut reader = RecordReader::new(&bytes[..]);
        let mut decoded = Vec::new();
        while let Some(f) = reader.next_frame().await.unwrap() {
            decoded.push(f);
        }

        assert_eq!(decoded, frames);
        assert_eq!(reader.frames_read(), 3);
        assert_eq!(reader.offset(), bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_empty_input_is_clean_eof() {
        let mut reader = RecordReader::new(&b""[..]);
        assert!(reader.next_header().await.unwrap().is_none());
        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_header_is_truncated() {
        let bytes = frame(5, None, b"abc").encode();
        let mut reader = RecordReader::new(&bytes[..6]);
        assert!(matches!(
            reader.next_header().await,
            Err(BagError::TruncatedRecord {
                needed: HEADER_SIZE,
                available: 6
            })
        ));
    }

    #[tokio::test]
    async fn test_cut_mid_payload_is_truncated() {
        let mut bytes = frame(5, None, b"complete").encode();
        bytes.extend(frame(6, Some(b"topic"), b"cut off here").encode());
        bytes.truncate(bytes.len() - 4);

        let mut reader = RecordReader::new(&bytes[..]);
        assert!(reader.next_frame().await.unwrap().is_some());
        assert!(matches!(
            reader.next_frame().await,
            Err(BagError::TruncatedRecord { .. })
        ));
        assert_eq!(reader.frames_read(), 1);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.bin");
        match RecordReader::open(&path).await {
            Err(BagError::MissingInputFile(p)) => assert_eq!(p, path),
            other => panic!("expected MissingInputFile, got {:?}", other.err()),
        }
    }
}
