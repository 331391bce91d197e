//! Buffered frame writer for recordings.
//!
//! Coalesces frame bytes into one fixed-capacity scratch buffer so the
//! capture loop issues few file writes.
//!
//! # Flush policy
//!
//! ```text
//! write(data) ─► fits? ──yes──► append at cursor
//!                  │
//!                  no ──► flush buffer, cursor = 0, append
//!
//! write_instant(data) ─► flush buffer, write data directly
//! drain()             ─► flush buffer (end of session)
//! ```
//!
//! The file is created lazily by the first non-empty write, so a session
//! that writes nothing leaves nothing on disk.
//! Bytes land in the file in exactly the order they were written. The writer
//! is owned by a single task, so no locking is involved.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;

use crate::error::{BagError, Result};
use crate::protocol::{Frame, MAX_FRAME_SIZE};

/// Default scratch buffer capacity; also the hard ceiling for one write.
pub const DEFAULT_BUFFER_CAPACITY: usize = MAX_FRAME_SIZE;

/// Counters describing what the writer has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Number of buffer flushes that reached the file.
    pub flushes: u64,
    /// Bytes written to the file.
    pub bytes_written: u64,
    /// Frames written through [`FrameWriter::write_frame`].
    pub frames: u64,
}

/// Buffered, append-only writer for one recording file.
pub struct FrameWriter {
    /// Output path.
    path: PathBuf,
    /// Output file, opened on first write.
    file: Option<File>,
    /// Scratch buffer.
    buf: Box<[u8]>,
    /// Number of valid, unflushed bytes at the head of `buf`.
    cursor: usize,
    /// Set after a fatal error; no further writes are accepted.
    closed: bool,
    /// Counters.
    stats: WriterStats,
}

impl FrameWriter {
    /// Create a writer with the default buffer capacity.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_BUFFER_CAPACITY)
    }

    /// Create a writer with a custom buffer capacity.
    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            file: None,
            buf: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
            closed: false,
            stats: WriterStats::default(),
        }
    }

    /// Buffer bytes, flushing first if they would not fit.
    ///
    /// Fails with `FrameTooLarge` (and closes the file) if `data` exceeds the
    /// buffer capacity.
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        self.write_inner(data, false).await
    }

    /// Flush buffered bytes, then write `data` straight to the file.
    pub async fn write_instant(&mut self, data: &[u8]) -> Result<()> {
        self.write_inner(data, true).await
    }

    /// Write a frame: header first, then topic, then payload.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.write(&frame.header.encode()).await?;
        if let Some(topic) = &frame.topic {
            self.write(topic).await?;
        }
        self.write(&frame.payload).await?;
        self.stats.frames += 1;
        Ok(())
    }

    /// Flush any residual bytes to the file.
    ///
    /// Called once at the end of a capture session, after the last write.
    pub async fn drain(&mut self) -> Result<()> {
        self.write_instant(&[]).await?;
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
        }
        Ok(())
    }

    /// Drain and close the file. Later writes fail with `WriterClosed`.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let drained = self.drain().await;
        self.shutdown_file().await;
        drained
    }

    async fn write_inner(&mut self, data: &[u8], instant: bool) -> Result<()> {
        if self.closed {
            return Err(BagError::WriterClosed);
        }

        if data.len() > self.buf.len() {
            let capacity = self.buf.len();
            tracing::error!(
                size = data.len(),
                capacity,
                path = %self.path.display(),
                "Write exceeds buffer capacity, closing recording"
            );
            // Keep what was already accepted; the oversized write is dropped.
            if let Err(e) = self.flush_buffer().await {
                tracing::warn!(error = %e, "Failed to flush recording before closing");
            }
            self.shutdown_file().await;
            return Err(BagError::FrameTooLarge {
                size: data.len(),
                capacity,
            });
        }

        if !data.is_empty() {
            self.ensure_open().await?;
        }

        if instant {
            let pending = self.cursor;
            self.flush_buffer().await?;
            if !data.is_empty() {
                self.write_file(data).await?;
            }
            tracing::debug!(bytes = pending + data.len(), "Instant write to file");
            return Ok(());
        }

        if self.cursor + data.len() > self.buf.len() {
            tracing::debug!(bytes = self.cursor, "Buffer full, flushing to file");
            self.flush_buffer().await?;
        }

        self.buf[self.cursor..self.cursor + data.len()].copy_from_slice(data);
        self.cursor += data.len();
        Ok(())
    }

    /// Write the buffered bytes to the file and reset the cursor.
    async fn flush_buffer(&mut self) -> Result<()> {
        if self.cursor == 0 {
            return Ok(());
        }
        let len = self.cursor;
        self.ensure_open().await?;
        let Some(file) = self.file.as_mut() else {
            return Err(BagError::WriterClosed);
        };
        file.write_all(&self.buf[..len]).await?;
        file.flush().await?;
        self.cursor = 0;
        self.stats.flushes += 1;
        self.stats.bytes_written += len as u64;
        Ok(())
    }

    async fn write_file(&mut self, data: &[u8]) -> Result<()> {
        self.ensure_open().await?;
        let Some(file) = self.file.as_mut() else {
            return Err(BagError::WriterClosed);
        };
        file.write_all(data).await?;
        file.flush().await?;
        self.stats.bytes_written += data.len() as u64;
        Ok(())
    }

    async fn ensure_open(&mut self) -> Result<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = File::create(&self.path).await?;
        tracing::info!(path = %self.path.display(), "Opened recording file");
        self.file = Some(file);
        Ok(())
    }

    async fn shutdown_file(&mut self) {
        self.closed = true;
        if let Some(file) = self.file.take() {
            if let Err(e) = file.sync_all().await {
                tracing::warn!(error = %e, "Failed to sync recording file");
            }
            tracing::info!(
                path = %self.path.display(),
                bytes = self.stats.bytes_written,
                "Closed recording file"
            );
        }
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Unflushed bytes currently buffered.
    #[inline]
    pub fn buffered(&self) -> usize {
        self.cursor
    }

    /// Check if the output file is currently open.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Check if the writer was closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writer counters.
    #[inline]
    pub fn stats(&self) -> WriterStats {
        self.stats
    }
}
