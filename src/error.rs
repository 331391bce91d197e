//! Error types for zmq-bag.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for all recording and replay operations.
#[derive(Debug, Error)]
pub enum BagError {
    /// I/O error on the recording file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Fewer bytes were available than a header or body declares.
    #[error("Truncated record: needed {needed} bytes, only {available} available")]
    TruncatedRecord {
        /// Bytes the record declared.
        needed: usize,
        /// Bytes actually present before end-of-file.
        available: usize,
    },

    /// A frame or single write exceeds the writer's buffer capacity.
    #[error("Frame too large: {size} bytes exceeds capacity of {capacity} bytes")]
    FrameTooLarge {
        /// Requested size in bytes.
        size: usize,
        /// Hard ceiling in bytes.
        capacity: usize,
    },

    /// A transport role string or role/side combination that is not supported.
    #[error("Unsupported transport mode: {0}")]
    UnsupportedTransportMode(String),

    /// A readiness event referenced an endpoint ID with no registered identity.
    #[error("Endpoint not found for ID: {0}")]
    EndpointNotFound(u32),

    /// The replay input file could not be opened.
    #[error("Missing input file: {}", .0.display())]
    MissingInputFile(PathBuf),

    /// ZeroMQ transport error.
    #[error("ZeroMQ error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    /// Generic transport failure (closed channel, empty message, etc.).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The writer was closed after a fatal error and refuses further writes.
    #[error("Frame writer is closed")]
    WriterClosed,

    /// An engine operation was called in the wrong lifecycle state.
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The engine worker task panicked or was aborted.
    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// JSON serialization error (configuration summaries).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BagError {
    /// Whether this error ends the current capture or replay session.
    ///
    /// Malformed on-disk data, oversized frames and file I/O failures are fatal.
    /// Transport hiccups on a single endpoint are not.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BagError::Io(_)
                | BagError::TruncatedRecord { .. }
                | BagError::FrameTooLarge { .. }
                | BagError::WriterClosed
        )
    }
}

/// Result type alias using BagError.
pub type Result<T> = std::result::Result<T, BagError>;
