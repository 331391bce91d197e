//! Capture timestamps and recording names.

use std::time::Instant;

use chrono::{DateTime, Local};

/// Prefix of every recording file name.
pub const RECORDING_PREFIX: &str = "zmq_rec_";

/// Extension of every recording file name.
pub const RECORDING_EXTENSION: &str = "bin";

/// Milliseconds elapsed since a fixed origin.
///
/// Values are meaningful only relative to each other within one recording.
/// The counter wraps after about 49.7 days.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Start a clock at `origin`.
    pub fn with_origin(origin: Instant) -> Self {
        Self { origin }
    }

    /// Milliseconds since the origin, truncated to 32 bits.
    pub fn now_millis(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Recording file name for a session started at `started`.
///
/// Produces `zmq_rec_YYYY-MM-DD_HH-MM-SS.bin`.
pub fn recording_file_name(started: DateTime<Local>) -> String {
    format!(
        "{}{}.{}",
        RECORDING_PREFIX,
        started.format("%Y-%m-%d_%H-%M-%S"),
        RECORDING_EXTENSION
    )
}
