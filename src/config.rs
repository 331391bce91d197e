//! Engine configuration.
//!
//! Both configs are plain data with builder-style setters. Mode strings stay
//! unparsed here and are resolved to a [`Role`](crate::transport::Role) once,
//! when the engine initializes.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BagError, Result};
use crate::protocol::{HEADER_SIZE, MAX_FRAME_SIZE};
use crate::transport::EndpointKey;

/// Default capture role.
pub const DEFAULT_RECORDER_MODE: &str = "sub";

/// Default replay role.
pub const DEFAULT_REPLAY_MODE: &str = "pub";

/// Default source port.
pub const DEFAULT_PORT: u16 = 9090;

/// Default recording consumed by the replayer.
pub const DEFAULT_REPLAY_FILE: &str = "zmq.bin";

/// Default readiness wait bound, in milliseconds.
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 1000;

/// Default replay tick, in milliseconds.
pub const DEFAULT_TICK_MS: u64 = 5;

/// Smallest usable writer buffer: one frame header.
pub const MIN_BUFFER_CAPACITY: usize = HEADER_SIZE;

/// Separator between ports in a port list such as `"9090,9091"`.
pub const PORT_SEPARATOR: char = ',';

/// Capture engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Inbound role (`sub`, `rcv`, `pull`, ...).
    pub mode: String,
    /// Source address shared by every configured port.
    pub source: Ipv4Addr,
    /// One endpoint is created per port.
    pub ports: Vec<u16>,
    /// Subscription prefix for subscribe sockets.
    pub topic_filter: String,
    /// Directory the recording is created in.
    pub output_dir: PathBuf,
    /// Writer scratch buffer size in bytes.
    pub buffer_capacity: usize,
    /// Readiness wait bound in milliseconds.
    pub poll_timeout_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            mode: DEFAULT_RECORDER_MODE.to_string(),
            source: Ipv4Addr::LOCALHOST,
            ports: vec![DEFAULT_PORT],
            topic_filter: String::new(),
            output_dir: PathBuf::from("."),
            buffer_capacity: MAX_FRAME_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
        }
    }
}

impl RecorderConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inbound role string.
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Set the source address.
    pub fn source(mut self, source: Ipv4Addr) -> Self {
        self.source = source;
        self
    }

    /// Set the port list.
    pub fn ports(mut self, ports: impl Into<Vec<u16>>) -> Self {
        self.ports = ports.into();
        self
    }

    /// Set the subscription filter.
    pub fn topic_filter(mut self, filter: impl Into<String>) -> Self {
        self.topic_filter = filter.into();
        self
    }

    /// Set the output directory.
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    /// Set the writer buffer size.
    pub fn buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Set the readiness wait bound.
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Readiness wait bound as a [`Duration`].
    pub fn poll_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Reject values the capture engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_capacity < MIN_BUFFER_CAPACITY {
            return Err(BagError::Config(format!(
                "buffer capacity {} is below the {} byte frame header",
                self.buffer_capacity, MIN_BUFFER_CAPACITY
            )));
        }
        if self.ports.is_empty() {
            return Err(BagError::Config("no port configured".to_string()));
        }
        Ok(())
    }

    /// Endpoint identities in port order.
    pub fn endpoint_keys(&self) -> Vec<EndpointKey> {
        self.ports
            .iter()
            .map(|&port| EndpointKey::from((self.source, port)))
            .collect()
    }
}

/// Replay engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Recording to replay.
    pub file: PathBuf,
    /// Outbound role (`pub` or `req`).
    pub mode: String,
    /// Scheduler tick in milliseconds.
    pub tick_ms: u64,
    /// Finish once every frame has been dispatched instead of idling.
    pub exit_at_eof: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from(DEFAULT_REPLAY_FILE),
            mode: DEFAULT_REPLAY_MODE.to_string(),
            tick_ms: DEFAULT_TICK_MS,
            exit_at_eof: false,
        }
    }
}

impl ReplayConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recording path.
    pub fn file(mut self, file: impl Into<PathBuf>) -> Self {
        self.file = file.into();
        self
    }

    /// Set the outbound role string.
    pub fn mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = mode.into();
        self
    }

    /// Set the scheduler tick.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick_ms = u64::try_from(tick.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Finish at end of file.
    pub fn exit_at_eof(mut self, exit: bool) -> Self {
        self.exit_at_eof = exit;
        self
    }

    /// Scheduler tick as a [`Duration`].
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Scheduler tick in the recording's u32 millisecond units.
    ///
    /// Fails for a zero tick, which would never advance the replay clock,
    /// and for ticks that do not fit in a u32.
    pub fn tick_millis(&self) -> Result<u32> {
        let millis = u32::try_from(self.tick_ms)
            .map_err(|_| BagError::Config(format!("tick of {} ms is too large", self.tick_ms)))?;
        if millis == 0 {
            return Err(BagError::Config("tick must be at least 1 ms".to_string()));
        }
        Ok(millis)
    }

    /// Reject values the replay engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.tick_millis().map(|_| ())
    }
}

/// Parse a port list such as `"9090,9091"`.
///
/// Empty segments are skipped; the list must name at least one port.
pub fn parse_ports(s: &str) -> Result<Vec<u16>> {
    let ports = s
        .split(PORT_SEPARATOR)
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .parse::<u16>()
                .map_err(|e| BagError::Config(format!("invalid port {:?}: {}", segment, e)))
        })
        .collect::<Result<Vec<_>>>()?;

    if ports.is_empty() {
        return Err(BagError::Config(format!("no port in {:?}", s)));
    }
    Ok(ports)
}
