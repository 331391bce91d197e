//! # zmq-bag
//!
//! Record ZeroMQ traffic to a flat binary file and replay it later with the
//! original timing and destinations.
//!
//! ## Architecture
//!
//! - **Recorder**: polls every configured endpoint, turns each message into a
//!   [`Frame`](protocol::Frame) and appends it through a buffered
//!   [`FrameWriter`](writer::FrameWriter)
//! - **Replayer**: reads frames back in order and sends each one when the
//!   replay clock reaches its recorded timestamp, creating output endpoints
//!   on first use
//!
//! Both engines run one tokio worker task each and talk to the network through
//! the [`Transport`](transport::Transport) trait, so the same engines run over
//! ZeroMQ ([`ZmqTransport`]) or in-process channels ([`LoopbackTransport`]).
//!
//! ## Recording format
//!
//! A recording is a bare sequence of frames, little-endian, no padding:
//!
//! ```text
//! timestamp:u32 | address:u32 | port:u16 | topic_len:u16 | payload_len:u16 | topic | payload
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zmq_bag::{Replayer, ReplayConfig, ZmqTransport};
//!
//! #[tokio::main]
//! async fn main() -> zmq_bag::Result<()> {
//!     let config = ReplayConfig::new().file("zmq_rec_2024-03-07_09-05-02.bin").exit_at_eof(true);
//!     let mut replayer = Replayer::new(config, Arc::new(ZmqTransport::new()));
//!     replayer.init().await?;
//!     replayer.run()?;
//!     replayer.finished().await;
//!     replayer.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod recorder;
pub mod registry;
pub mod replayer;
pub mod transport;
pub mod writer;

pub use config::{RecorderConfig, ReplayConfig};
pub use error::{BagError, Result};
pub use lifecycle::EngineState;
pub use recorder::{CaptureStats, Recorder};
pub use replayer::{Player, ReplayStats, Replayer};
pub use transport::{LoopbackTransport, ZmqTransport};
