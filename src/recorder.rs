//! Capture engine: live messages in, recording out.
//!
//! ```text
//!  endpoint 0 ─┐
//!  endpoint 1 ─┼─► poll (select_all, 1 s bound) ─► batch in id order ─► Frame ─► FrameWriter ─► file
//!  endpoint N ─┘
//! ```
//!
//! [`Recorder::init`] resolves the mode, opens one endpoint per configured
//! port and prepares the writer. [`Recorder::run`] moves all of that into a
//! single worker task, so the writer has exactly one owner. [`Recorder::stop`]
//! triggers shutdown and joins the worker, which closes every endpoint and
//! drains the writer after its last write.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zmq_bag::{Recorder, RecorderConfig, ZmqTransport};
//!
//! let mut recorder = Recorder::new(RecorderConfig::default(), Arc::new(ZmqTransport::new()));
//! recorder.init().await?;
//! recorder.run()?;
//! tokio::signal::ctrl_c().await?;
//! let stats = recorder.stop().await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Local;
use futures::future::{select_all, FutureExt};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::clock::{recording_file_name, MonotonicClock};
use crate::config::RecorderConfig;
use crate::error::{BagError, Result};
use crate::lifecycle::{shutdown_channel, EngineState, ShutdownSignal, ShutdownTrigger};
use crate::protocol::Frame;
use crate::registry::{EndpointId, EndpointRegistry};
use crate::transport::{BoxFuture, EndpointKey, Multipart, Role, SocketOptions, Transport};
use crate::writer::{FrameWriter, WriterStats};

/// Counters for one capture session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    /// Frames written to the recording.
    pub frames: u64,
    /// Encoded bytes of those frames.
    pub bytes: u64,
    /// Polls that hit the timeout with nothing ready.
    pub poll_timeouts: u64,
    /// Events whose endpoint had no registered identity.
    pub unknown_endpoints: u64,
    /// Failed receives.
    pub recv_errors: u64,
    /// Messages with no parts.
    pub empty_messages: u64,
    /// Replies sent on request-reply endpoints.
    pub acks: u64,
    /// Writer counters.
    pub writer: WriterStats,
}

/// One readiness event: the endpoint and what its receive produced.
type PollEvent = (EndpointId, Result<Multipart>);

/// Everything the capture worker owns.
struct CaptureSession {
    registry: EndpointRegistry,
    writer: FrameWriter,
    clock: MonotonicClock,
    poll_timeout: Duration,
    stats: CaptureStats,
}

impl CaptureSession {
    /// Worker body. Runs until shutdown or a fatal error.
    async fn run(mut self, mut shutdown: ShutdownSignal) -> Result<CaptureStats> {
        tracing::info!(
            endpoints = self.registry.len(),
            path = %self.writer.path().display(),
            "Capture worker started"
        );

        let outcome = loop {
            if shutdown.is_triggered() {
                break Ok(());
            }

            let events = tokio::select! {
                _ = shutdown.triggered() => break Ok(()),
                events = poll_endpoints(&mut self.registry, self.poll_timeout) => events,
            };

            if events.is_empty() {
                self.stats.poll_timeouts += 1;
                tracing::debug!("Poll timeout, no endpoint ready");
                continue;
            }

            if let Err(e) = self.record_batch(events).await {
                tracing::error!(error = %e, "Capture session failed");
                break Err(e);
            }
        };

        self.finish(outcome).await
    }

    /// Record every event of one poll iteration, in endpoint id order.
    async fn record_batch(&mut self, events: Vec<PollEvent>) -> Result<()> {
        for (id, received) in events {
            let Some((key, role)) = self.registry.get(id).map(|ep| (ep.key(), ep.role())) else {
                self.stats.unknown_endpoints += 1;
                tracing::warn!(error = %BagError::EndpointNotFound(id.get()), "Dropping event");
                continue;
            };

            let parts = match received {
                Ok(parts) => parts,
                Err(e) => {
                    self.stats.recv_errors += 1;
                    tracing::warn!(endpoint = %key, error = %e, "Receive failed");
                    continue;
                }
            };

            self.record_message(key, parts).await?;

            if role == Role::RequestReplyServer {
                self.acknowledge(id).await;
            }
        }
        Ok(())
    }

    /// Turn one multipart message into a frame and write it.
    async fn record_message(&mut self, source: EndpointKey, parts: Multipart) -> Result<()> {
        let timestamp = self.clock.now_millis();
        let part_count = parts.len();
        let mut parts = parts.into_iter();

        let (topic, payload) = match (parts.next(), parts.next()) {
            (None, _) => {
                self.stats.empty_messages += 1;
                tracing::debug!(endpoint = %source, "Skipping message with no parts");
                return Ok(());
            }
            (Some(payload), None) => (None, payload),
            (Some(topic), Some(payload)) => (Some(topic), payload),
        };
        if part_count > 2 {
            tracing::warn!(
                endpoint = %source,
                parts = part_count,
                "Only topic and payload are recorded, dropping extra parts"
            );
        }

        let frame = Frame::new(timestamp, source, topic, payload)?;
        self.writer.write_frame(&frame).await?;

        self.stats.frames += 1;
        self.stats.bytes += frame.encoded_len() as u64;
        tracing::debug!(
            endpoint = %source,
            timestamp,
            topic_len = frame.header.topic_length,
            payload_len = frame.header.payload_length,
            "Recorded frame"
        );
        Ok(())
    }

    /// Reply with an empty message so a request-reply socket can receive again.
    async fn acknowledge(&mut self, id: EndpointId) {
        let Some(endpoint) = self.registry.get_mut(id) else {
            return;
        };
        match endpoint.send(vec![Bytes::new()]).await {
            Ok(()) => self.stats.acks += 1,
            Err(e) => {
                tracing::warn!(endpoint = %endpoint.key(), error = %e, "Failed to acknowledge request")
            }
        }
    }

    /// Close endpoints, then drain and close the writer.
    async fn finish(mut self, outcome: Result<()>) -> Result<CaptureStats> {
        self.registry.close_all().await;
        let closed = self.writer.close().await;
        self.stats.writer = self.writer.stats();

        tracing::info!(
            frames = self.stats.frames,
            bytes = self.stats.writer.bytes_written,
            flushes = self.stats.writer.flushes,
            "Capture worker stopped"
        );

        outcome?;
        closed?;
        Ok(self.stats)
    }
}

/// Wait for any endpoint to produce a message, bounded by `timeout`.
///
/// After the first ready endpoint, every other endpoint is polled once
/// without blocking. Events come back sorted by endpoint id. An empty vector
/// means the wait timed out.
async fn poll_endpoints(registry: &mut EndpointRegistry, timeout: Duration) -> Vec<PollEvent> {
    if registry.is_empty() {
        tokio::time::sleep(timeout).await;
        return Vec::new();
    }

    let pending: Vec<BoxFuture<'_, PollEvent>> = registry
        .endpoints_mut()
        .iter_mut()
        .map(|endpoint| {
            let id = endpoint.id();
            Box::pin(async move { (id, endpoint.recv().await) }) as BoxFuture<'_, PollEvent>
        })
        .collect();

    let (first, _, rest) = match tokio::time::timeout(timeout, select_all(pending)).await {
        Ok(ready) => ready,
        Err(_) => return Vec::new(),
    };

    let mut events = Vec::with_capacity(rest.len() + 1);
    events.push(first);
    events.extend(rest.into_iter().filter_map(FutureExt::now_or_never));
    events.sort_by_key(|(id, _)| *id);
    events
}

/// Capture engine.
pub struct Recorder {
    config: RecorderConfig,
    transport: Arc<dyn Transport>,
    state: EngineState,
    initialized: bool,
    session: Option<CaptureSession>,
    recording_path: Option<PathBuf>,
    shutdown: Option<ShutdownTrigger>,
    worker: Option<JoinHandle<Result<CaptureStats>>>,
}

impl Recorder {
    /// Create an engine. Nothing is opened until [`init`](Self::init).
    pub fn new(config: RecorderConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: EngineState::Initial,
            initialized: false,
            session: None,
            recording_path: None,
            shutdown: None,
            worker: None,
        }
    }

    /// Resolve the mode, open every configured endpoint and prepare the writer.
    ///
    /// An invalid config, an unsupported mode or a failure to open any
    /// endpoint is logged and leaves the engine inert: it still runs and
    /// stops, but records nothing.
    /// Only calling `init` twice or after `run` is an error.
    pub async fn init(&mut self) -> Result<()> {
        self.state.ensure(EngineState::Initial, "init")?;
        if self.initialized {
            return Err(BagError::InvalidState("recorder already initialized".to_string()));
        }
        self.initialized = true;

        match self.open_session().await {
            Ok(session) => {
                self.recording_path = Some(session.writer.path().to_path_buf());
                self.session = Some(session);
            }
            Err(e) => {
                tracing::error!(mode = %self.config.mode, error = %e, "Recorder left inert");
            }
        }
        Ok(())
    }

    async fn open_session(&self) -> Result<CaptureSession> {
        self.config.validate()?;
        let role: Role = self.config.mode.parse()?;
        if !role.is_inbound() {
            return Err(BagError::UnsupportedTransportMode(format!(
                "{} cannot be used for capture",
                role
            )));
        }

        let options = SocketOptions::with_topic_filter(self.config.topic_filter.clone());
        let mut registry = EndpointRegistry::with_options(self.transport.clone(), options);
        for key in self.config.endpoint_keys() {
            registry.get_or_create(key, role).await?;
        }

        let path = self
            .config
            .output_dir
            .join(recording_file_name(Local::now()));
        let writer = FrameWriter::with_capacity(path, self.config.buffer_capacity);

        Ok(CaptureSession {
            registry,
            writer,
            clock: MonotonicClock::new(),
            poll_timeout: self.config.poll_timeout_duration(),
            stats: CaptureStats::default(),
        })
    }

    /// Start the capture worker.
    pub fn run(&mut self) -> Result<()> {
        self.state.ensure(EngineState::Initial, "run")?;
        self.state = EngineState::Running;

        let Some(session) = self.session.take() else {
            tracing::warn!("Recorder is inert, no worker started");
            return Ok(());
        };

        let (trigger, signal) = shutdown_channel();
        self.shutdown = Some(trigger);
        self.worker = Some(tokio::spawn(session.run(signal)));
        tracing::info!("Recorder running");
        Ok(())
    }

    /// Stop the worker and wait for it to close the recording.
    ///
    /// Returns the session counters, or the fatal error that ended the
    /// session early.
    pub async fn stop(&mut self) -> Result<CaptureStats> {
        self.state.ensure(EngineState::Running, "stop")?;
        self.state = EngineState::Stopping;

        if let Some(trigger) = self.shutdown.take() {
            trigger.trigger();
        }
        let outcome = match self.worker.take() {
            Some(worker) => worker.await.map_err(BagError::from).and_then(|r| r),
            None => Ok(CaptureStats::default()),
        };

        self.state = EngineState::Stopped;
        tracing::info!("Recorder stopped");
        outcome
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether `init` left the engine without a session.
    pub fn is_inert(&self) -> bool {
        self.initialized && self.recording_path.is_none()
    }

    /// Recording path, once `init` succeeded. The file itself is created on
    /// the first write.
    pub fn recording_path(&self) -> Option<&Path> {
        self.recording_path.as_deref()
    }

    /// Engine configuration.
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEADER_SIZE;
    use crate::transport::LoopbackTransport;
    use std::net::Ipv4Addr;

    fn source_key(port: u16) -> EndpointKey {
        EndpointKey::from((Ipv4Addr::new(10, 0, 0, 5), port))
    }

    fn config(dir: &Path) -> RecorderConfig {
        RecorderConfig::new()
            .source(Ipv4Addr::new(10, 0, 0, 5))
            .ports(vec![9090])
            .output_dir(dir)
            .poll_timeout(Duration::from_millis(20))
    }

    async fn capture(
        config: RecorderConfig,
        transport: &LoopbackTransport,
    ) -> (Recorder, Result<CaptureStats>) {
        let mut recorder = Recorder::new(config, Arc::new(transport.clone()));
        recorder.init().await.unwrap();
        recorder.run().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stats = recorder.stop().await;
        (recorder, stats)
    }

    #[tokio::test]
    async fn test_records_topic_and_payload_layout() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        transport.inject(
            source_key(9090),
            vec![
                Bytes::from_static(b"alpha"),
                Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
            ],
        );

        let (recorder, stats) = capture(config(dir.path()), &transport).await;
        let stats = stats.unwrap();
        assert_eq!(stats.frames, 1);

        let bytes = std::fs::read(recorder.recording_path().unwrap()).unwrap();
        let expected: &[u8] = &[
            0x05, 0x00, 0x00, 0x0A, // 10.0.0.5
            0x82, 0x23, // 9090
            0x05, 0x00, // topic_length
            0x04, 0x00, // payload_length
            b'a', b'l', b'p', b'h', b'a', //
            0xDE, 0xAD, 0xBE, 0xEF,
        ];
        assert_eq!(bytes.len(), 4 + expected.len());
        assert_eq!(&bytes[4..], expected);
    }

    #[tokio::test]
    async fn test_single_part_is_topicless() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        transport.inject(source_key(9090), vec![Bytes::from_static(b"solo")]);

        let (recorder, stats) = capture(config(dir.path()), &transport).await;
        assert_eq!(stats.unwrap().frames, 1);

        let bytes = std::fs::read(recorder.recording_path().unwrap()).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 4);
        assert_eq!(&bytes[10..12], &[0, 0]);
        assert_eq!(&bytes[12..14], &[4, 0]);
        assert_eq!(&bytes[HEADER_SIZE..], b"solo");
    }

    #[tokio::test]
    async fn test_batch_follows_registration_order() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        transport.inject(source_key(9090), vec![Bytes::from_static(b"second")]);
        transport.inject(source_key(9091), vec![Bytes::from_static(b"first")]);

        let config = config(dir.path()).ports(vec![9091, 9090]);
        let (recorder, stats) = capture(config, &transport).await;
        assert_eq!(stats.unwrap().frames, 2);

        let bytes = std::fs::read(recorder.recording_path().unwrap()).unwrap();
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), 9091);
        assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 5], b"first");
        let second = HEADER_SIZE + 5;
        assert_eq!(u16::from_le_bytes([bytes[second + 8], bytes[second + 9]]), 9090);
    }

    #[tokio::test]
    async fn test_request_reply_server_acknowledges() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        transport.inject(source_key(9090), vec![Bytes::from_static(b"ping")]);

        let (_, stats) = capture(config(dir.path()).mode("rep"), &transport).await;
        let stats = stats.unwrap();

        assert_eq!(stats.acks, 1);
        assert_eq!(transport.sent(source_key(9090)), vec![vec![Bytes::new()]]);
    }

    #[tokio::test]
    async fn test_empty_session_creates_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();

        let (recorder, stats) = capture(config(dir.path()), &transport).await;
        let stats = stats.unwrap();

        assert_eq!(stats.frames, 0);
        assert!(stats.poll_timeouts >= 1);
        assert!(!recorder.recording_path().unwrap().exists());
        assert_eq!(transport.closed_count(), 1);
    }

    #[tokio::test]
    async fn test_oversized_message_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        transport.inject(source_key(9090), vec![Bytes::from_static(b"ok")]);
        transport.inject(source_key(9090), vec![Bytes::from(vec![0u8; 70_000])]);

        let (recorder, stats) = capture(config(dir.path()), &transport).await;

        assert!(matches!(stats, Err(BagError::FrameTooLarge { .. })));
        let bytes = std::fs::read(recorder.recording_path().unwrap()).unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 2);
        assert_eq!(recorder.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_unknown_mode_leaves_engine_inert() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        let mut recorder = Recorder::new(
            config(dir.path()).mode("dealer"),
            Arc::new(transport.clone()),
        );

        recorder.init().await.unwrap();
        assert!(recorder.is_inert());
        assert!(recorder.recording_path().is_none());

        recorder.run().unwrap();
        assert_eq!(recorder.state(), EngineState::Running);
        let stats = recorder.stop().await.unwrap();
        assert_eq!(stats, CaptureStats::default());
        assert_eq!(recorder.state(), EngineState::Stopped);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_outbound_mode_leaves_engine_inert() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(
            config(dir.path()).mode("pub"),
            Arc::new(LoopbackTransport::new()),
        );
        recorder.init().await.unwrap();
        assert!(recorder.is_inert());
    }

    #[tokio::test]
    async fn test_undersized_buffer_leaves_engine_inert() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::new();
        let mut recorder = Recorder::new(
            config(dir.path()).buffer_capacity(0),
            Arc::new(transport.clone()),
        );
        recorder.init().await.unwrap();
        assert!(recorder.is_inert());
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_transport_leaves_engine_inert() {
        let dir = tempfile::tempdir().unwrap();
        let transport = LoopbackTransport::with_roles(&[Role::Pull]);
        let mut recorder = Recorder::new(config(dir.path()), Arc::new(transport));
        recorder.init().await.unwrap();
        assert!(recorder.is_inert());
    }

    #[tokio::test]
    async fn test_lifecycle_order_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(config(dir.path()), Arc::new(LoopbackTransport::new()));

        assert!(matches!(recorder.stop().await, Err(BagError::InvalidState(_))));

        recorder.init().await.unwrap();
        assert!(matches!(recorder.init().await, Err(BagError::InvalidState(_))));

        recorder.run().unwrap();
        assert!(matches!(recorder.run(), Err(BagError::InvalidState(_))));

        recorder.stop().await.unwrap();
        assert!(matches!(recorder.stop().await, Err(BagError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_poll_timeout_returns_no_events() {
        let transport = LoopbackTransport::new();
        let mut registry = EndpointRegistry::new(Arc::new(transport));
        registry.get_or_create(source_key(1), Role::Pull).await.unwrap();

        let events = poll_endpoints(&mut registry, Duration::from_millis(10)).await;
        assert!(events.is_empty());
    }
}
