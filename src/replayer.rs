//! Replay engine: recording in, timed messages out.
//!
//! # Scheduling
//!
//! The [`Player`] keeps a virtual clock that starts at the first frame's
//! timestamp. Every tick it dispatches each frame whose timestamp is due,
//! then the clock advances by one tick:
//!
//! ```text
//! clock = ts(first)
//! loop {
//!     while ts(next) <= clock { dispatch(next) }   // catch-up
//!     sleep(tick); clock += tick
//! }
//! ```
//!
//! Frames recorded in a burst leave in the same tick; frames recorded far
//! apart are spread over as many ticks. Output endpoints are created the first
//! time a frame names their `(address, port)`, bound at that address.
//!
//! At end of file the worker keeps ticking with nothing to do until stopped,
//! unless [`ReplayConfig::exit_at_eof`] is set.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::config::ReplayConfig;
use crate::error::{BagError, Result};
use crate::lifecycle::{shutdown_channel, EngineState, ShutdownSignal, ShutdownTrigger};
use crate::protocol::{Frame, Header, RecordReader};
use crate::registry::EndpointRegistry;
use crate::transport::{EndpointKey, Role, Transport};

/// How long a request endpoint waits for the reply to each dispatch.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Counters for one replay session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplayStats {
    /// Frames handed to an endpoint.
    pub dispatched: u64,
    /// Frames read but not sent (endpoint unavailable or send failed).
    pub dropped: u64,
    /// Output endpoints created.
    pub endpoints: u64,
    /// Request endpoints that did not reply in time.
    pub missed_replies: u64,
    /// Ticks elapsed.
    pub ticks: u64,
}

/// Steppable replay scheduler.
///
/// The worker drives it with real sleeps; it can equally be driven by hand.
pub struct Player<R> {
    reader: RecordReader<R>,
    registry: EndpointRegistry,
    role: Role,
    /// Virtual clock in recorded milliseconds.
    clock: u32,
    /// Header of the next unread frame.
    next: Option<Header>,
    exhausted: bool,
    /// Keys whose endpoint could not be created.
    unreachable: HashSet<EndpointKey>,
    reply_timeout: Duration,
    stats: ReplayStats,
}

impl<R> Player<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a player sending with `role` on endpoints from `registry`.
    pub fn new(reader: RecordReader<R>, registry: EndpointRegistry, role: Role) -> Self {
        Self {
            reader,
            registry,
            role,
            clock: 0,
            next: None,
            exhausted: false,
            unreachable: HashSet::new(),
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            stats: ReplayStats::default(),
        }
    }

    /// Override how long request endpoints wait for a reply.
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Read the first header and start the clock at its timestamp.
    ///
    /// An empty recording leaves the player exhausted.
    pub async fn prime(&mut self) -> Result<()> {
        self.next = self.reader.next_header().await?;
        match self.next {
            Some(header) => {
                self.clock = header.timestamp;
                tracing::info!(start = header.timestamp, "Replay clock primed");
            }
            None => {
                self.exhausted = true;
                tracing::warn!("Recording is empty");
            }
        }
        Ok(())
    }

    /// Dispatch every frame that is due at the current clock.
    ///
    /// Returns how many frames were read. A truncated or unreadable frame
    /// fails the call before anything of it is sent.
    pub async fn catch_up(&mut self) -> Result<usize> {
        let mut count = 0;
        while let Some(header) = self.next {
            if !is_due(header.timestamp, self.clock) {
                break;
            }
            let frame = self.reader.read_body(header).await?;
            self.next = None;
            self.dispatch(frame).await;
            count += 1;

            self.next = self.reader.next_header().await?;
            if self.next.is_none() {
                self.exhausted = true;
                tracing::info!(
                    frames = self.reader.frames_read(),
                    "Reached end of recording"
                );
            }
        }
        Ok(count)
    }

    /// Move the virtual clock forward.
    pub fn advance(&mut self, millis: u32) {
        self.clock = self.clock.wrapping_add(millis);
        self.stats.ticks += 1;
    }

    /// Current virtual clock.
    pub fn clock(&self) -> u32 {
        self.clock
    }

    /// Whether every frame has been read.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Session counters.
    pub fn stats(&self) -> ReplayStats {
        self.stats
    }

    async fn dispatch(&mut self, frame: Frame) {
        let key = frame.source();
        if self.unreachable.contains(&key) {
            self.stats.dropped += 1;
            tracing::debug!(endpoint = %key, "Skipping frame for unreachable endpoint");
            return;
        }

        let known = self.registry.len();
        let id = match self.registry.get_or_create(key, self.role).await {
            Ok(id) => id,
            Err(e) => {
                self.stats.dropped += 1;
                self.unreachable.insert(key);
                tracing::warn!(endpoint = %key, error = %e, "Cannot create output endpoint");
                return;
            }
        };
        if self.registry.len() > known {
            self.stats.endpoints += 1;
        }
        let Some(endpoint) = self.registry.get_mut(id) else {
            self.stats.dropped += 1;
            tracing::warn!(error = %BagError::EndpointNotFound(id.get()), "Dropping frame");
            return;
        };

        let timestamp = frame.timestamp();
        if let Err(e) = endpoint.send(frame.into_multipart()).await {
            self.stats.dropped += 1;
            tracing::warn!(endpoint = %key, error = %e, "Send failed");
            return;
        }
        self.stats.dispatched += 1;
        tracing::debug!(endpoint = %key, timestamp, "Dispatched frame");

        if self.role != Role::Request {
            return;
        }
        match tokio::time::timeout(self.reply_timeout, endpoint.recv()).await {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => tracing::warn!(endpoint = %key, error = %e, "Reply failed"),
            Err(_) => tracing::warn!(endpoint = %key, "No reply within timeout"),
        }
        self.stats.missed_replies += 1;

        // A request socket still waiting for its reply cannot send again.
        if let Err(e) = self.registry.reopen(id).await {
            self.unreachable.insert(key);
            tracing::warn!(endpoint = %key, error = %e, "Cannot reopen request endpoint");
        }
    }
}

/// Whether a frame stamped `timestamp` is due at `clock`.
///
/// Compared as a signed distance so a recording that crosses the u32 wrap
/// still replays in order.
fn is_due(timestamp: u32, clock: u32) -> bool {
    (timestamp.wrapping_sub(clock) as i32) <= 0
}

/// Worker body: drive the player, then report its counters.
async fn replay_loop<R>(
    mut player: Player<R>,
    tick_ms: u32,
    exit_at_eof: bool,
    mut shutdown: ShutdownSignal,
) -> Result<ReplayStats>
where
    R: AsyncRead + Unpin + Send,
{
    tracing::info!(tick_ms, exit_at_eof, "Replay worker started");

    let outcome = drive(&mut player, tick_ms, exit_at_eof, &mut shutdown).await;

    let stats = player.stats();
    tracing::info!(
        dispatched = stats.dispatched,
        dropped = stats.dropped,
        endpoints = stats.endpoints,
        "Replay worker stopped"
    );

    match outcome {
        Ok(()) => Ok(stats),
        Err(e) => {
            tracing::error!(error = %e, "Replay session failed");
            Err(e)
        }
    }
}

/// Prime, then catch up once per tick until stopped.
async fn drive<R>(
    player: &mut Player<R>,
    tick_ms: u32,
    exit_at_eof: bool,
    shutdown: &mut ShutdownSignal,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let tick = Duration::from_millis(u64::from(tick_ms));
    player.prime().await?;
    loop {
        player.catch_up().await?;
        if exit_at_eof && player.is_exhausted() {
            tracing::info!("Replay finished");
            return Ok(());
        }
        tokio::select! {
            _ = shutdown.triggered() => return Ok(()),
            _ = tokio::time::sleep(tick) => {}
        }
        player.advance(tick_ms);
    }
}

/// Replay engine.
pub struct Replayer {
    config: ReplayConfig,
    transport: Arc<dyn Transport>,
    state: EngineState,
    initialized: bool,
    player: Option<Player<BufReader<File>>>,
    shutdown: Option<ShutdownTrigger>,
    worker: Option<JoinHandle<Result<ReplayStats>>>,
    outcome: Option<Result<ReplayStats>>,
}

impl Replayer {
    /// Create an engine. Nothing is opened until [`init`](Self::init).
    pub fn new(config: ReplayConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: EngineState::Initial,
            initialized: false,
            player: None,
            shutdown: None,
            worker: None,
            outcome: None,
        }
    }

    /// Validate the config, open the recording and check the output mode.
    ///
    /// An invalid tick, a missing file or a mode that cannot send is logged
    /// and leaves the engine inert.
    pub async fn init(&mut self) -> Result<()> {
        self.state.ensure(EngineState::Initial, "init")?;
        if self.initialized {
            return Err(BagError::InvalidState("replayer already initialized".to_string()));
        }
        self.initialized = true;

        match self.open_player().await {
            Ok(player) => self.player = Some(player),
            Err(e) => tracing::error!(
                file = %self.config.file.display(),
                mode = %self.config.mode,
                error = %e,
                "Replayer left inert"
            ),
        }
        Ok(())
    }

    async fn open_player(&self) -> Result<Player<BufReader<File>>> {
        self.config.validate()?;
        let reader = RecordReader::open(&self.config.file).await?;

        let role: Role = self.config.mode.parse()?;
        if !role.is_outbound() {
            return Err(BagError::UnsupportedTransportMode(format!(
                "{} cannot be used for replay",
                role
            )));
        }

        tracing::info!(file = %self.config.file.display(), %role, "Opened recording");
        let registry = EndpointRegistry::new(self.transport.clone());
        Ok(Player::new(reader, registry, role))
    }

    /// Start the replay worker.
    pub fn run(&mut self) -> Result<()> {
        self.state.ensure(EngineState::Initial, "run")?;
        self.state = EngineState::Running;

        let Some(player) = self.player.take() else {
            tracing::warn!("Replayer is inert, no worker started");
            return Ok(());
        };
        let tick_ms = self.config.tick_millis()?;

        let (trigger, signal) = shutdown_channel();
        self.shutdown = Some(trigger);
        self.worker = Some(tokio::spawn(replay_loop(
            player,
            tick_ms,
            self.config.exit_at_eof,
            signal,
        )));
        tracing::info!("Replayer running");
        Ok(())
    }

    /// Wait until the worker ends on its own.
    ///
    /// That happens at end of file when `exit_at_eof` is set, or on a fatal
    /// error. Returns at once if no worker is running. Safe to cancel.
    pub async fn finished(&mut self) {
        if let Some(worker) = self.worker.as_mut() {
            let joined = worker.await;
            self.worker = None;
            self.outcome = Some(joined.map_err(BagError::from).and_then(|r| r));
        }
    }

    /// Stop the worker and close the recording.
    ///
    /// Returns the session counters, or the fatal error that ended the
    /// session early.
    pub async fn stop(&mut self) -> Result<ReplayStats> {
        self.state.ensure(EngineState::Running, "stop")?;
        self.state = EngineState::Stopping;

        if let Some(trigger) = self.shutdown.take() {
            trigger.trigger();
        }
        self.finished().await;

        self.state = EngineState::Stopped;
        tracing::info!("Replayer stopped");
        self.outcome.take().unwrap_or_else(|| Ok(ReplayStats::default()))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether `init` left the engine without a recording to play.
    pub fn is_inert(&self) -> bool {
        self.initialized && self.player.is_none() && self.worker.is_none() && self.outcome.is_none()
    }

    /// Engine configuration.
    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }
}
