//! Transport module - socket roles and the pluggable socket abstraction.
//!
//! Engines never talk to a messaging library directly. They open sockets
//! through a [`Transport`] and exchange multipart messages through the
//! object-safe [`Socket`] trait:
//!
//! - [`ZmqTransport`] - ZeroMQ over TCP (production)
//! - [`LoopbackTransport`] - in-process channels (tests, embedding)
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zmq_bag::transport::{EndpointKey, Role, SocketOptions, Transport, ZmqTransport};
//!
//! let transport: Arc<dyn Transport> = Arc::new(ZmqTransport::new());
//! let key: EndpointKey = "127.0.0.1:9090".parse()?;
//! let mut socket = transport.open(Role::Subscribe, key, &SocketOptions::default()).await?;
//! let parts = socket.recv().await?;
//! ```

mod address;
mod loopback;
mod zmq;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{BagError, Result};

pub use address::EndpointKey;
pub use loopback::LoopbackTransport;
pub use zmq::{ZmqTransport, ZMQ_SCHEME};

/// Boxed future returned by transport and socket operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A multipart message, usually `[topic, payload]`.
pub type Multipart = Vec<Bytes>;

/// Transport role of an endpoint.
///
/// Resolved once from a mode string when an engine initializes; the hot
/// path only ever matches on the enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Connect and subscribe (capture side).
    Subscribe,
    /// Connect and answer requests (capture side).
    RequestReplyServer,
    /// Connect and pull (capture side).
    Pull,
    /// Bind and publish (replay side).
    Publish,
    /// Bind and issue requests (replay side).
    Request,
}

impl Role {
    /// Roles that receive traffic and may feed a recording.
    #[inline]
    pub fn is_inbound(&self) -> bool {
        matches!(self, Role::Subscribe | Role::RequestReplyServer | Role::Pull)
    }

    /// Roles that send traffic and may carry a replay.
    #[inline]
    pub fn is_outbound(&self) -> bool {
        matches!(self, Role::Publish | Role::Request)
    }

    /// Whether the socket binds (true) or connects (false) to its endpoint.
    ///
    /// Capture sockets reach out to a remote source, so only the replay side
    /// binds.
    #[inline]
    pub fn binds(&self) -> bool {
        self.is_outbound()
    }

    /// Canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Subscribe => "subscribe",
            Role::RequestReplyServer => "request-reply-server",
            Role::Pull => "pull",
            Role::Publish => "publish",
            Role::Request => "request",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = BagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sub" | "subscribe" => Ok(Role::Subscribe),
            "rep" | "rcv" | "request-reply-server" => Ok(Role::RequestReplyServer),
            "pull" => Ok(Role::Pull),
            "pub" | "publish" => Ok(Role::Publish),
            "req" | "request" => Ok(Role::Request),
            other => Err(BagError::UnsupportedTransportMode(other.to_string())),
        }
    }
}

/// Per-socket options applied at creation time.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    /// Topic prefix filter for subscribe sockets (empty = everything).
    pub topic_filter: String,
}

impl SocketOptions {
    /// Options with the given subscription filter.
    pub fn with_topic_filter(filter: impl Into<String>) -> Self {
        Self {
            topic_filter: filter.into(),
        }
    }
}

/// A live socket. Owned by the endpoint registry.
pub trait Socket: Send {
    /// Receive the next multipart message.
    fn recv(&mut self) -> BoxFuture<'_, Result<Multipart>>;

    /// Send a multipart message.
    fn send(&mut self, message: Multipart) -> BoxFuture<'_, Result<()>>;

    /// Close the socket, releasing its bind/connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// Factory for sockets of a given role at a given endpoint.
pub trait Transport: Send + Sync + 'static {
    /// URI scheme used when rendering endpoints (e.g. `tcp`).
    fn scheme(&self) -> &'static str;

    /// Create a socket bound or connected according to `role`.
    fn open<'a>(
        &'a self,
        role: Role,
        key: EndpointKey,
        options: &'a SocketOptions,
    ) -> BoxFuture<'a, Result<Box<dyn Socket>>>;
}
