//! In-process transport backed by tokio channels.
//!
//! Every endpoint key owns a mailbox. [`LoopbackTransport::inject`] queues an
//! inbound message for whichever socket receives on that key, and every
//! message a socket sends is recorded and can be read back with
//! [`LoopbackTransport::sent`]. Request sockets are answered immediately with
//! an empty reply, standing in for a responsive peer, unless the transport
//! was built with [`LoopbackTransport::withhold_replies`].
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use zmq_bag::transport::{EndpointKey, LoopbackTransport};
//!
//! let transport = LoopbackTransport::new();
//! let key: EndpointKey = "10.0.0.5:9090".parse().unwrap();
//! transport.inject(key, vec![Bytes::from_static(b"alpha"), Bytes::from_static(b"body")]);
//! assert_eq!(transport.open_count(), 0);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{BoxFuture, EndpointKey, Multipart, Role, Socket, SocketOptions, Transport};
use crate::error::{BagError, Result};

/// URI scheme reported by the loopback transport.
const LOOPBACK_SCHEME: &str = "inproc";

struct Mailbox {
    tx: mpsc::UnboundedSender<Multipart>,
    rx: Option<mpsc::UnboundedReceiver<Multipart>>,
}

impl Mailbox {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Some(rx) }
    }
}

#[derive(Default)]
struct Shared {
    mailboxes: HashMap<EndpointKey, Mailbox>,
    sent: HashMap<EndpointKey, Vec<Multipart>>,
    opened: Vec<(Role, EndpointKey)>,
    closed: usize,
}

/// Channel-backed transport for tests and in-process pipelines.
///
/// Cheap to clone; clones share the same mailboxes and send log.
#[derive(Clone)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
    supported: Option<Arc<HashSet<Role>>>,
    withhold_replies: bool,
}

impl LoopbackTransport {
    /// Create a transport that supports every role.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            supported: None,
            withhold_replies: false,
        }
    }

    /// Create a transport that only supports the given roles.
    ///
    /// Opening any other role fails with `UnsupportedTransportMode`.
    pub fn with_roles(roles: &[Role]) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared::default())),
            supported: Some(Arc::new(roles.iter().copied().collect())),
            withhold_replies: false,
        }
    }

    /// Never answer request sockets, standing in for a peer that went away.
    pub fn withhold_replies(mut self) -> Self {
        self.withhold_replies = true;
        self
    }

    /// Queue an inbound message on `key`.
    pub fn inject(&self, key: EndpointKey, message: Multipart) {
        let mut shared = self.shared.lock();
        let mailbox = shared.mailboxes.entry(key).or_insert_with(Mailbox::new);
        // The receiver half lives in the mailbox or in an open socket, so the
        // channel cannot be closed here.
        let _ = mailbox.tx.send(message);
    }

    /// Every message sent on `key`, in send order.
    pub fn sent(&self, key: EndpointKey) -> Vec<Multipart> {
        self.shared
            .lock()
            .sent
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of messages sent across all endpoints.
    pub fn sent_count(&self) -> usize {
        self.shared.lock().sent.values().map(Vec::len).sum()
    }

    /// Every `(role, key)` a socket was opened for, in open order.
    pub fn opened(&self) -> Vec<(Role, EndpointKey)> {
        self.shared.lock().opened.clone()
    }

    /// Number of sockets opened so far.
    pub fn open_count(&self) -> usize {
        self.shared.lock().opened.len()
    }

    /// Number of sockets explicitly closed so far.
    pub fn closed_count(&self) -> usize {
        self.shared.lock().closed
    }

    fn supports(&self, role: Role) -> bool {
        self.supported
            .as_ref()
            .map_or(true, |roles| roles.contains(&role))
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn scheme(&self) -> &'static str {
        LOOPBACK_SCHEME
    }

    fn open<'a>(
        &'a self,
        role: Role,
        key: EndpointKey,
        _options: &'a SocketOptions,
    ) -> BoxFuture<'a, Result<Box<dyn Socket>>> {
        Box::pin(async move {
            if !self.supports(role) {
                return Err(BagError::UnsupportedTransportMode(role.to_string()));
            }

            let mut shared = self.shared.lock();
            let inbox = if role == Role::Publish {
                None
            } else {
                let mailbox = shared.mailboxes.entry(key).or_insert_with(Mailbox::new);
                Some(mailbox.rx.take().ok_or_else(|| {
                    BagError::Transport(format!("loopback endpoint {} already in use", key))
                })?)
            };
            shared.opened.push((role, key));

            Ok(Box::new(LoopbackSocket {
                key,
                role,
                inbox,
                withhold_replies: self.withhold_replies,
                shared: self.shared.clone(),
            }) as Box<dyn Socket>)
        })
    }
}

struct LoopbackSocket {
    key: EndpointKey,
    role: Role,
    inbox: Option<mpsc::UnboundedReceiver<Multipart>>,
    withhold_replies: bool,
    shared: Arc<Mutex<Shared>>,
}

impl Socket for LoopbackSocket {
    fn recv(&mut self) -> BoxFuture<'_, Result<Multipart>> {
        let (role, key) = (self.role, self.key);
        Box::pin(async move {
            if role == Role::Request {
                if self.withhold_replies {
                    return std::future::pending().await;
                }
                return Ok(vec![Bytes::new()]);
            }
            let inbox = self.inbox.as_mut().ok_or_else(|| {
                BagError::UnsupportedTransportMode(format!("{} sockets cannot receive", role))
            })?;
            inbox
                .recv()
                .await
                .ok_or_else(|| BagError::Transport(format!("loopback endpoint {} closed", key)))
        })
    }

    fn send(&mut self, message: Multipart) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if matches!(self.role, Role::Subscribe | Role::Pull) {
                return Err(BagError::UnsupportedTransportMode(format!(
                    "{} sockets cannot send",
                    self.role
                )));
            }
            if message.is_empty() {
                return Err(BagError::Transport(
                    "cannot send an empty multipart message".to_string(),
                ));
            }
            self.shared
                .lock()
                .sent
                .entry(self.key)
                .or_default()
                .push(message);
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        let LoopbackSocket {
            key, inbox, shared, ..
        } = *self;
        Box::pin(async move {
            let mut state = shared.lock();
            // Hand the mailbox back so the key can be opened again.
            if let (Some(rx), Some(mailbox)) = (inbox, state.mailboxes.get_mut(&key)) {
                mailbox.rx = Some(rx);
            }
            state.closed += 1;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(port: u16) -> EndpointKey {
        EndpointKey::new(0x7F00_0001, port)
    }

    #[tokio::test]
    async fn test_inject_then_receive() {
        let transport = LoopbackTransport::new();
        transport.inject(key(1), vec![Bytes::from_static(b"payload")]);

        let mut socket = transport
            .open(Role::Subscribe, key(1), &SocketOptions::default())
            .await
            .unwrap();
        let parts = socket.recv().await.unwrap();
        assert_eq!(parts, vec![Bytes::from_static(b"payload")]);
    }

    #[tokio::test]
    async fn test_send_is_recorded_per_key() {
        let transport = LoopbackTransport::new();
        let mut socket = transport
            .open(Role::Publish, key(2), &SocketOptions::default())
            .await
            .unwrap();

        socket
            .send(vec![Bytes::from_static(b"t"), Bytes::from_static(b"p")])
            .await
            .unwrap();

        assert_eq!(transport.sent(key(2)).len(), 1);
        assert!(transport.sent(key(3)).is_empty());
        assert_eq!(transport.sent_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_cannot_receive() {
        let transport = LoopbackTransport::new();
        let mut socket = transport
            .open(Role::Publish, key(4), &SocketOptions::default())
            .await
            .unwrap();
        assert!(matches!(
            socket.recv().await,
            Err(BagError::UnsupportedTransportMode(_))
        ));
    }

    #[tokio::test]
    async fn test_subscribe_cannot_send() {
        let transport = LoopbackTransport::new();
        let mut socket = transport
            .open(Role::Subscribe, key(5), &SocketOptions::default())
            .await
            .unwrap();
        assert!(socket.send(vec![Bytes::new()]).await.is_err());
    }

    #[tokio::test]
    async fn test_restricted_roles() {
        let transport = LoopbackTransport::with_roles(&[Role::Subscribe]);
        let result = transport
            .open(Role::Pull, key(6), &SocketOptions::default())
            .await;
        assert!(matches!(result, Err(BagError::UnsupportedTransportMode(_))));
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_request_socket_gets_reply() {
        let transport = LoopbackTransport::new();
        let mut socket = transport
            .open(Role::Request, key(7), &SocketOptions::default())
            .await
            .unwrap();
        socket.send(vec![Bytes::from_static(b"ping")]).await.unwrap();
        assert_eq!(socket.recv().await.unwrap(), vec![Bytes::new()]);
    }

    #[tokio::test]
    async fn test_withheld_reply_never_arrives() {
        let transport = LoopbackTransport::new().withhold_replies();
        let mut socket = transport
            .open(Role::Request, key(9), &SocketOptions::default())
            .await
            .unwrap();
        socket.send(vec![Bytes::from_static(b"ping")]).await.unwrap();

        let reply =
            tokio::time::timeout(std::time::Duration::from_millis(20), socket.recv()).await;
        assert!(reply.is_err());
    }

    #[tokio::test]
    async fn test_key_reusable_after_close() {
        let transport = LoopbackTransport::new();
        let socket = transport
            .open(Role::Subscribe, key(10), &SocketOptions::default())
            .await
            .unwrap();
        socket.close().await.unwrap();

        transport.inject(key(10), vec![Bytes::from_static(b"later")]);
        let mut socket = transport
            .open(Role::Subscribe, key(10), &SocketOptions::default())
            .await
            .unwrap();
        assert_eq!(socket.recv().await.unwrap(), vec![Bytes::from_static(b"later")]);
    }

    #[tokio::test]
    async fn test_close_counts() {
        let transport = LoopbackTransport::new();
        let socket = transport
            .open(Role::Pull, key(8), &SocketOptions::default())
            .await
            .unwrap();
        socket.close().await.unwrap();
        assert_eq!(transport.closed_count(), 1);
    }
}
