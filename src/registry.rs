//! Endpoint registry for deduplicating sockets by identity.
//!
//! The registry maps `(address, port)` keys to live sockets and owns them.
//! IDs are assigned sequentially starting from 0, so ascending ID order is
//! registration order. Engines hold only [`EndpointId`]s.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zmq_bag::registry::EndpointRegistry;
//! use zmq_bag::transport::{Role, ZmqTransport};
//!
//! let mut registry = EndpointRegistry::new(Arc::new(ZmqTransport::new()));
//! let a = registry.get_or_create("10.0.0.5:9090".parse()?, Role::Publish).await?;
//! let b = registry.get_or_create("10.0.0.5:9090".parse()?, Role::Publish).await?;
//! assert_eq!(a, b);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{BagError, Result};
use crate::transport::{BoxFuture, EndpointKey, Multipart, Role, Socket, SocketOptions, Transport};

/// Opaque identifier assigned to an endpoint at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u32);

impl EndpointId {
    /// Raw numeric value.
    #[inline]
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A registered socket and its identity.
pub struct Endpoint {
    id: EndpointId,
    key: EndpointKey,
    role: Role,
    socket: Box<dyn Socket>,
}

impl Endpoint {
    /// Registration ID.
    #[inline]
    pub fn id(&self) -> EndpointId {
        self.id
    }

    /// `(address, port)` identity.
    #[inline]
    pub fn key(&self) -> EndpointKey {
        self.key
    }

    /// Transport role.
    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Receive the next message on this endpoint.
    pub async fn recv(&mut self) -> Result<Multipart> {
        self.socket.recv().await
    }

    /// Send a message on this endpoint.
    pub async fn send(&mut self, message: Multipart) -> Result<()> {
        self.socket.send(message).await
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Registry owning every endpoint of a session.
pub struct EndpointRegistry {
    /// Socket factory.
    transport: Arc<dyn Transport>,
    /// Options applied to every new socket.
    options: SocketOptions,
    /// Endpoints in registration order; index == ID.
    endpoints: Vec<Endpoint>,
    /// Key to ID mapping.
    by_key: HashMap<EndpointKey, EndpointId>,
}

impl EndpointRegistry {
    /// Create an empty registry.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_options(transport, SocketOptions::default())
    }

    /// Create an empty registry applying `options` to every socket.
    pub fn with_options(transport: Arc<dyn Transport>, options: SocketOptions) -> Self {
        Self {
            transport,
            options,
            endpoints: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Return the endpoint for `key`, creating its socket on first use.
    ///
    /// Idempotent for the same identity. If the transport cannot open the
    /// socket (for instance `UnsupportedTransportMode`), nothing is
    /// registered.
    pub async fn get_or_create(&mut self, key: EndpointKey, role: Role) -> Result<EndpointId> {
        if let Some(&id) = self.by_key.get(&key) {
            let existing = self.endpoints[id.0 as usize].role;
            if existing != role {
                tracing::warn!(
                    endpoint = %key,
                    %existing,
                    requested = %role,
                    "Endpoint already registered with a different role"
                );
            }
            return Ok(id);
        }

        let socket = self.transport.open(role, key, &self.options).await?;
        let id = EndpointId(self.endpoints.len() as u32);
        self.endpoints.push(Endpoint {
            id,
            key,
            role,
            socket,
        });
        self.by_key.insert(key, id);

        tracing::info!(
            endpoint = %key,
            uri = %key.uri(self.transport.scheme()),
            %role,
            %id,
            "Registered endpoint"
        );
        Ok(id)
    }

    /// Look up an ID by key.
    pub fn lookup(&self, key: EndpointKey) -> Option<EndpointId> {
        self.by_key.get(&key).copied()
    }

    /// Get an endpoint by ID.
    pub fn get(&self, id: EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(id.0 as usize)
    }

    /// Get a mutable endpoint by ID.
    pub fn get_mut(&mut self, id: EndpointId) -> Option<&mut Endpoint> {
        self.endpoints.get_mut(id.0 as usize)
    }

    /// All endpoints in registration order.
    pub fn endpoints_mut(&mut self) -> &mut [Endpoint] {
        &mut self.endpoints
    }

    /// Iterate endpoints in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Number of registered endpoints.
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Check if no endpoint is registered.
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Replace the socket behind `id` with a fresh one for the same key and
    /// role. The ID stays valid.
    ///
    /// The old socket is closed first so a bound address is free again. If
    /// the new socket cannot be opened, the endpoint is left detached and
    /// every send or receive on it fails.
    pub async fn reopen(&mut self, id: EndpointId) -> Result<()> {
        let endpoint = self
            .endpoints
            .get_mut(id.0 as usize)
            .ok_or(BagError::EndpointNotFound(id.0))?;

        let stale = std::mem::replace(&mut endpoint.socket, Box::new(Detached));
        if let Err(e) = stale.close().await {
            tracing::warn!(endpoint = %endpoint.key, error = %e, "Failed to close endpoint");
        }
        endpoint.socket = self
            .transport
            .open(endpoint.role, endpoint.key, &self.options)
            .await?;

        tracing::info!(endpoint = %endpoint.key, %id, "Reopened endpoint");
        Ok(())
    }

    /// Close every socket and empty the registry.
    pub async fn close_all(&mut self) {
        self.by_key.clear();
        for endpoint in self.endpoints.drain(..) {
            if let Err(e) = endpoint.socket.close().await {
                tracing::warn!(endpoint = %endpoint.key, error = %e, "Failed to close endpoint");
            }
        }
    }
}

/// Stand-in for a socket that failed to reopen.
struct Detached;

impl Socket for Detached {
    fn recv(&mut self) -> BoxFuture<'_, Result<Multipart>> {
        Box::pin(async { Err(BagError::Transport("endpoint is detached".to_string())) })
    }

    fn send(&mut self, _message: Multipart) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Err(BagError::Transport("endpoint is detached".to_string())) })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BagError;
    use crate::transport::LoopbackTransport;

    fn key(port: u16) -> EndpointKey {
        EndpointKey::new(0x0A00_0005, port)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let transport = LoopbackTransport::new();
        let mut registry = EndpointRegistry::new(Arc::new(transport.clone()));

        let first = registry.get_or_create(key(9090), Role::Publish).await.unwrap();
        let second = registry.get_or_create(key(9090), Role::Publish).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test]
    async fn test_ids_follow_registration_order() {
        let mut registry = EndpointRegistry::new(Arc::new(LoopbackTransport::new()));

        let a = registry.get_or_create(key(3), Role::Subscribe).await.unwrap();
        let b = registry.get_or_create(key(1), Role::Subscribe).await.unwrap();
        let c = registry.get_or_create(key(2), Role::Subscribe).await.unwrap();

        assert_eq!((a.get(), b.get(), c.get()), (0, 1, 2));
        let keys: Vec<_> = registry.iter().map(Endpoint::key).collect();
        assert_eq!(keys, vec![key(3), key(1), key(2)]);
    }

    #[tokio::test]
    async fn test_unsupported_role_not_registered() {
        let transport = LoopbackTransport::with_roles(&[Role::Subscribe]);
        let mut registry = EndpointRegistry::new(Arc::new(transport));

        let result = registry.get_or_create(key(9090), Role::Publish).await;
        assert!(matches!(result, Err(BagError::UnsupportedTransportMode(_))));
        assert!(registry.is_empty());
        assert!(registry.lookup(key(9090)).is_none());
    }

    #[tokio::test]
    async fn test_lookup_and_get() {
        let mut registry = EndpointRegistry::new(Arc::new(LoopbackTransport::new()));
        let id = registry.get_or_create(key(7), Role::Pull).await.unwrap();

        assert_eq!(registry.lookup(key(7)), Some(id));
        let endpoint = registry.get(id).unwrap();
        assert_eq!(endpoint.key(), key(7));
        assert_eq!(endpoint.role(), Role::Pull);
        assert!(registry.get(EndpointId(42)).is_none());
    }

    #[tokio::test]
    async fn test_close_all() {
        let transport = LoopbackTransport::new();
        let mut registry = EndpointRegistry::new(Arc::new(transport.clone()));
        registry.get_or_create(key(1), Role::Publish).await.unwrap();
        registry.get_or_create(key(2), Role::Publish).await.unwrap();

        registry.close_all().await;

        assert!(registry.is_empty());
        assert_eq!(transport.closed_count(), 2);
    }

    #[tokio::test]
    async fn test_reopen_keeps_id() {
        let transport = LoopbackTransport::new();
        let mut registry = EndpointRegistry::new(Arc::new(transport.clone()));
        let id = registry.get_or_create(key(6), Role::Pull).await.unwrap();

        registry.reopen(id).await.unwrap();

        assert_eq!(registry.lookup(key(6)), Some(id));
        assert_eq!(registry.len(), 1);
        assert_eq!(transport.open_count(), 2);
        assert_eq!(transport.closed_count(), 1);

        // The fresh socket still receives on the same key.
        transport.inject(key(6), vec![bytes::Bytes::from_static(b"again")]);
        let parts = registry.get_mut(id).unwrap().recv().await.unwrap();
        assert_eq!(&parts[0][..], b"again");
    }

    #[tokio::test]
    async fn test_reopen_unknown_id() {
        let mut registry = EndpointRegistry::new(Arc::new(LoopbackTransport::new()));
        assert!(matches!(
            registry.reopen(EndpointId(3)).await,
            Err(BagError::EndpointNotFound(3))
        ));
    }

    #[tokio::test]
    async fn test_endpoint_send_recv() {
        let transport = LoopbackTransport::new();
        let mut registry = EndpointRegistry::new(Arc::new(transport.clone()));

        transport.inject(key(5), vec![bytes::Bytes::from_static(b"hi")]);
        let id = registry.get_or_create(key(5), Role::Subscribe).await.unwrap();
        let parts = registry.get_mut(id).unwrap().recv().await.unwrap();
        assert_eq!(&parts[0][..], b"hi");
    }
}
