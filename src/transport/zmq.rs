//! ZeroMQ transport built on the pure-Rust `zeromq` crate.
//!
//! | Role                   | Socket | Action  |
//! |------------------------|--------|---------|
//! | `Subscribe`            | SUB    | connect |
//! | `RequestReplyServer`   | REP    | connect |
//! | `Pull`                 | PULL   | connect |
//! | `Publish`              | PUB    | bind    |
//! | `Request`              | REQ    | bind    |

use zeromq::{
    PubSocket, PullSocket, RepSocket, ReqSocket, Socket as _, SocketRecv, SocketSend, SubSocket,
    ZmqMessage,
};

use super::{BoxFuture, EndpointKey, Multipart, Role, Socket, SocketOptions, Transport};
use crate::error::{BagError, Result};

/// URI scheme for ZeroMQ endpoints.
pub const ZMQ_SCHEME: &str = "tcp";

/// ZeroMQ-backed transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZmqTransport;

impl ZmqTransport {
    /// Create a new ZeroMQ transport.
    pub fn new() -> Self {
        Self
    }
}

impl Transport for ZmqTransport {
    fn scheme(&self) -> &'static str {
        ZMQ_SCHEME
    }

    fn open<'a>(
        &'a self,
        role: Role,
        key: EndpointKey,
        options: &'a SocketOptions,
    ) -> BoxFuture<'a, Result<Box<dyn Socket>>> {
        Box::pin(async move {
            let uri = key.uri(ZMQ_SCHEME);
            let socket = match role {
                Role::Subscribe => {
                    let mut sock = SubSocket::new();
                    attach(&mut sock, role, &uri).await?;
                    sock.subscribe(&options.topic_filter).await?;
                    ZmqSocket::Sub(sock)
                }
                Role::RequestReplyServer => {
                    let mut sock = RepSocket::new();
                    attach(&mut sock, role, &uri).await?;
                    ZmqSocket::Rep(sock)
                }
                Role::Pull => {
                    let mut sock = PullSocket::new();
                    attach(&mut sock, role, &uri).await?;
                    ZmqSocket::Pull(sock)
                }
                Role::Publish => {
                    let mut sock = PubSocket::new();
                    attach(&mut sock, role, &uri).await?;
                    ZmqSocket::Pub(sock)
                }
                Role::Request => {
                    let mut sock = ReqSocket::new();
                    attach(&mut sock, role, &uri).await?;
                    ZmqSocket::Req(sock)
                }
            };

            tracing::info!(%uri, %role, "Opened ZeroMQ socket");
            Ok(Box::new(socket) as Box<dyn Socket>)
        })
    }
}

/// Bind or connect `sock` to `uri` as `role` requires.
async fn attach<S: zeromq::Socket>(sock: &mut S, role: Role, uri: &str) -> Result<()> {
    if role.binds() {
        sock.bind(uri).await?;
    } else {
        sock.connect(uri).await?;
    }
    Ok(())
}

/// One concrete ZeroMQ socket per role.
enum ZmqSocket {
    Sub(SubSocket),
    Rep(RepSocket),
    Pull(PullSocket),
    Pub(PubSocket),
    Req(ReqSocket),
}

impl ZmqSocket {
    fn role(&self) -> Role {
        match self {
            ZmqSocket::Sub(_) => Role::Subscribe,
            ZmqSocket::Rep(_) => Role::RequestReplyServer,
            ZmqSocket::Pull(_) => Role::Pull,
            ZmqSocket::Pub(_) => Role::Publish,
            ZmqSocket::Req(_) => Role::Request,
        }
    }
}

fn to_message(parts: Multipart) -> Result<ZmqMessage> {
    ZmqMessage::try_from(parts)
        .map_err(|_| BagError::Transport("cannot send an empty multipart message".to_string()))
}

impl Socket for ZmqSocket {
    fn recv(&mut self) -> BoxFuture<'_, Result<Multipart>> {
        Box::pin(async move {
            let msg = match self {
                ZmqSocket::Sub(sock) => sock.recv().await?,
                ZmqSocket::Rep(sock) => sock.recv().await?,
                ZmqSocket::Pull(sock) => sock.recv().await?,
                ZmqSocket::Req(sock) => sock.recv().await?,
                ZmqSocket::Pub(_) => {
                    return Err(BagError::UnsupportedTransportMode(
                        "publish sockets cannot receive".to_string(),
                    ))
                }
            };
            Ok(msg.into_vec())
        })
    }

    fn send(&mut self, message: Multipart) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let msg = to_message(message)?;
            match self {
                ZmqSocket::Pub(sock) => sock.send(msg).await?,
                ZmqSocket::Req(sock) => sock.send(msg).await?,
                ZmqSocket::Rep(sock) => sock.send(msg).await?,
                ZmqSocket::Sub(_) | ZmqSocket::Pull(_) => {
                    return Err(BagError::UnsupportedTransportMode(
                        "subscribe and pull sockets cannot send".to_string(),
                    ))
                }
            }
            Ok(())
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let role = self.role();
            let errors = match *self {
                ZmqSocket::Sub(sock) => sock.close().await,
                ZmqSocket::Rep(sock) => sock.close().await,
                ZmqSocket::Pull(sock) => sock.close().await,
                ZmqSocket::Pub(sock) => sock.close().await,
                ZmqSocket::Req(sock) => sock.close().await,
            };
            if !errors.is_empty() {
                tracing::warn!(%role, errors = errors.len(), "Errors while closing ZeroMQ socket");
            }
            Ok(())
        })
    }
}
