//! Transport wrapping applied to every accepted connection.
//!
//! TLS and similar layers are external collaborators. They plug in through
//! [`StreamWrapper`], which turns a raw [`TcpStream`] into whatever
//! bidirectional byte stream the server should talk over.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Bidirectional byte stream the server can split and own.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased transport returned by a [`StreamWrapper`].
pub type BoxedTransport = Box<dyn Transport>;

/// Wraps an accepted connection before the client is registered.
#[async_trait]
pub trait StreamWrapper: Send + Sync + fmt::Debug {
    /// Wraps `stream`, accepted from `peer`.
    ///
    /// # Errors
    ///
    /// Any error drops the connection; the acceptor keeps running.
    async fn wrap(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<BoxedTransport>;
}

/// Uses the TCP stream as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTransport;

#[async_trait]
impl StreamWrapper for PlainTransport {
    async fn wrap(&self, stream: TcpStream, _peer: SocketAddr) -> io::Result<BoxedTransport> {
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
