//! Message-oriented client transport.
//!
//! A [`Connection`](crate::actors::Connection) owns exactly one transport and
//! is the only task that touches it. Production uses [`WsTransport`] over an
//! upgraded axum WebSocket; tests drive connections through the in-memory
//! pair in [`memory`].

use crate::errors::RelayError;

use bytes::Bytes;
use std::future::Future;

mod websocket;

#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use websocket::WsTransport;

/// A single transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Opaque application payload.
    Binary(Bytes),
    /// Text frame. Only meaningful during the handshake.
    Text(String),
    /// Control ping; answered with a pong carrying the same payload.
    Ping(Bytes),
    /// Control pong.
    Pong(Bytes),
    /// Peer-initiated or server-initiated close.
    Close,
}

/// Bidirectional framed transport owned by one connection.
pub trait Transport: Send + 'static {
    /// Next frame from the peer. `None` once the peer is gone.
    ///
    /// Must be cancel-safe: it is raced against the mailbox and the read
    /// deadline in `tokio::select!`.
    fn recv(&mut self) -> impl Future<Output = Option<Result<Frame, RelayError>>> + Send;

    /// Write one frame to the peer.
    fn send(&mut self, frame: Frame) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// Close the transport. Best effort; errors are swallowed.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
