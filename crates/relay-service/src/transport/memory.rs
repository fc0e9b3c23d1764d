//! In-memory transport pair for driving connections without a socket.

use super::{Frame, Transport};
use crate::errors::RelayError;

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Create a connected transport/peer pair.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_server, inbound) = mpsc::unbounded_channel();
    let (outbound, from_server) = mpsc::unbounded_channel();
    let closed = Arc::new(AtomicBool::new(false));

    (
        MemoryTransport {
            inbound,
            outbound,
            closed: Arc::clone(&closed),
            close_calls: Arc::new(AtomicBool::new(false)),
        },
        MemoryPeer {
            to_server: Some(to_server),
            from_server,
            closed,
        },
    )
}

/// Server side of the pair.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Frame>,
    outbound: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
    close_calls: Arc<AtomicBool>,
}

impl Transport for MemoryTransport {
    async fn recv(&mut self) -> Option<Result<Frame, RelayError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RelayError::Transport("transport closed".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| RelayError::Transport("peer gone".to_string()))
    }

    async fn close(&mut self) {
        if !self.close_calls.swap(true, Ordering::SeqCst) {
            let _ = self.outbound.send(Frame::Close);
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Client side of the pair.
#[derive(Debug)]
pub struct MemoryPeer {
    to_server: Option<mpsc::UnboundedSender<Frame>>,
    from_server: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
}

impl MemoryPeer {
    /// Send a frame to the server. Returns `false` if the server side is gone.
    pub fn send(&self, frame: Frame) -> bool {
        self.to_server
            .as_ref()
            .is_some_and(|tx| tx.send(frame).is_ok())
    }

    pub fn send_binary(&self, payload: &[u8]) -> bool {
        self.send(Frame::Binary(Bytes::copy_from_slice(payload)))
    }

    pub fn send_text(&self, text: &str) -> bool {
        self.send(Frame::Text(text.to_string()))
    }

    /// Send the first-frame auth assertion.
    pub fn send_auth(&self, secret: &str) -> bool {
        self.send_text(&serde_json::json!({ "type": "auth", "secret": secret }).to_string())
    }

    /// Next frame written by the server, or `None` once the server side is dropped.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_server.recv().await
    }

    /// Next frame if one is already queued.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.from_server.try_recv().ok()
    }

    /// Stop accepting frames from the server: its writes start failing.
    pub fn stop_reading(&mut self) {
        self.from_server.close();
    }

    /// End the client's half: the server observes end of stream.
    pub fn disconnect(&mut self) {
        self.to_server = None;
    }

    /// Whether the server has closed the transport.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
