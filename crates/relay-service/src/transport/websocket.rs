use super::{Frame, Transport};
use crate::errors::RelayError;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use tracing::trace;

/// [`Transport`] over an upgraded axum WebSocket.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl From<Message> for Frame {
    fn from(message: Message) -> Self {
        match message {
            Message::Binary(data) => Frame::Binary(Bytes::from(data)),
            Message::Text(text) => Frame::Text(text),
            Message::Ping(data) => Frame::Ping(Bytes::from(data)),
            Message::Pong(data) => Frame::Pong(Bytes::from(data)),
            Message::Close(_) => Frame::Close,
        }
    }
}

impl From<Frame> for Message {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Binary(data) => Message::Binary(data.to_vec()),
            Frame::Text(text) => Message::Text(text),
            Frame::Ping(data) => Message::Ping(data.to_vec()),
            Frame::Pong(data) => Message::Pong(data.to_vec()),
            Frame::Close => Message::Close(None),
        }
    }
}

impl Transport for WsTransport {
    async fn recv(&mut self) -> Option<Result<Frame, RelayError>> {
        let message = self.socket.recv().await?;
        Some(
            message
                .map(Frame::from)
                .map_err(|e| RelayError::Transport(e.to_string())),
        )
    }

    async fn send(&mut self, frame: Frame) -> Result<(), RelayError> {
        self.socket
            .send(frame.into())
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.socket.send(Message::Close(None)).await {
            trace!(target: "relay.session", error = %e, "Close frame not delivered");
        }
    }
}
