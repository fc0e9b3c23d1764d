//! `Connection` - per-client lifecycle owner.
//!
//! Each `Connection`:
//! - Owns exactly one [`Transport`] and is the only task that reads or writes it
//! - Authenticates the client before it may join a room
//! - Forwards binary frames to the hub and writes hub broadcasts back out
//! - Detects idleness through a rolling read deadline
//!
//! # Lifecycle
//!
//! ```text
//! Connecting --handshake()--> AwaitingAuth --ok--> Active --run()--> Closed
//!                                  |                                   ^
//!                                  +---------- auth failure -----------+
//! ```
//!
//! `close` is idempotent and sends exactly one `RemoveClient` to the hub,
//! whether or not the connection ever joined.
//!
//! Writes are bounded by the same read deadline, so a client that stops
//! reading cannot pin the task in a blocked send. A member whose mailbox
//! overflows is evicted by the hub through the handle's cancellation token;
//! the mailbox itself is full, so a message could not get through.

use crate::auth::{verify_assertion, Handshake};
use crate::errors::{AuthError, RelayError};
use crate::observability::metrics as relay_metrics;
use crate::rate_limit::SlidingWindow;
use crate::transport::{Frame, Transport};

use super::hub::HubLink;
use super::mailbox::{mailbox, Mailbox, MailboxReceiver};
use super::messages::ConnectionMessage;
use super::metrics::ActorType;

use bytes::Bytes;
use common::secret::SharedSecret;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default channel buffer size for the connection mailbox.
pub(crate) const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// Upper bound on sending the close frame to a client that may not be reading.
const CLOSE_FRAME_TIMEOUT: Duration = Duration::from_secs(1);

/// Opaque connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to a `Connection`, held by the hub registry.
///
/// Equality and hashing are by connection id.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    mailbox: Mailbox<ConnectionMessage>,
    evict_token: CancellationToken,
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl ConnectionHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a payload for the client. Never waits.
    ///
    /// # Errors
    ///
    /// `RelayError::MailboxFull` when the client is not keeping up; the
    /// payload was not queued and the caller must [`Self::evict`] it to keep
    /// the stream gap-free. `RelayError::ActorGone` once the connection ended.
    pub fn send(&self, payload: Bytes) -> Result<(), RelayError> {
        self.mailbox.tell(ConnectionMessage::Send { payload })
    }

    /// Ask the connection to close.
    pub fn close(&self, reason: impl Into<String>) -> Result<(), RelayError> {
        self.mailbox.tell(ConnectionMessage::Close {
            reason: reason.into(),
        })
    }

    /// Force the connection closed without going through its mailbox.
    pub fn evict(&self) {
        self.evict_token.cancel();
    }

    #[cfg(test)]
    pub(crate) fn is_evicted(&self) -> bool {
        self.evict_token.is_cancelled()
    }

    /// A handle with no connection behind it; the caller reads the mailbox.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, MailboxReceiver<ConnectionMessage>) {
        let id = ConnectionId::new();
        let (mailbox, receiver) = mailbox(
            ActorType::Connection,
            id.to_string(),
            CONNECTION_CHANNEL_BUFFER,
        );
        let handle = Self {
            id,
            mailbox,
            evict_token: CancellationToken::new(),
        };
        (handle, receiver)
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport upgraded, handshake not started.
    Connecting,
    /// Waiting for the first-frame assertion.
    AwaitingAuth,
    /// Authenticated; relaying.
    Active,
    /// Terminal.
    Closed,
}

/// Why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    AuthFailed(AuthError),
    JoinRejected,
    IdleTimeout,
    /// A write was still blocked when the read deadline passed.
    WriteStalled,
    /// Dropped by the hub after its mailbox overflowed.
    Evicted,
    PeerClosed,
    TransportError,
    HubGone,
    Requested(String),
}

impl CloseReason {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CloseReason::AuthFailed(_) => "auth_failed",
            CloseReason::JoinRejected => "join_rejected",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::WriteStalled => "write_stalled",
            CloseReason::Evicted => "evicted",
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::HubGone => "hub_gone",
            CloseReason::Requested(_) => "requested",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::AuthFailed(e) => write!(f, "authentication failed: {e}"),
            CloseReason::Requested(reason) => write!(f, "requested: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Per-connection timing and limits.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Close after this long without any inbound frame.
    pub idle_timeout: Duration,
    /// Bound on the whole first-frame handshake.
    pub auth_timeout: Duration,
    /// Sliding-window ceiling on inbound binary frames.
    pub rate_limit_messages: usize,
    pub rate_limit_window: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(5),
            auth_timeout: Duration::from_secs(5),
            rate_limit_messages: 100_000,
            rate_limit_window: Duration::from_secs(1),
        }
    }
}

/// The `Connection` actor. Driven by the session task that owns it.
pub struct Connection<T: Transport> {
    id: ConnectionId,
    room: String,
    peer_addr: IpAddr,
    transport: T,
    hub: HubLink,
    receiver: MailboxReceiver<ConnectionMessage>,
    /// False once every handle has been dropped.
    mailbox_open: bool,
    evicted: CancellationToken,
    state: ConnectionState,
    authenticated: bool,
    deadline: Instant,
    rate_limiter: SlidingWindow,
    settings: ConnectionSettings,
    opened_at: Instant,
}

impl<T: Transport> Connection<T> {
    /// Create a connection in `Connecting` state, returning it with the
    /// handle the hub will hold.
    pub fn new(
        transport: T,
        room: String,
        peer_addr: IpAddr,
        hub: HubLink,
        settings: ConnectionSettings,
    ) -> (Self, ConnectionHandle) {
        let id = ConnectionId::new();
        let (mailbox, receiver) = mailbox(
            ActorType::Connection,
            id.to_string(),
            CONNECTION_CHANNEL_BUFFER,
        );
        let now = Instant::now();
        let evict_token = CancellationToken::new();

        let connection = Self {
            id,
            room,
            peer_addr,
            transport,
            hub,
            receiver,
            mailbox_open: true,
            evicted: evict_token.clone(),
            state: ConnectionState::Connecting,
            authenticated: false,
            deadline: now + settings.idle_timeout,
            rate_limiter: SlidingWindow::new(
                settings.rate_limit_messages,
                settings.rate_limit_window,
            ),
            settings,
            opened_at: now,
        };

        let handle = ConnectionHandle {
            id,
            mailbox,
            evict_token,
        };
        (connection, handle)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn room(&self) -> &str {
        &self.room
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Authenticate the client.
    ///
    /// On success the connection is `Active`. On failure it has already been
    /// closed (one `RemoveClient` sent, transport closed).
    pub async fn handshake(&mut self, handshake: &Handshake) -> Result<(), AuthError> {
        self.state = ConnectionState::AwaitingAuth;
        let started = Instant::now();

        let result = match handshake {
            Handshake::Verified => Ok(()),
            Handshake::FirstFrame(secret) => {
                let deadline = started + self.settings.auth_timeout;
                timeout_at(deadline, self.await_assertion(secret))
                    .await
                    .unwrap_or(Err(AuthError::Timeout))
            }
        };

        let outcome = match &result {
            Ok(()) => "success",
            Err(e) => e.as_str(),
        };
        relay_metrics::record_handshake(outcome, started.elapsed());

        match result {
            Ok(()) => {
                self.authenticated = true;
                self.state = ConnectionState::Active;
                self.deadline = Instant::now() + self.settings.idle_timeout;
                info!(
                    target: "relay.actor.connection",
                    connection_id = %self.id,
                    room = %self.room,
                    "Client authenticated"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    target: "relay.actor.connection",
                    connection_id = %self.id,
                    client_addr = %self.peer_addr,
                    reason = e.as_str(),
                    "Rejected connection: authentication failed"
                );
                self.close(CloseReason::AuthFailed(e)).await;
                Err(e)
            }
        }
    }

    /// Read until the first application frame and verify it.
    async fn await_assertion(&mut self, secret: &SharedSecret) -> Result<(), AuthError> {
        loop {
            let frame = match self.transport.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(_)) | None => return Err(AuthError::TransportClosed),
            };

            match frame {
                Frame::Text(text) => return verify_assertion(&text, secret),
                Frame::Binary(_) => return Err(AuthError::Malformed),
                Frame::Ping(payload) => {
                    if let Err(e) = self.transport.send(Frame::Pong(payload)).await {
                        debug!(
                            target: "relay.actor.connection",
                            connection_id = %self.id,
                            error = %e,
                            "Pong failed during handshake"
                        );
                    }
                }
                Frame::Pong(_) => {}
                Frame::Close => return Err(AuthError::TransportClosed),
            }
        }
    }

    /// Run the Active loop until the connection closes.
    #[instrument(skip_all, name = "relay.actor.connection", fields(connection_id = %self.id, room = %self.room))]
    pub async fn run(&mut self) {
        if self.state != ConnectionState::Active {
            return;
        }

        debug!(target: "relay.actor.connection", "Connection running");

        while self.state == ConnectionState::Active {
            tokio::select! {
                frame = self.transport.recv() => {
                    self.handle_frame(frame).await;
                }

                msg = self.receiver.recv(), if self.mailbox_open => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => self.mailbox_open = false,
                    }
                }

                () = self.evicted.cancelled() => {
                    self.close(CloseReason::Evicted).await;
                }

                () = tokio::time::sleep_until(self.deadline) => {
                    debug!(
                        target: "relay.actor.connection",
                        idle_ms = u64::try_from(self.settings.idle_timeout.as_millis()).unwrap_or(u64::MAX),
                        "Read deadline expired"
                    );
                    self.close(CloseReason::IdleTimeout).await;
                }
            }
        }
    }

    async fn handle_frame(&mut self, frame: Option<Result<Frame, RelayError>>) {
        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                debug!(
                    target: "relay.actor.connection",
                    error = %e,
                    "Transport read failed"
                );
                self.close(CloseReason::TransportError).await;
                return;
            }
            None => {
                self.close(CloseReason::PeerClosed).await;
                return;
            }
        };

        let now = Instant::now();
        self.deadline = now + self.settings.idle_timeout;

        match frame {
            Frame::Binary(payload) => {
                if !self.rate_limiter.check(now) {
                    relay_metrics::record_frame_rate_limited();
                    debug!(
                        target: "relay.actor.connection",
                        limit = self.settings.rate_limit_messages,
                        "Frame dropped: rate limit exceeded"
                    );
                    return;
                }

                relay_metrics::record_frame_received();
                if let Err(e) = self
                    .hub
                    .broadcast(self.room.clone(), payload, self.id)
                    .await
                {
                    warn!(target: "relay.actor.connection", error = %e, "Hub unreachable");
                    self.close(CloseReason::HubGone).await;
                }
            }
            Frame::Text(_) => {
                debug!(target: "relay.actor.connection", "Ignoring text frame");
            }
            Frame::Ping(payload) => {
                self.write(Frame::Pong(payload)).await;
            }
            Frame::Pong(_) => {}
            Frame::Close => {
                self.close(CloseReason::PeerClosed).await;
            }
        }
    }

    async fn handle_message(&mut self, message: ConnectionMessage) {
        match message {
            ConnectionMessage::Send { payload } => {
                self.write(Frame::Binary(payload)).await;
            }
            ConnectionMessage::Close { reason } => {
                self.close(CloseReason::Requested(reason)).await;
            }
        }
    }

    /// Write a frame, giving up at the read deadline or on eviction.
    ///
    /// A failed write is logged and otherwise ignored; the read path notices
    /// a dead peer. A write still pending at the deadline closes the
    /// connection, since the deadline cannot fire while the loop is stuck here.
    async fn write(&mut self, frame: Frame) {
        let outcome = tokio::select! {
            result = timeout_at(self.deadline, self.transport.send(frame)) => Some(result),
            () = self.evicted.cancelled() => None,
        };

        match outcome {
            Some(Ok(Ok(()))) => {}
            Some(Ok(Err(e))) => {
                relay_metrics::record_send_failure();
                warn!(
                    target: "relay.actor.connection",
                    connection_id = %self.id,
                    error = %e,
                    "Error sending message"
                );
            }
            Some(Err(_)) => {
                relay_metrics::record_send_failure();
                warn!(
                    target: "relay.actor.connection",
                    connection_id = %self.id,
                    "Write still blocked at read deadline"
                );
                self.close(CloseReason::WriteStalled).await;
            }
            None => self.close(CloseReason::Evicted).await,
        }
    }

    /// Close the connection. Idempotent.
    pub async fn close(&mut self, reason: CloseReason) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;

        if let Err(e) = self.hub.remove_client(self.room.clone(), self.id).await {
            debug!(
                target: "relay.actor.connection",
                connection_id = %self.id,
                error = %e,
                "Removal not delivered"
            );
        }

        if timeout(CLOSE_FRAME_TIMEOUT, self.transport.close())
            .await
            .is_err()
        {
            debug!(
                target: "relay.actor.connection",
                connection_id = %self.id,
                "Close frame not accepted, dropping transport"
            );
        }
        self.receiver.close();

        relay_metrics::record_connection_closed(reason.as_str(), self.opened_at.elapsed());
        info!(
            target: "relay.actor.connection",
            connection_id = %self.id,
            room = %self.room,
            client_addr = %self.peer_addr,
            reason = %reason,
            "Connection closed"
        );
    }
}
