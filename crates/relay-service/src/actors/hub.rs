//! `Hub` - the room registry and global admission controller.
//!
//! The hub is the only owner of room membership:
//!
//! - One instance per relay process, constructed explicitly and injected
//!   into the HTTP boundary (no global singleton)
//! - Maps room name → member connections; a room exists only while it has
//!   members
//! - Enforces the global `max_clients` ceiling shared by all rooms
//! - Fans broadcast payloads out to member mailboxes without waiting on any
//!   of them. A member whose mailbox is full is evicted rather than skipped,
//!   so every member still in a room has seen every frame sent to it
//!
//! Registry invariants, true whenever the hub's mailbox is drained:
//!
//! - a connection appears in at most one room
//! - `total_clients` equals the sum of all room sizes
//! - `total_clients <= max_clients`

use crate::config::DEFAULT_MAX_CLIENTS;
use crate::errors::RelayError;
use crate::observability::metrics as relay_metrics;

use super::connection::{ConnectionHandle, ConnectionId};
use super::mailbox::{mailbox, Mailbox, MailboxReceiver};
use super::messages::{HubMessage, HubStatus};
use super::metrics::ActorType;

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Default channel buffer size for the hub mailbox.
const HUB_CHANNEL_BUFFER: usize = 8192;

/// Handle to the `Hub` for the admission boundary.
///
/// Carries the blocking-call operations (`check_capacity`, `try_add_client`,
/// `status`). Connections never receive this type; they get a [`HubLink`].
#[derive(Clone, Debug)]
pub struct HubHandle {
    mailbox: Mailbox<HubMessage>,
    cancel_token: CancellationToken,
}

impl HubHandle {
    /// Spawn the hub and return a handle to it.
    ///
    /// A `max_clients` of zero is a misconfiguration; it is corrected to
    /// [`DEFAULT_MAX_CLIENTS`] and logged.
    #[must_use]
    pub fn new(max_clients: usize) -> Self {
        let (handle, _task) = Self::spawn(max_clients, CancellationToken::new());
        handle
    }

    /// Spawn the hub under an existing cancellation token.
    pub fn spawn(max_clients: usize, cancel_token: CancellationToken) -> (Self, JoinHandle<()>) {
        let (mailbox, receiver) = mailbox(ActorType::Hub, "hub", HUB_CHANNEL_BUFFER);

        let max_clients = if max_clients == 0 {
            error!(
                target: "relay.actor.hub",
                fallback = DEFAULT_MAX_CLIENTS,
                "max_clients is 0, correcting to default"
            );
            DEFAULT_MAX_CLIENTS
        } else {
            max_clients
        };

        let actor = Hub {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            total_clients: 0,
            max_clients,
        };

        let task = tokio::spawn(actor.run());

        (
            Self {
                mailbox,
                cancel_token,
            },
            task,
        )
    }

    /// Whether one more client fits under the ceiling. No mutation.
    ///
    /// Run immediately before the upgrade so a rejection can still be
    /// returned as an HTTP status. The answer may be stale by the time
    /// [`Self::try_add_client`] runs; the join re-validates.
    pub async fn check_capacity(&self) -> Result<bool, RelayError> {
        self.mailbox
            .ask(|respond_to| HubMessage::CheckCapacity { respond_to })
            .await
    }

    /// Join `handle` to `room`. Returns `false` without mutating anything if
    /// the hub is at capacity.
    pub async fn try_add_client(
        &self,
        room: String,
        client_addr: IpAddr,
        handle: ConnectionHandle,
    ) -> Result<bool, RelayError> {
        self.mailbox
            .ask(|respond_to| HubMessage::TryAddClient {
                room,
                client_addr,
                handle,
                respond_to,
            })
            .await
    }

    /// Remove a connection from its room. Idempotent.
    pub async fn remove_client(
        &self,
        room: String,
        connection_id: ConnectionId,
    ) -> Result<(), RelayError> {
        self.link().remove_client(room, connection_id).await
    }

    /// Relay `payload` to every member of `room` except `sender`.
    pub async fn broadcast(
        &self,
        room: String,
        payload: Bytes,
        sender: ConnectionId,
    ) -> Result<(), RelayError> {
        self.link().broadcast(room, payload, sender).await
    }

    /// Inactivity sweep hook. Performs no work; see [`HubMessage::CleanupInactiveClients`].
    pub fn cleanup_inactive_clients(&self, timeout: Duration) -> Result<(), RelayError> {
        self.mailbox
            .tell(HubMessage::CleanupInactiveClients { timeout })
    }

    /// Snapshot of the registry.
    pub async fn status(&self) -> Result<HubStatus, RelayError> {
        self.mailbox
            .ask(|respond_to| HubMessage::GetStatus { respond_to })
            .await
    }

    /// Asynchronous-only handle for connections.
    #[must_use]
    pub fn link(&self) -> HubLink {
        HubLink {
            mailbox: self.mailbox.clone(),
        }
    }

    /// Stop the hub. Members are told to close.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Get a child token for tasks that should stop with the hub.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Asynchronous hub handle held by connections.
///
/// Deliberately has no request-reply operations.
#[derive(Clone, Debug)]
pub struct HubLink {
    mailbox: Mailbox<HubMessage>,
}

impl HubLink {
    /// Wrap a raw hub mailbox.
    #[must_use]
    pub fn from_mailbox(mailbox: Mailbox<HubMessage>) -> Self {
        Self { mailbox }
    }

    /// Remove a connection from its room. Waits for queue space, never for
    /// the hub to process the removal.
    pub async fn remove_client(
        &self,
        room: String,
        connection_id: ConnectionId,
    ) -> Result<(), RelayError> {
        self.mailbox
            .post(HubMessage::RemoveClient {
                room,
                connection_id,
            })
            .await
    }

    /// Relay `payload` to the other members of `room`.
    pub async fn broadcast(
        &self,
        room: String,
        payload: Bytes,
        sender: ConnectionId,
    ) -> Result<(), RelayError> {
        self.mailbox
            .post(HubMessage::Broadcast {
                room,
                payload,
                sender,
            })
            .await
    }
}

/// The `Hub` actor. Owns the registry; runs in its own task.
pub struct Hub {
    receiver: MailboxReceiver<HubMessage>,
    cancel_token: CancellationToken,
    rooms: HashMap<String, HashMap<ConnectionId, ConnectionHandle>>,
    total_clients: usize,
    max_clients: usize,
}

impl Hub {
    /// Run the actor message loop.
    #[instrument(skip_all, name = "relay.actor.hub", fields(max_clients = self.max_clients))]
    async fn run(mut self) {
        info!(
            target: "relay.actor.hub",
            max_clients = self.max_clients,
            "Hub started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "relay.actor.hub",
                        "Hub received cancellation signal"
                    );
                    self.graceful_shutdown();
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message),
                        None => {
                            info!(
                                target: "relay.actor.hub",
                                "Hub channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "relay.actor.hub",
            rooms_remaining = self.rooms.len(),
            messages_processed = self.receiver.monitor().stats().processed,
            "Hub stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: HubMessage) {
        match message {
            HubMessage::CheckCapacity { respond_to } => {
                let _ = respond_to.send(self.check_capacity());
            }

            HubMessage::TryAddClient {
                room,
                client_addr,
                handle,
                respond_to,
            } => {
                let accepted = self.try_add_client(room, client_addr, handle);
                let _ = respond_to.send(accepted);
            }

            HubMessage::RemoveClient {
                room,
                connection_id,
            } => {
                self.remove_client(&room, connection_id);
            }

            HubMessage::Broadcast {
                room,
                payload,
                sender,
            } => {
                self.broadcast(&room, &payload, sender);
            }

            HubMessage::CleanupInactiveClients { timeout } => {
                trace!(
                    target: "relay.actor.hub",
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Inactivity sweep: connections expire through their own read deadline"
                );
            }

            HubMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
        }
    }

    fn check_capacity(&self) -> bool {
        let can_accept = self.total_clients < self.max_clients;
        if !can_accept {
            warn!(
                target: "relay.actor.hub",
                max_clients = self.max_clients,
                total_clients = self.total_clients,
                "Rejected connection: max clients reached"
            );
        }
        can_accept
    }

    fn try_add_client(
        &mut self,
        room: String,
        client_addr: IpAddr,
        handle: ConnectionHandle,
    ) -> bool {
        if !self.check_capacity() {
            return false;
        }

        let connection_id = handle.connection_id();

        // A handle is only ever joined once, but keep the registry exact
        // even if it were re-sent.
        if self.contains(connection_id) {
            warn!(
                target: "relay.actor.hub",
                connection_id = %connection_id,
                "Connection already registered"
            );
            return false;
        }

        let members = self.rooms.entry(room.clone()).or_default();
        members.insert(connection_id, handle);
        let peers = members.len();
        self.total_clients += 1;
        self.publish_gauges();

        info!(
            target: "relay.actor.hub",
            room = %room,
            client_addr = %client_addr,
            connection_id = %connection_id,
            peers = peers,
            total = self.total_clients,
            "Peer joined"
        );

        true
    }

    /// Drop a member from the registry. Returns its handle and the number of
    /// members left in the room, or `None` if it was not in `room`.
    fn detach(
        &mut self,
        room: &str,
        connection_id: ConnectionId,
    ) -> Option<(ConnectionHandle, usize)> {
        let members = self.rooms.get_mut(room)?;
        let handle = members.remove(&connection_id)?;

        let peers = members.len();
        if peers == 0 {
            self.rooms.remove(room);
        }
        self.total_clients = self.total_clients.saturating_sub(1);
        self.publish_gauges();

        Some((handle, peers))
    }

    fn remove_client(&mut self, room: &str, connection_id: ConnectionId) {
        let Some((_, peers)) = self.detach(room, connection_id) else {
            return;
        };

        info!(
            target: "relay.actor.hub",
            room = %room,
            connection_id = %connection_id,
            peers = peers,
            total = self.total_clients,
            "Peer left"
        );
    }

    fn broadcast(&mut self, room: &str, payload: &Bytes, sender: ConnectionId) {
        let Some(members) = self.rooms.get(room) else {
            return;
        };

        let mut delivered = 0u64;
        let mut lagging = Vec::new();
        for (connection_id, handle) in members {
            if *connection_id == sender {
                continue;
            }
            match handle.send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(RelayError::MailboxFull(_)) => lagging.push(*connection_id),
                Err(e) => {
                    // Already stopping; its RemoveClient is on the way
                    debug!(
                        target: "relay.actor.hub",
                        connection_id = %connection_id,
                        error = %e,
                        "Skipped broadcast recipient"
                    );
                }
            }
        }

        relay_metrics::record_frames_fanned_out(delivered);

        for connection_id in lagging {
            self.evict(room, connection_id);
        }
    }

    /// Remove a member that missed a frame and force its connection closed.
    fn evict(&mut self, room: &str, connection_id: ConnectionId) {
        let Some((handle, peers)) = self.detach(room, connection_id) else {
            return;
        };

        handle.evict();
        relay_metrics::record_member_evicted();

        warn!(
            target: "relay.actor.hub",
            room = %room,
            connection_id = %connection_id,
            peers = peers,
            total = self.total_clients,
            "Evicted peer with full mailbox"
        );
    }

    fn status(&self) -> HubStatus {
        HubStatus {
            total_clients: self.total_clients,
            max_clients: self.max_clients,
            rooms: self
                .rooms
                .iter()
                .map(|(room, members)| (room.clone(), members.len()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn contains(&self, connection_id: ConnectionId) -> bool {
        self.rooms
            .values()
            .any(|members| members.contains_key(&connection_id))
    }

    fn publish_gauges(&self) {
        relay_metrics::set_connections_active(self.total_clients);
        relay_metrics::set_rooms_active(self.rooms.len());
    }

    /// Tell every member to close, then drop the registry.
    fn graceful_shutdown(&mut self) {
        info!(
            target: "relay.actor.hub",
            rooms = self.rooms.len(),
            total_clients = self.total_clients,
            "Performing graceful shutdown"
        );

        for (room, members) in self.rooms.drain() {
            for handle in members.values() {
                if let Err(e) = handle.close("server shutting down") {
                    handle.evict();
                    debug!(
                        target: "relay.actor.hub",
                        room = %room,
                        connection_id = %handle.connection_id(),
                        error = %e,
                        "Could not deliver close, evicting"
                    );
                }
            }
        }

        self.total_clients = 0;
        self.receiver.close();
        self.publish_gauges();
    }
}
