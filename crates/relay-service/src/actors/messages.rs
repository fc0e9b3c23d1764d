//! Message types for actor communication.
//!
//! All inter-actor communication uses strongly-typed message passing through
//! [`super::mailbox`]. Request-reply messages carry a `tokio::sync::oneshot`
//! sender.

use super::connection::{ConnectionHandle, ConnectionId};

use bytes::Bytes;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to the `Hub`.
#[derive(Debug)]
pub enum HubMessage {
    /// Read-only capacity pre-check, run before the transport upgrade.
    CheckCapacity {
        respond_to: oneshot::Sender<bool>,
    },

    /// Authoritative join of an authenticated connection.
    TryAddClient {
        room: String,
        client_addr: IpAddr,
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<bool>,
    },

    /// Remove a connection from its room. Idempotent.
    RemoveClient {
        room: String,
        connection_id: ConnectionId,
    },

    /// Relay a payload to every other member of the room.
    Broadcast {
        room: String,
        payload: Bytes,
        sender: ConnectionId,
    },

    /// Inactivity sweep hook. Idle detection lives in each connection's read
    /// deadline, so the hub does no work here.
    CleanupInactiveClients { timeout: Duration },

    /// Snapshot of the registry (diagnostics and tests).
    GetStatus {
        respond_to: oneshot::Sender<HubStatus>,
    },
}

/// Messages sent to a `Connection`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Write a payload to the client as a binary frame.
    Send { payload: Bytes },

    /// Close the connection.
    Close { reason: String },
}

/// Hub registry snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    /// Members across all rooms.
    pub total_clients: usize,
    /// Global admission ceiling.
    pub max_clients: usize,
    /// Member count per room (rooms with zero members do not exist).
    pub rooms: BTreeMap<String, usize>,
}

impl HubStatus {
    /// Sum of the per-room member counts.
    #[must_use]
    pub fn member_sum(&self) -> usize {
        self.rooms.values().sum()
    }
}
