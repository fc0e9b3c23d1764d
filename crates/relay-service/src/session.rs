//! Post-upgrade session: authenticate, join, relay.

use crate::actors::{CloseReason, Connection, ConnectionSettings, HubHandle};
use crate::auth::Handshake;
use crate::transport::Transport;

use std::net::IpAddr;
use tracing::{info, instrument, warn};

/// Everything a session needs besides its transport.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub room: String,
    pub peer_addr: IpAddr,
    pub handshake: Handshake,
    pub settings: ConnectionSettings,
}

/// Drive one client from upgrade to close.
///
/// Membership is requested only after authentication succeeds, so a
/// connection is never a room member while unauthenticated.
#[instrument(skip_all, name = "relay.session", fields(room = %ctx.room, client_addr = %ctx.peer_addr))]
pub async fn run_session<T: Transport>(transport: T, ctx: SessionContext) {
    let SessionContext {
        hub,
        room,
        peer_addr,
        handshake,
        settings,
    } = ctx;

    let (mut connection, handle) =
        Connection::new(transport, room.clone(), peer_addr, hub.link(), settings);

    if connection.handshake(&handshake).await.is_err() {
        return;
    }

    match hub.try_add_client(room, peer_addr, handle).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(
                target: "relay.session",
                connection_id = %connection.id(),
                "Failed to add client after upgrade, closing connection"
            );
            connection.close(CloseReason::JoinRejected).await;
            return;
        }
        Err(e) => {
            warn!(target: "relay.session", error = %e, "Hub unavailable");
            connection.close(CloseReason::HubGone).await;
            return;
        }
    }

    connection.run().await;

    info!(
        target: "relay.session",
        connection_id = %connection.id(),
        "Session ended"
    );
}
