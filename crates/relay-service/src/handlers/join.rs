//! Room join endpoint: the admission boundary.
//!
//! Checks run in order, cheapest and least privileged first; the first
//! failure is returned as an HTTP error before the transport is upgraded:
//!
//! 1. per-address throttle (429)
//! 2. room name (404)
//! 3. origin allow-list, when configured (403)
//! 4. `?secret=` in query auth mode (401)
//! 5. hub capacity pre-check (503)
//! 6. WebSocket upgrade headers present (426)

use crate::auth::{verify_query_secret, AuthMode, Handshake};
use crate::errors::AdmissionRejection;
use crate::observability::metrics as relay_metrics;
use crate::routes::AppState;
use crate::session::{run_session, SessionContext};
use crate::throttle::client_addr;
use crate::transport::WsTransport;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, Path, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Deserialize)]
pub struct JoinQuery {
    pub secret: Option<String>,
}

/// `GET /` - no room named.
pub async fn missing_room() -> AdmissionRejection {
    relay_metrics::record_admission(AdmissionRejection::MissingRoom.code());
    AdmissionRejection::MissingRoom
}

/// `GET /:room` - admit and upgrade.
#[instrument(skip_all, name = "relay.admission", fields(room = %room))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room): Path<String>,
    Query(query): Query<JoinQuery>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let client = client_addr(&headers, peer);

    match admit(&state, &room, &query, &headers, client).await {
        Err(rejection) => {
            relay_metrics::record_admission(rejection.code());
            rejection.into_response()
        }
        Ok(()) => {
            let Some(upgrade) = upgrade else {
                relay_metrics::record_admission(AdmissionRejection::UpgradeRequired.code());
                return AdmissionRejection::UpgradeRequired.into_response();
            };

            relay_metrics::record_admission("accepted");
            debug!(target: "relay.admission", client_addr = %client, "Upgrading connection");

            let ctx = SessionContext {
                hub: state.hub.clone(),
                room,
                peer_addr: client,
                handshake: Handshake::for_mode(state.config.auth_mode, &state.secret),
                settings: state.config.connection_settings(),
            };

            upgrade
                .max_message_size(state.config.max_frame_bytes)
                .on_upgrade(move |socket| run_session(WsTransport::new(socket), ctx))
        }
    }
}

async fn admit(
    state: &AppState,
    room: &str,
    query: &JoinQuery,
    headers: &HeaderMap,
    client: IpAddr,
) -> Result<(), AdmissionRejection> {
    state.throttle.check(client, Instant::now())?;

    if room.is_empty() {
        return Err(AdmissionRejection::MissingRoom);
    }
    if room != state.config.room {
        info!(
            target: "relay.admission",
            allowed = %state.config.room,
            "Rejected connection to unknown room"
        );
        return Err(AdmissionRejection::UnknownRoom);
    }

    if !origin_allowed(&state.config.allowed_origins, headers) {
        warn!(
            target: "relay.admission",
            client_addr = %client,
            origin = ?headers.get(header::ORIGIN),
            "Invalid origin"
        );
        return Err(AdmissionRejection::OriginNotAllowed);
    }

    if state.config.auth_mode == AuthMode::Query {
        verify_query_secret(query.secret.as_deref(), &state.secret).inspect_err(|_| {
            warn!(target: "relay.admission", client_addr = %client, "Invalid secret attempt");
        })?;
    }

    match state.hub.check_capacity().await {
        Ok(true) => Ok(()),
        Ok(false) => Err(AdmissionRejection::CapacityExceeded),
        Err(e) => {
            warn!(target: "relay.admission", error = %e, "Capacity check failed");
            Err(AdmissionRejection::Unavailable)
        }
    }
}

/// Exact-match `Origin`, falling back to the origin part of `Referer`.
/// An empty allow-list admits everything.
fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }

    let is_allowed = |candidate: &str| allowed.iter().any(|a| a == candidate);

    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok());
    if origin.is_some_and(is_allowed) {
        return true;
    }

    headers
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
        .and_then(referer_origin)
        .is_some_and(is_allowed)
}

/// `scheme://host[:port]` prefix of a URL.
fn referer_origin(referer: &str) -> Option<&str> {
    let authority_start = referer.find("://")? + 3;
    let rest = referer.get(authority_start..)?;
    let end = rest
        .find(['/', '?', '#'])
        .map_or(referer.len(), |i| authority_start + i);
    referer.get(..end)
}
