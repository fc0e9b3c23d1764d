//! HTTP routes for the relay.
//!
//! Defines the Axum router and application state.

use crate::actors::HubHandle;
use crate::config::Config;
use crate::handlers;
use crate::throttle::RequestThrottle;

use axum::{routing::get, Router};
use common::secret::SharedSecret;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide hub.
    pub hub: HubHandle,

    /// Service configuration.
    pub config: Config,

    /// Comparator for the pre-shared secret.
    pub secret: Arc<SharedSecret>,

    /// Per-address upgrade request throttle.
    pub throttle: Arc<RequestThrottle>,
}

/// Build the application routes.
///
/// - `/version` - build version (not throttled)
/// - `/` - 400, no room named
/// - `/:room` - admission and WebSocket upgrade
/// - TraceLayer for request logging
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/version", get(handlers::version))
        .route("/", get(handlers::missing_room))
        .route("/:room", get(handlers::join_room))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
