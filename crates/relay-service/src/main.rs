//! Sync Relay
//!
//! WebSocket broadcast relay for collaborative-editing rooms.
//!
//! # Servers
//!
//! - WebSocket/HTTP server for clients (default: 0.0.0.0:9870)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the hub
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Start background tickers (throttle sweep, inactivity sweep)
//! 6. Start the client server, mark ready
//! 7. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::secret::SharedSecret;
use relay_service::actors::HubHandle;
use relay_service::config::Config;
use relay_service::observability::{health_router, init_metrics_recorder, HealthState};
use relay_service::routes::{build_routes, AppState};
use relay_service::throttle::RequestThrottle;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = relay_service::handlers::VERSION, "Starting Sync Relay");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        room = %config.room,
        max_clients = config.max_clients,
        auth_mode = %config.auth_mode,
        allowed_origins = config.allowed_origins.len(),
        "Configuration loaded successfully"
    );

    if config.uses_default_secret() {
        warn!("WS_SECRET not set, using the default development secret");
    }

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let secret = Arc::new(SharedSecret::new(config.ws_secret.clone()).map_err(|e| {
        error!(error = %e, "Failed to initialize secret comparator");
        e
    })?);

    // Spawn the hub; every server and ticker runs under its token
    let (hub, hub_task) = HubHandle::spawn(config.max_clients, CancellationToken::new());
    let shutdown_token = hub.child_token();

    // Health server (MUST succeed - fail startup if it doesn't)
    let health_app = health_router(Arc::clone(&health_state), Some(prometheus_handle));
    let health_listener = tokio::net::TcpListener::bind(config.health_bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.health_bind_address, "Failed to bind health server");
            format!(
                "Failed to bind health server to {}: {e}",
                config.health_bind_address
            )
        })?;
    info!(addr = %config.health_bind_address, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let throttle = Arc::new(RequestThrottle::new(
        config.throttle_requests,
        config.throttle_window(),
    ));

    spawn_throttle_sweeper(
        Arc::clone(&throttle),
        config.throttle_window(),
        shutdown_token.child_token(),
    );
    spawn_inactivity_sweeper(
        hub.clone(),
        config.inactive_sweep_interval(),
        Duration::from_secs(config.idle_timeout_seconds),
        shutdown_token.child_token(),
    );

    // Client server
    let bind_address = config.bind_address;
    let state = Arc::new(AppState {
        hub: hub.clone(),
        config,
        secret,
        throttle,
    });
    let app = build_routes(state);

    let listener = tokio::net::TcpListener::bind(bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %bind_address, "Failed to bind relay server");
            format!("Failed to bind relay server to {bind_address}: {e}")
        })?;
    info!(addr = %bind_address, "Relay server listening");

    let server_shutdown_token = shutdown_token.child_token();
    let server_task: JoinHandle<()> = tokio::spawn(async move {
        let server = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            server_shutdown_token.cancelled().await;
            info!("Relay server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Relay server failed");
        }
    });

    health_state.set_ready();
    info!("Sync Relay running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops sending traffic
    health_state.set_not_ready();

    // Stops the hub (members are told to close) and every child task
    hub.shutdown();

    if tokio::time::timeout(Duration::from_secs(10), hub_task)
        .await
        .is_err()
    {
        warn!("Hub did not stop within 10s");
    }
    if tokio::time::timeout(Duration::from_secs(10), server_task)
        .await
        .is_err()
    {
        warn!("Relay server did not stop within 10s");
    }

    info!("Sync Relay shutdown complete");
    Ok(())
}

/// Periodically drop expired throttle windows.
fn spawn_throttle_sweeper(
    throttle: Arc<RequestThrottle>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = throttle.sweep(tokio::time::Instant::now());
                    if removed > 0 {
                        debug!(removed, tracked = throttle.tracked(), "Throttle windows swept");
                    }
                }
            }
        }
    });
}

/// Drive the hub's inactivity sweep hook.
fn spawn_inactivity_sweeper(
    hub: HubHandle,
    period: Duration,
    timeout: Duration,
    cancel_token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = hub.cleanup_inactive_clients(timeout) {
                        debug!(error = %e, "Inactivity sweep not delivered");
                    }
                }
            }
        }
    });
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
