//! Test server harness for E2E testing
//!
//! Provides `TestRelayServer` for spawning real relay instances in tests,
//! plus small helpers for driving WebSocket clients against them.

use common::secret::SharedSecret;
use futures::{SinkExt, StreamExt};
use relay_service::actors::HubHandle;
use relay_service::auth::Handshake;
use relay_service::config::Config;
use relay_service::routes::{self, AppState};
use relay_service::session::{run_session, SessionContext};
use relay_service::throttle::RequestThrottle;
use relay_service::transport::memory::{self, MemoryPeer};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Secret every harness server is configured with.
pub const TEST_SECRET: &str = "test-relay-secret";

/// A connected WebSocket client.
pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long the helpers wait for a frame or a membership change.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Test harness for spawning the relay in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_capacity_e2e() -> anyhow::Result<()> {
///     let server = TestRelayServer::spawn_with(&[("RELAY_MAX_CLIENTS", "1")]).await?;
///     let _first = server.connect_and_auth().await?;
///     server.wait_for_clients(1).await?;
///
///     assert!(server.connect().await.is_err());
///     Ok(())
/// }
/// ```
pub struct TestRelayServer {
    addr: SocketAddr,
    hub: HubHandle,
    config: Config,
    state: Arc<AppState>,
    _handle: JoinHandle<()>,
}

impl TestRelayServer {
    /// Spawn a relay with the default test configuration.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a relay, overriding configuration variables.
    ///
    /// The server will:
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Use [`TEST_SECRET`] unless `WS_SECRET` is overridden
    /// - Spawn its own hub
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            ("RELAY_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("WS_SECRET".to_string(), TEST_SECRET.to_string()),
        ]);
        for (key, value) in overrides {
            vars.insert((*key).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let secret = Arc::new(
            SharedSecret::new(config.ws_secret.clone())
                .map_err(|e| anyhow::anyhow!("Failed to create secret: {}", e))?,
        );
        let hub = HubHandle::new(config.max_clients);
        let state = Arc::new(AppState {
            hub: hub.clone(),
            config: config.clone(),
            secret,
            throttle: Arc::new(RequestThrottle::new(
                config.throttle_requests,
                config.throttle_window(),
            )),
        });

        // Build routes using the relay's real route builder
        let app = routes::build_routes(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind(config.bind_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            hub,
            config,
            state,
            _handle: handle,
        })
    }

    /// Get the base HTTP URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for `room`.
    pub fn ws_url(&self, room: &str) -> String {
        format!("ws://{}/{}", self.addr, room)
    }

    /// WebSocket URL for the configured room.
    pub fn room_url(&self) -> String {
        self.ws_url(&self.config.room)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The server's hub.
    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Get reference to the server configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Open a WebSocket to the configured room without authenticating.
    pub async fn connect(&self) -> Result<WsClient, tokio_tungstenite::tungstenite::Error> {
        let (client, _response) = tokio_tungstenite::connect_async(self.room_url()).await?;
        Ok(client)
    }

    /// Open a WebSocket to the configured room and send the auth frame.
    pub async fn connect_and_auth(&self) -> Result<WsClient, anyhow::Error> {
        let mut client = self.connect().await?;
        send_auth(&mut client, TEST_SECRET).await?;
        Ok(client)
    }

    /// Attach an in-memory client to this server's hub, bypassing HTTP.
    ///
    /// The client runs the same session (handshake, join, relay) as a
    /// WebSocket client and is subject to the same configuration.
    pub fn attach_memory_client(&self, peer_addr: IpAddr) -> MemoryPeer {
        let (transport, peer) = memory::pair();
        let ctx = SessionContext {
            hub: self.hub.clone(),
            room: self.config.room.clone(),
            peer_addr,
            handshake: Handshake::for_mode(self.config.auth_mode, &self.state.secret),
            settings: self.config.connection_settings(),
        };
        tokio::spawn(run_session(transport, ctx));
        peer
    }

    /// Wait until the hub reports exactly `expected` members.
    pub async fn wait_for_clients(&self, expected: usize) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let status = self.hub.status().await?;
            if status.total_clients == expected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!(
                    "hub has {} clients, expected {}",
                    status.total_clients,
                    expected
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestRelayServer {
    fn drop(&mut self) {
        // Stop the HTTP server and the hub; members are told to close
        self._handle.abort();
        self.hub.shutdown();
    }
}

/// Send the first-frame authentication assertion.
pub async fn send_auth(client: &mut WsClient, secret: &str) -> Result<(), anyhow::Error> {
    let assertion = serde_json::json!({ "type": "auth", "secret": secret }).to_string();
    client.send(Message::text(assertion)).await?;
    Ok(())
}

/// Send one binary frame.
pub async fn send_binary(client: &mut WsClient, payload: &[u8]) -> Result<(), anyhow::Error> {
    client.send(Message::binary(payload.to_vec())).await?;
    Ok(())
}

/// Wait for the next binary frame, skipping control frames.
pub async fn next_binary(client: &mut WsClient) -> Result<Vec<u8>, anyhow::Error> {
    let read = async {
        while let Some(message) = client.next().await {
            match message? {
                Message::Binary(payload) => return Ok(payload.to_vec()),
                Message::Close(_) => anyhow::bail!("connection closed"),
                _ => {}
            }
        }
        anyhow::bail!("connection ended")
    };
    tokio::time::timeout(WAIT_TIMEOUT, read)
        .await
        .map_err(|_| anyhow::anyhow!("no binary frame within {:?}", WAIT_TIMEOUT))?
}

/// Wait until the server closes the connection.
///
/// Returns `Ok(())` on a Close frame or end of stream; errors if a binary
/// frame arrives first or nothing happens in time.
pub async fn expect_closed(client: &mut WsClient) -> Result<(), anyhow::Error> {
    let read = async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => return Ok(()),
                Ok(Message::Binary(_)) => anyhow::bail!("unexpected binary frame"),
                Ok(_) => {}
            }
        }
        Ok(())
    };
    tokio::time::timeout(WAIT_TIMEOUT, read)
        .await
        .map_err(|_| anyhow::anyhow!("connection not closed within {:?}", WAIT_TIMEOUT))?
}
