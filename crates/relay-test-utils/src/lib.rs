//! # Relay Test Utilities
//!
//! Shared test utilities for the Sync Relay.
//!
//! This crate provides:
//! - Server test harness (`TestRelayServer` for E2E tests)
//! - WebSocket client helpers (`WsClient`, auth and frame helpers)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use relay_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestRelayServer::spawn().await?;
//!     let mut alice = server.connect_and_auth().await?;
//!     let mut bob = server.connect_and_auth().await?;
//!     server.wait_for_clients(2).await?;
//!
//!     send_binary(&mut alice, b"update").await?;
//!     assert_eq!(next_binary(&mut bob).await?, b"update");
//!     Ok(())
//! }
//! ```

pub mod server_harness;

// Re-export commonly used items
pub use server_harness::*;
