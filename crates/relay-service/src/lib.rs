//! Sync Relay Service Library
//!
//! A broadcast relay for collaborative-editing clients. Clients connect over
//! WebSocket to a named room, prove they hold the pre-shared secret, and from
//! then on every binary frame they send is forwarded unchanged to every
//! other member of the room. Payloads are opaque: the relay never parses,
//! merges or stores them.
//!
//! # Architecture
//!
//! ```text
//! HTTP boundary (axum)
//! ├── throttle / room / origin / secret / capacity checks
//! └── upgrade → session task
//!     └── Connection (one per client) ──HubLink──▶ Hub (one per process)
//!                    ◀──ConnectionHandle (tell)──┘
//! ```
//!
//! # Modules
//!
//! - [`actors`] - Hub, Connection and the mailbox primitive
//! - [`auth`] - first-frame and query-string authentication
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types and HTTP rejections
//! - [`handlers`] / [`routes`] - admission boundary
//! - [`observability`] - metrics and health endpoints
//! - [`rate_limit`] - per-connection sliding window
//! - [`session`] - post-upgrade handshake, join and relay
//! - [`throttle`] - per-address request throttle
//! - [`transport`] - framed transport abstraction

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod observability;
pub mod rate_limit;
pub mod routes;
pub mod session;
pub mod throttle;
pub mod transport;
