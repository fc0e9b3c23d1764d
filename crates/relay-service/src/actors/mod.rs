//! Actor model implementation for the relay.
//!
//! ```text
//! Hub (one per process)
//! ├── owns the room registry and the client ceiling
//! └── holds a ConnectionHandle per joined member
//!     └── Connection (one per client transport)
//!         ├── owns the transport, auth flag, read deadline, rate window
//!         └── talks back to the Hub through a HubLink
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single-consumer mailboxes**: every owner's state is touched only from
//!   its own task; cross-owner interaction is message passing
//! - **Fan-out never waits**: the hub `tell`s members, so one slow client
//!   cannot stall a room
//! - **No self-ask**: connections hold a `HubLink`, which cannot make
//!   request-reply calls
//! - **CancellationToken**: hub shutdown tells every member to close
//!
//! # Modules
//!
//! - [`mailbox`] - bounded mailbox with `tell`/`post`/`ask`
//! - [`hub`] - `Hub` registry and admission controller
//! - [`connection`] - `Connection` per client
//! - [`messages`] - Message types for actor communication
//! - [`metrics`] - Mailbox monitoring

pub mod connection;
pub mod hub;
pub mod mailbox;
pub mod messages;
pub mod metrics;

// Re-export primary types
pub use connection::{
    CloseReason, Connection, ConnectionHandle, ConnectionId, ConnectionSettings, ConnectionState,
};
pub use hub::{HubHandle, HubLink};
pub use mailbox::{mailbox, Mailbox, MailboxReceiver};
pub use messages::*;
pub use metrics::{ActorType, MailboxLevel, MailboxMonitor, MailboxStats};
