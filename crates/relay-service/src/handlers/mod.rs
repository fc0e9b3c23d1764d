//! HTTP request handlers for the relay.

pub mod join;
pub mod version;

pub use join::{join_room, missing_room};
pub use version::{version, VERSION};
