//! Common utilities shared across the sync relay crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;
