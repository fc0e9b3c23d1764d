//! Client authentication against the pre-shared relay secret.
//!
//! Exactly one mode is active per process:
//!
//! - [`AuthMode::FirstFrame`]: after the upgrade the client's first
//!   application frame must be a text frame holding
//!   `{"type":"auth","secret":"<secret>"}`. Browsers cannot set headers on a
//!   WebSocket upgrade, so this is the default.
//! - [`AuthMode::Query`]: the secret travels as `?secret=` on the upgrade
//!   request and is checked before the upgrade; the connection starts out
//!   authenticated.

use crate::errors::{AdmissionRejection, AuthError};

use common::secret::SharedSecret;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Where the client presents the secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    #[default]
    FirstFrame,
    Query,
}

impl AuthMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuthMode::FirstFrame => "first-frame",
            AuthMode::Query => "query",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first-frame" | "first_frame" => Ok(AuthMode::FirstFrame),
            "query" => Ok(AuthMode::Query),
            other => Err(format!(
                "unknown auth mode '{other}' (expected 'first-frame' or 'query')"
            )),
        }
    }
}

/// What remains to be proven once the transport is upgraded.
#[derive(Debug, Clone)]
pub enum Handshake {
    /// Wait for the first-frame assertion.
    FirstFrame(Arc<SharedSecret>),
    /// Already verified at the boundary.
    Verified,
}

impl Handshake {
    /// Handshake for a connection admitted under `mode`.
    #[must_use]
    pub fn for_mode(mode: AuthMode, secret: &Arc<SharedSecret>) -> Self {
        match mode {
            AuthMode::FirstFrame => Handshake::FirstFrame(Arc::clone(secret)),
            AuthMode::Query => Handshake::Verified,
        }
    }
}

#[derive(Deserialize)]
struct AuthAssertion {
    #[serde(rename = "type")]
    kind: Option<String>,
    secret: Option<String>,
}

/// Check a first-frame assertion.
///
/// # Errors
///
/// - `AuthError::Malformed` if the text is not a JSON object
/// - `AuthError::WrongType` if `type` is not `"auth"`
/// - `AuthError::InvalidSecret` if the secret is missing or wrong
pub fn verify_assertion(text: &str, secret: &SharedSecret) -> Result<(), AuthError> {
    let assertion: AuthAssertion =
        serde_json::from_str(text).map_err(|_| AuthError::Malformed)?;

    if assertion.kind.as_deref() != Some("auth") {
        return Err(AuthError::WrongType);
    }

    match assertion.secret {
        Some(candidate) if secret.matches(&candidate) => Ok(()),
        _ => Err(AuthError::InvalidSecret),
    }
}

/// Check the out-of-band `?secret=` value at the admission boundary.
///
/// # Errors
///
/// Returns `AdmissionRejection::Unauthorized` if it is missing or wrong.
pub fn verify_query_secret(
    candidate: Option<&str>,
    secret: &SharedSecret,
) -> Result<(), AdmissionRejection> {
    match candidate {
        Some(candidate) if secret.matches(candidate) => Ok(()),
        _ => Err(AdmissionRejection::Unauthorized),
    }
}
