//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] wrappers and adds [`SharedSecret`], the
//! pre-shared relay secret that clients must present before they may join a
//! room.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` and holds a secret is safe to log. The inner value is only
//! reachable through an explicit `expose_secret()` call.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{SecretString, SharedSecret};
//!
//! let secret = SharedSecret::new(SecretString::from("wss-changeme")).unwrap();
//! assert!(secret.matches("wss-changeme"));
//! assert!(!secret.matches("guess"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

use ring::hmac;
use ring::rand::SystemRandom;
use std::fmt;
use thiserror::Error;

/// Failure to set up a [`SharedSecret`].
#[derive(Debug, Error)]
pub enum SecretError {
    /// The system random source could not produce key material.
    #[error("Failed to generate comparison key")]
    KeyGeneration,
}

/// A pre-shared secret compared in constant time.
///
/// The expected value is never compared byte-for-byte. At construction a
/// random per-process HMAC key is generated and the tag of the expected
/// secret is stored; candidates are checked with `hmac::verify`, which runs
/// in constant time with respect to the tag.
pub struct SharedSecret {
    secret: SecretString,
    key: hmac::Key,
    tag: hmac::Tag,
}

impl SharedSecret {
    /// Wrap the expected secret.
    ///
    /// # Errors
    ///
    /// Returns `SecretError::KeyGeneration` if the system RNG fails.
    pub fn new(secret: SecretString) -> Result<Self, SecretError> {
        let rng = SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)
            .map_err(|_| SecretError::KeyGeneration)?;
        let tag = hmac::sign(&key, secret.expose_secret().as_bytes());

        Ok(Self { secret, key, tag })
    }

    /// Check whether `candidate` equals the expected secret.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        hmac::verify(&self.key, candidate.as_bytes(), self.tag.as_ref()).is_ok()
    }

    /// Access the wrapped secret.
    #[must_use]
    pub fn secret(&self) -> &SecretString {
        &self.secret
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedSecret")
            .field("secret", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}
