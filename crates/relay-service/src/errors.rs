//! Relay error types.
//!
//! Every failure is scoped to one connection or one admission attempt.
//! Admission rejections are the only errors that reach a client as an HTTP
//! response; everything after the upgrade ends the affected connection and
//! is logged server-side.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Relay error type.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Admission refused before the transport was upgraded.
    #[error("Admission rejected: {0}")]
    AdmissionRejected(#[from] AdmissionRejection),

    /// Handshake failed; terminal for the connection.
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Read or write failure on an established transport.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Target mailbox is full; the message was dropped.
    #[error("Mailbox full: {0}")]
    MailboxFull(&'static str),

    /// Target actor has stopped and its mailbox is closed.
    #[error("Actor stopped: {0}")]
    ActorGone(&'static str),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Why an upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionRejection {
    /// Per-address request throttle exceeded.
    #[error("too many requests")]
    Throttled(ThrottleHeaders),

    /// The request path carried no room name.
    #[error("missing room name")]
    MissingRoom,

    /// The requested room is not served by this relay.
    #[error("unknown room")]
    UnknownRoom,

    /// The `Origin`/`Referer` headers are not on the allow-list.
    #[error("origin not allowed")]
    OriginNotAllowed,

    /// Out-of-band secret missing or wrong.
    #[error("unauthorized")]
    Unauthorized,

    /// Global client ceiling reached.
    #[error("server at capacity")]
    CapacityExceeded,

    /// The request was not a WebSocket upgrade.
    #[error("upgrade required")]
    UpgradeRequired,

    /// The Hub could not answer the capacity check.
    #[error("hub unavailable")]
    Unavailable,
}

/// Rate-limit headers returned with a throttled rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThrottleHeaders {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window ends.
    pub reset_seconds: u64,
}

impl ThrottleHeaders {
    /// Unix time (seconds) at which the current window ends.
    #[must_use]
    pub fn reset_at(&self, now: DateTime<Utc>) -> i64 {
        let remaining = i64::try_from(self.reset_seconds).unwrap_or(i64::MAX);
        now.timestamp().saturating_add(remaining)
    }
}

/// Handshake failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No assertion arrived within the handshake window.
    #[error("auth timeout")]
    Timeout,

    /// The first application frame was not a text frame holding JSON.
    #[error("malformed auth frame")]
    Malformed,

    /// The assertion's `type` field was not `auth`.
    #[error("unexpected message type")]
    WrongType,

    /// The secret did not match.
    #[error("invalid secret")]
    InvalidSecret,

    /// The transport closed or failed while waiting.
    #[error("transport closed during handshake")]
    TransportClosed,
}

impl AuthError {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuthError::Timeout => "timeout",
            AuthError::Malformed => "malformed",
            AuthError::WrongType => "wrong_type",
            AuthError::InvalidSecret => "invalid_secret",
            AuthError::TransportClosed => "transport_closed",
        }
    }
}

impl AdmissionRejection {
    /// Returns the HTTP status code for this rejection.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            AdmissionRejection::Throttled(_) => StatusCode::TOO_MANY_REQUESTS,
            AdmissionRejection::MissingRoom => StatusCode::BAD_REQUEST,
            AdmissionRejection::UnknownRoom => StatusCode::NOT_FOUND,
            AdmissionRejection::OriginNotAllowed => StatusCode::FORBIDDEN,
            AdmissionRejection::Unauthorized => StatusCode::UNAUTHORIZED,
            AdmissionRejection::CapacityExceeded | AdmissionRejection::Unavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AdmissionRejection::UpgradeRequired => StatusCode::UPGRADE_REQUIRED,
        }
    }

    /// Bounded label for metrics and the response body.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            AdmissionRejection::Throttled(_) => "RATE_LIMIT_EXCEEDED",
            AdmissionRejection::MissingRoom => "BAD_REQUEST",
            AdmissionRejection::UnknownRoom => "NOT_FOUND",
            AdmissionRejection::OriginNotAllowed => "FORBIDDEN",
            AdmissionRejection::Unauthorized => "UNAUTHORIZED",
            AdmissionRejection::CapacityExceeded => "CAPACITY_EXCEEDED",
            AdmissionRejection::UpgradeRequired => "UPGRADE_REQUIRED",
            AdmissionRejection::Unavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Returns a client-safe message.
    #[must_use]
    pub fn client_message(&self) -> &'static str {
        match self {
            AdmissionRejection::Throttled(_) => "Too Many Requests",
            AdmissionRejection::MissingRoom => "Bad request, sorry",
            AdmissionRejection::UnknownRoom => "not found",
            AdmissionRejection::OriginNotAllowed => "Origin not allowed",
            AdmissionRejection::Unauthorized => "Unauthorized",
            AdmissionRejection::CapacityExceeded => "Server at capacity",
            AdmissionRejection::UpgradeRequired => "WebSocket upgrade required",
            AdmissionRejection::Unavailable => "Service temporarily unavailable",
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: &'static str,
}

impl IntoResponse for AdmissionRejection {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.client_message(),
            },
        };

        let mut response = (self.status_code(), Json(body)).into_response();

        if let AdmissionRejection::Throttled(headers) = &self {
            let map = response.headers_mut();
            map.insert("x-ratelimit-limit", HeaderValue::from(headers.limit));
            map.insert("x-ratelimit-remaining", HeaderValue::from(headers.remaining));
            map.insert(
                "x-ratelimit-reset",
                HeaderValue::from(headers.reset_at(Utc::now())),
            );
        }

        response
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_code_mapping() {
        let throttled = AdmissionRejection::Throttled(ThrottleHeaders {
            limit: 60,
            remaining: 0,
            reset_seconds: 12,
        });
        assert_eq!(throttled.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            AdmissionRejection::MissingRoom.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AdmissionRejection::UnknownRoom.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AdmissionRejection::OriginNotAllowed.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AdmissionRejection::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AdmissionRejection::CapacityExceeded.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AdmissionRejection::UpgradeRequired.status_code(),
            StatusCode::UPGRADE_REQUIRED
        );
    }

    #[test]
    fn test_throttled_response_carries_rate_limit_headers() {
        let before = Utc::now().timestamp();
        let response = AdmissionRejection::Throttled(ThrottleHeaders {
            limit: 60,
            remaining: 0,
            reset_seconds: 42,
        })
        .into_response();
        let after = Utc::now().timestamp();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let headers = response.headers();
        assert_eq!(headers.get("x-ratelimit-limit").unwrap(), "60");
        assert_eq!(headers.get("x-ratelimit-remaining").unwrap(), "0");

        // Reset is an absolute epoch timestamp, not a countdown
        let reset: i64 = headers
            .get("x-ratelimit-reset")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((before + 42..=after + 42).contains(&reset), "reset = {reset}");
    }

    #[test]
    fn test_reset_at_is_window_end_in_unix_seconds() {
        let headers = ThrottleHeaders {
            limit: 60,
            remaining: 3,
            reset_seconds: 40,
        };
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();

        assert_eq!(headers.reset_at(now), 1_700_000_040);

        let far = ThrottleHeaders {
            reset_seconds: u64::MAX,
            ..headers
        };
        assert_eq!(far.reset_at(now), i64::MAX);
    }

    #[test]
    fn test_auth_error_conversion() {
        let err: RelayError = AuthError::InvalidSecret.into();
        assert!(matches!(
            err,
            RelayError::Authentication(AuthError::InvalidSecret)
        ));
        assert_eq!(
            format!("{err}"),
            "Authentication failed: invalid secret"
        );
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RelayError::Transport("reset by peer".to_string())),
            "Transport error: reset by peer"
        );
        assert_eq!(
            format!("{}", RelayError::MailboxFull("connection")),
            "Mailbox full: connection"
        );
        assert_eq!(
            format!(
                "{}",
                RelayError::AdmissionRejected(AdmissionRejection::CapacityExceeded)
            ),
            "Admission rejected: server at capacity"
        );
    }
}
