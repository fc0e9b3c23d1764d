//! Per-address request throttle for upgrade requests.
//!
//! Fixed windows keyed by client address, consulted at the HTTP boundary
//! before any actor is involved. Synchronized by `DashMap` shard locks, not
//! by an actor, so a flood of rejected requests never queues on the hub.

use crate::errors::{AdmissionRejection, ThrottleHeaders};

use axum::http::HeaderMap;
use dashmap::DashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter per client address.
#[derive(Debug)]
pub struct RequestThrottle {
    limit: u32,
    window: Duration,
    windows: DashMap<IpAddr, Window>,
}

impl RequestThrottle {
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: DashMap::new(),
        }
    }

    /// Count one request from `addr` at `now`.
    ///
    /// # Errors
    ///
    /// Returns `AdmissionRejection::Throttled` with the rate-limit headers
    /// once the address has used up its window.
    pub fn check(&self, addr: IpAddr, now: Instant) -> Result<ThrottleHeaders, AdmissionRejection> {
        let mut entry = self.windows.entry(addr).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        let elapsed = now.saturating_duration_since(entry.started);
        let reset_seconds = self.window.saturating_sub(elapsed).as_secs_f64().ceil();
        // Window lengths are configured in whole seconds
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let reset_seconds = reset_seconds as u64;

        if entry.count >= self.limit {
            return Err(AdmissionRejection::Throttled(ThrottleHeaders {
                limit: self.limit,
                remaining: 0,
                reset_seconds,
            }));
        }

        entry.count += 1;
        Ok(ThrottleHeaders {
            limit: self.limit,
            remaining: self.limit - entry.count,
            reset_seconds,
        })
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
        before - self.windows.len()
    }

    /// Number of addresses currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}

/// Address a request is attributed to: the first `X-Forwarded-For` entry if
/// it parses, otherwise the socket peer.
#[must_use]
pub fn client_addr(headers: &HeaderMap, peer: SocketAddr) -> IpAddr {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|first| first.trim().parse().ok())
        .unwrap_or_else(|| peer.ip())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::Ipv4Addr;

    const A: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const B: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    #[tokio::test(start_paused = true)]
    async fn test_limit_per_window() {
        let throttle = RequestThrottle::new(3, Duration::from_secs(60));
        let now = Instant::now();

        let first = throttle.check(A, now).unwrap();
        assert_eq!(first.remaining, 2);
        assert_eq!(first.reset_seconds, 60);
        throttle.check(A, now).unwrap();
        let third = throttle.check(A, now).unwrap();
        assert_eq!(third.remaining, 0);

        match throttle.check(A, now + Duration::from_secs(20)) {
            Err(AdmissionRejection::Throttled(headers)) => {
                assert_eq!(headers.limit, 3);
                assert_eq!(headers.remaining, 0);
                assert_eq!(headers.reset_seconds, 40);
            }
            other => panic!("expected Throttled, got {other:?}"),
        }

        // Other addresses have their own window
        assert!(throttle.check(B, now).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets() {
        let throttle = RequestThrottle::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(throttle.check(A, now).is_ok());
        assert!(throttle.check(A, now + Duration::from_secs(59)).is_err());
        assert!(throttle.check(A, now + Duration::from_secs(60)).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_expired_windows() {
        let throttle = RequestThrottle::new(5, Duration::from_secs(60));
        let now = Instant::now();

        throttle.check(A, now).unwrap();
        throttle.check(B, now + Duration::from_secs(30)).unwrap();
        assert_eq!(throttle.tracked(), 2);

        assert_eq!(throttle.sweep(now + Duration::from_secs(61)), 1);
        assert_eq!(throttle.tracked(), 1);
    }

    #[test]
    fn test_client_addr_prefers_first_forwarded_entry() {
        let peer: SocketAddr = "192.168.1.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_addr(&headers, peer), peer.ip());

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            client_addr(&headers, peer),
            "203.0.113.7".parse::<IpAddr>().unwrap()
        );

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(client_addr(&headers, peer), peer.ip());
    }
}
