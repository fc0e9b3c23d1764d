//! Metrics definitions for the relay.
//!
//! All metrics follow Prometheus naming conventions:
//! - `relay_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: 2 values (hub, connection)
//! - `outcome`: bounded by admission/handshake outcomes (~10 values)
//! - `reason`: bounded close reasons (~8 values)
//!
//! Room names are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Handshake latency: bounded above by the auth timeout (seconds)
        .set_buckets_for_metric(
            Matcher::Prefix("relay_handshake".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set handshake buckets: {e}"))?
        // Session lifetimes range from instant rejection to hours
        .set_buckets_for_metric(
            Matcher::Prefix("relay_session_duration".to_string()),
            &[1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0, 14400.0],
        )
        .map_err(|e| format!("Failed to set session duration buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

// ============================================================================
// Registry Metrics (Gauges)
// ============================================================================

/// Set the number of joined clients across all rooms.
///
/// Metric: `relay_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 conversion is safe for realistic client counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_connections_active").set(count as f64);
}

/// Set the number of non-empty rooms.
///
/// Metric: `relay_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_rooms_active").set(count as f64);
}

/// Set the hub mailbox depth.
///
/// Metric: `relay_hub_mailbox_depth`
///
/// High values mean the hub is falling behind on joins and fan-out.
pub fn set_hub_mailbox_depth(depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("relay_hub_mailbox_depth").set(depth as f64);
}

// ============================================================================
// Admission & Handshake (Counters, Histograms)
// ============================================================================

/// Record an admission decision at the HTTP boundary.
///
/// Metric: `relay_admissions_total`
/// Labels: `outcome` (accepted, or an `AdmissionRejection` code)
pub fn record_admission(outcome: &'static str) {
    counter!("relay_admissions_total", "outcome" => outcome).increment(1);
}

/// Record a handshake result and how long it took.
///
/// Metrics: `relay_handshakes_total`, `relay_handshake_duration_seconds`
/// Labels: `outcome` (success, or an `AuthError` label)
pub fn record_handshake(outcome: &'static str, duration: Duration) {
    counter!("relay_handshakes_total", "outcome" => outcome).increment(1);
    histogram!("relay_handshake_duration_seconds").record(duration.as_secs_f64());
}

// ============================================================================
// Relay Traffic (Counters)
// ============================================================================

/// Record a binary frame accepted from a client for broadcast.
///
/// Metric: `relay_frames_received_total`
pub fn record_frame_received() {
    counter!("relay_frames_received_total").increment(1);
}

/// Record how many recipient mailboxes accepted a broadcast.
///
/// Metric: `relay_frames_fanned_out_total`
pub fn record_frames_fanned_out(count: u64) {
    counter!("relay_frames_fanned_out_total").increment(count);
}

/// Record a frame dropped by the per-connection rate limiter.
///
/// Metric: `relay_frames_rate_limited_total`
pub fn record_frame_rate_limited() {
    counter!("relay_frames_rate_limited_total").increment(1);
}

/// Record a failed write to a client.
///
/// Metric: `relay_send_failures_total`
pub fn record_send_failure() {
    counter!("relay_send_failures_total").increment(1);
}

/// Record messages dropped due to a full mailbox.
///
/// Metric: `relay_mailbox_dropped_total`
/// Labels: `actor_type`
pub fn record_mailbox_drop(actor_type: &'static str) {
    counter!("relay_mailbox_dropped_total", "actor_type" => actor_type).increment(1);
}

/// Record a member removed from its room because it could not keep up.
///
/// Metric: `relay_members_evicted_total`
pub fn record_member_evicted() {
    counter!("relay_members_evicted_total").increment(1);
}

// ============================================================================
// Session Lifecycle
// ============================================================================

/// Record a connection close and its lifetime.
///
/// Metrics: `relay_connections_closed_total`, `relay_session_duration_seconds`
/// Labels: `reason`
pub fn record_connection_closed(reason: &'static str, lifetime: Duration) {
    counter!("relay_connections_closed_total", "reason" => reason).increment(1);
    histogram!("relay_session_duration_seconds").record(lifetime.as_secs_f64());
}
