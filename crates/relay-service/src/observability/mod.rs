//! Observability for the relay.
//!
//! All instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Secrets and payload bytes are never logged or used as labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `relay_connections_active` | Gauge | none | Joined clients across all rooms |
//! | `relay_rooms_active` | Gauge | none | Non-empty rooms |
//! | `relay_hub_mailbox_depth` | Gauge | none | Hub backpressure |
//! | `relay_admissions_total` | Counter | `outcome` | Boundary decisions |
//! | `relay_handshakes_total` | Counter | `outcome` | Auth results |
//! | `relay_frames_received_total` | Counter | none | Binary frames accepted from clients |
//! | `relay_frames_fanned_out_total` | Counter | none | Deliveries enqueued by the hub |
//! | `relay_frames_rate_limited_total` | Counter | none | Frames dropped by the sliding window |
//! | `relay_connections_closed_total` | Counter | `reason` | Close causes |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
