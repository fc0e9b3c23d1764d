//! Mailbox depth tracking.
//!
//! | Actor      | Normal  | Elevated   | Critical |
//! |------------|---------|------------|----------|
//! | Hub        | <= 1000 | 1001-4000  | > 4000   |
//! | Connection | <= 64   | 65-256     | > 256    |
//!
//! A connection mailbox in the critical band means that client is not
//! draining its socket; the hub evicts it once the queue is full. The hub
//! should never get near its bands in practice.

use crate::observability::metrics as relay_metrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Depth bands for one kind of mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthBands {
    /// Highest depth still considered normal.
    pub normal: usize,
    /// Highest depth still considered elevated; anything above is critical.
    pub elevated: usize,
}

pub const HUB_BANDS: DepthBands = DepthBands {
    normal: 1000,
    elevated: 4000,
};

pub const CONNECTION_BANDS: DepthBands = DepthBands {
    normal: 64,
    elevated: 256,
};

/// Which kind of owner a mailbox feeds. Used as a metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    Hub,
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Hub => "hub",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn bands(&self) -> DepthBands {
        match self {
            ActorType::Hub => HUB_BANDS,
            ActorType::Connection => CONNECTION_BANDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Elevated,
    Critical,
}

impl MailboxLevel {
    fn for_depth(depth: usize, bands: DepthBands) -> Self {
        if depth > bands.elevated {
            MailboxLevel::Critical
        } else if depth > bands.normal {
            MailboxLevel::Elevated
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Point-in-time counters of one mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxStats {
    pub depth: usize,
    pub peak: usize,
    pub processed: u64,
    pub dropped: u64,
}

/// Shared between a mailbox's senders and its receiver.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    owner: String,
    depth: AtomicUsize,
    peak: AtomicUsize,
    processed: AtomicU64,
    dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, owner: impl Into<String>) -> Self {
        Self {
            actor_type,
            owner: owner.into(),
            depth: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn actor_type(&self) -> ActorType {
        self.actor_type
    }

    /// A message is about to be queued.
    pub fn record_enqueue(&self) {
        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(depth, Ordering::Relaxed);

        // Log on the way into a band, not for every message inside it
        let bands = self.actor_type.bands();
        if depth == bands.elevated + 1 {
            warn!(
                target: "relay.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                "Mailbox depth critical"
            );
        } else if depth == bands.normal + 1 {
            debug!(
                target: "relay.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                owner = %self.owner,
                depth,
                "Mailbox depth elevated"
            );
        }

        self.publish_depth(depth);
    }

    /// A queued message was taken by the owner.
    pub fn record_dequeue(&self) {
        let depth = self.decrement();
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.publish_depth(depth);
    }

    /// The enqueue was counted but the message never made it into the queue.
    pub fn record_cancel(&self) {
        let depth = self.decrement();
        self.publish_depth(depth);
    }

    /// The queue was full and the message was discarded.
    pub fn record_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        relay_metrics::record_mailbox_drop(self.actor_type.as_str());
        warn!(
            target: "relay.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            owner = %self.owner,
            dropped,
            "Mailbox full, message dropped"
        );
    }

    #[must_use]
    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            depth: self.depth.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn level(&self) -> MailboxLevel {
        MailboxLevel::for_depth(self.depth.load(Ordering::Relaxed), self.actor_type.bands())
    }

    /// Saturating decrement; returns the new depth.
    fn decrement(&self) -> usize {
        self.depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .map_or(0, |previous| previous.saturating_sub(1))
    }

    // Per-connection gauges would be unbounded; only the hub is exported.
    fn publish_depth(&self, depth: usize) {
        if self.actor_type == ActorType::Hub {
            relay_metrics::set_hub_mailbox_depth(depth);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_labels() {
        assert_eq!(ActorType::Hub.as_str(), "hub");
        assert_eq!(ActorType::Connection.as_str(), "connection");
    }

    #[test]
    fn test_depth_and_peak() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-1");

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_dequeue();

        let stats = monitor.stats();
        assert_eq!(stats.depth, 2);
        assert_eq!(stats.peak, 3);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dropped, 0);
    }

    #[test]
    fn test_cancel_does_not_count_as_processed() {
        let monitor = MailboxMonitor::new(ActorType::Hub, "hub");
        monitor.record_enqueue();
        monitor.record_cancel();

        let stats = monitor.stats();
        assert_eq!(stats.depth, 0);
        assert_eq!(stats.processed, 0);
    }

    #[test]
    fn test_depth_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Hub, "hub");
        monitor.record_dequeue();
        monitor.record_cancel();
        assert_eq!(monitor.stats().depth, 0);
    }

    #[test]
    fn test_connection_levels() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-levels");

        for _ in 0..CONNECTION_BANDS.normal {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.level(), MailboxLevel::Normal);

        monitor.record_enqueue();
        assert_eq!(monitor.level(), MailboxLevel::Elevated);

        while monitor.stats().depth <= CONNECTION_BANDS.elevated {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_drops_are_counted() {
        let monitor = MailboxMonitor::new(ActorType::Connection, "conn-drop");
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.stats().dropped, 2);
    }
}
