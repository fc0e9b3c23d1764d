//! Per-connection sliding-window message limiter.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Accepts at most `max_messages` within any `window`.
///
/// Expired timestamps are pruned lazily on each check, so the cost of a
/// check is bounded by `max_messages`, not by elapsed time.
#[derive(Debug)]
pub struct SlidingWindow {
    max_messages: usize,
    window: Duration,
    accepted: VecDeque<Instant>,
}

impl SlidingWindow {
    #[must_use]
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            max_messages,
            window,
            accepted: VecDeque::new(),
        }
    }

    /// Record an attempt at `now`. Returns `false` if it exceeds the ceiling;
    /// rejected attempts are not recorded.
    pub fn check(&mut self, now: Instant) -> bool {
        while let Some(&oldest) = self.accepted.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.accepted.pop_front();
            } else {
                break;
            }
        }

        if self.accepted.len() >= self.max_messages {
            return false;
        }

        self.accepted.push_back(now);
        true
    }

    /// Accepted attempts still inside the window as of the last check.
    #[cfg(test)]
    fn in_window(&self) -> usize {
        self.accepted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_then_recovery_after_window() {
        let mut limiter = SlidingWindow::new(3, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check(start));
        assert!(limiter.check(start + Duration::from_millis(100)));
        assert!(limiter.check(start + Duration::from_millis(200)));
        assert!(!limiter.check(start + Duration::from_millis(300)));

        let later = start + Duration::from_millis(1300);
        assert!(limiter.check(later));
        assert!(limiter.check(later));
        assert!(limiter.check(later));
        assert!(!limiter.check(later));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_slides_one_slot_at_a_time() {
        let mut limiter = SlidingWindow::new(2, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check(start));
        assert!(limiter.check(start + Duration::from_millis(500)));
        assert!(!limiter.check(start + Duration::from_millis(900)));

        // First timestamp has aged out, second has not
        assert!(limiter.check(start + Duration::from_millis(1000)));
        assert!(!limiter.check(start + Duration::from_millis(1100)));
        assert_eq!(limiter.in_window(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_are_not_recorded() {
        let mut limiter = SlidingWindow::new(1, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.check(start));
        for ms in [100, 200, 300, 400] {
            assert!(!limiter.check(start + Duration::from_millis(ms)));
        }
        assert_eq!(limiter.in_window(), 1);
        assert!(limiter.check(start + Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_ceiling_rejects_everything() {
        let mut limiter = SlidingWindow::new(0, Duration::from_secs(1));
        assert!(!limiter.check(Instant::now()));
    }
}
