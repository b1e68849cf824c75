//! Inbound heart-beat supervision.
//!
//! Detects half-open links: the server promised traffic at least every
//! `interval`, so silence for `limit` consecutive intervals means the link is
//! dead even if TCP has not noticed yet.

use std::time::Duration;

use tokio::time::Instant;

/// Tracks the last time anything arrived on the link.
#[derive(Debug, Clone)]
pub struct Liveness {
    interval: Duration,
    limit: u32,
    last_seen: Instant,
}

impl Liveness {
    /// Start supervising at `now`. A zero `interval` disables supervision.
    #[must_use]
    pub fn new(interval: Duration, limit: u32, now: Instant) -> Self {
        Self {
            interval,
            limit: limit.max(1),
            last_seen: now,
        }
    }

    /// Whether supervision is on.
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Record inbound traffic (a frame, a heart-beat or a ping).
    pub fn saw_traffic(&mut self, now: Instant) {
        self.last_seen = now;
    }

    /// Whole intervals elapsed since the last traffic.
    #[must_use]
    pub fn missed(&self, now: Instant) -> u32 {
        if !self.enabled() {
            return 0;
        }
        let silent = now.saturating_duration_since(self.last_seen);
        u32::try_from(silent.as_millis() / self.interval.as_millis().max(1)).unwrap_or(u32::MAX)
    }

    /// Whether the link should be treated as failed.
    #[must_use]
    pub fn is_dead(&self, now: Instant) -> bool {
        self.enabled() && self.missed(now) >= self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_missed_intervals_is_dead() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);
        let liveness = Liveness::new(interval, 2, start);

        assert!(!liveness.is_dead(start + Duration::from_millis(150)));
        assert_eq!(liveness.missed(start + Duration::from_millis(150)), 1);
        assert!(liveness.is_dead(start + Duration::from_millis(200)));
    }

    #[test]
    fn test_traffic_resets_the_clock() {
        let start = Instant::now();
        let mut liveness = Liveness::new(Duration::from_millis(100), 2, start);
        liveness.saw_traffic(start + Duration::from_millis(150));
        assert!(!liveness.is_dead(start + Duration::from_millis(300)));
        assert!(liveness.is_dead(start + Duration::from_millis(350)));
    }

    #[test]
    fn test_disabled_never_dies() {
        let start = Instant::now();
        let liveness = Liveness::new(Duration::ZERO, 2, start);
        assert!(!liveness.enabled());
        assert!(!liveness.is_dead(start + Duration::from_secs(3600)));
    }
}
