//! Reconnect backoff.
//!
//! Exponential with a cap and full jitter by default: attempt `n` waits a
//! uniformly random delay in `[0, min(cap, base * factor^(n-1))]`, which keeps
//! a fleet of clients from retrying in lockstep after a server restart.
//! [`Backoff::fixed`] gives the plain constant delay.

use std::time::Duration;

use rand::Rng;

use crate::constants::{RECONNECT_BASE, RECONNECT_CAP, RECONNECT_FACTOR};

/// How the ceiling is turned into an actual delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Always wait the full ceiling.
    None,
    /// Wait a uniformly random delay between zero and the ceiling.
    Full,
}

/// Reconnect delay policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Ceiling for the first attempt.
    pub base: Duration,
    /// Ceiling growth per attempt.
    pub factor: u32,
    /// Largest ceiling.
    pub cap: Duration,
    /// Jitter mode.
    pub jitter: Jitter,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(RECONNECT_BASE, RECONNECT_FACTOR, RECONNECT_CAP)
    }
}

impl Backoff {
    /// Exponential growth with full jitter.
    #[must_use]
    pub fn exponential(base: Duration, factor: u32, cap: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1),
            cap: cap.max(base),
            jitter: Jitter::Full,
        }
    }

    /// The same delay every time.
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base: delay,
            factor: 1,
            cap: delay,
            jitter: Jitter::None,
        }
    }

    /// Upper bound for attempt `attempt` (1-based).
    #[must_use]
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        self.factor
            .checked_pow(exp)
            .map_or(self.cap, |mult| self.base.saturating_mul(mult))
            .min(self.cap)
    }

    /// Delay to wait before attempt `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let ceiling = self.ceiling(attempt);
        match self.jitter {
            Jitter::None => ceiling,
            Jitter::Full => {
                let max_ms = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
                Duration::from_millis(rand::rng().random_range(0..=max_ms))
            }
        }
    }
}
