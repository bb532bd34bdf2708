//! Bounded exponential backoff with jitter.

use rand::{thread_rng, Rng};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff { base, max: max.max(base) }
    }

    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn ceiling(&self, attempt: u32) -> Duration {
        let base = self.base.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(16)); // cap growth
        Duration::from_millis(exp.min(self.max.as_millis() as u64))
    }

    /// Delay before retry number `attempt` with up to 25% random jitter added.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.ceiling(attempt).as_millis() as u64;
        let jitter = thread_rng().gen_range(0..=exp / 4);
        Duration::from_millis(exp + jitter)
    }
}
