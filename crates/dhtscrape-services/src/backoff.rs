//! Restart delay between failed sessions.

use std::time::Duration;

/// Decides how long the driver waits before the next session attempt.
pub trait Backoff: Send + Sync {
    /// `consecutive_failures` is at least 1.
    fn delay(&self, consecutive_failures: u32) -> Duration;
}

/// Retry immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _consecutive_failures: u32) -> Duration {
        Duration::ZERO
    }
}

/// `base * 2^(failures - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << shift)
            .unwrap_or(self.max)
            .min(self.max)
    }
}

/// Pick a strategy from config values. A zero base means no backoff.
pub fn from_millis(base_ms: u64, max_ms: u64) -> Box<dyn Backoff> {
    if base_ms == 0 {
        Box::new(NoBackoff)
    } else {
        Box::new(ExponentialBackoff {
            base: Duration::from_millis(base_ms),
            max: Duration::from_millis(max_ms.max(base_ms)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_backoff_is_zero() {
        assert_eq!(NoBackoff.delay(1), Duration::ZERO);
        assert_eq!(NoBackoff.delay(100), Duration::ZERO);
    }

    #[test]
    fn exponential_doubles_then_caps() {
        let b = ExponentialBackoff {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(4), Duration::from_millis(800));
        assert_eq!(b.delay(5), Duration::from_secs(1));
        assert_eq!(b.delay(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn zero_base_selects_no_backoff() {
        assert_eq!(from_millis(0, 5_000).delay(3), Duration::ZERO);
        assert_eq!(from_millis(50, 10).delay(1), Duration::from_millis(50));
    }
}
