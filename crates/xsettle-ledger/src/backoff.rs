//! Exponential backoff between submission attempts.

use std::time::Duration;

use rand::Rng;
use xsettle_types::SubmitterConfig;

/// Doubling delay, capped, with optional random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    jitter: bool,
}

impl BackoffPolicy {
    #[must_use]
    pub fn new(initial: Duration, max: Duration, jitter: bool) -> Self {
        Self {
            initial,
            max: max.max(initial),
            jitter,
        }
    }

    #[must_use]
    pub fn from_config(config: &SubmitterConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
            config.backoff_jitter,
        )
    }

    /// Delay after the `attempt`-th failed try (1-based). Never exceeds the
    /// configured maximum.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let base = self.initial.saturating_mul(1 << shift).min(self.max);
        if !self.jitter || base.is_zero() {
            return base;
        }
        let half = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        let extra = rand::thread_rng().gen_range(0..=half);
        (base + Duration::from_millis(extra)).min(self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_millis(1000), jitter)
    }

    #[test]
    fn doubles_until_cap() {
        let p = policy(false);
        let delays: Vec<u64> = (1..=6).map(|a| p.delay(a).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let p = policy(true);
        for attempt in 1..=8 {
            let base = policy(false).delay(attempt);
            for _ in 0..50 {
                let d = p.delay(attempt);
                assert!(d >= base, "attempt {attempt}: {d:?} < {base:?}");
                assert!(d <= Duration::from_millis(1000));
            }
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        assert_eq!(policy(false).delay(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn from_config_reads_millis() {
        let cfg = SubmitterConfig {
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            backoff_jitter: false,
            ..SubmitterConfig::default()
        };
        let p = BackoffPolicy::from_config(&cfg);
        assert_eq!(p.delay(1), Duration::from_millis(5));
        assert_eq!(p.delay(4), Duration::from_millis(20));
    }
}
