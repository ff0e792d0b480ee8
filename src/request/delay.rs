//! Randomized delays: humanized pre-send pauses and attempt-scaled backoff

use std::time::Duration;

use rand::Rng;

/// Inclusive range a delay is drawn from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    pub const fn zero() -> Self {
        Self::from_millis(0, 0)
    }

    /// Draw a delay uniformly from the range
    pub fn sample(&self) -> Duration {
        let (lo, hi) = self.bounds_ms();
        if lo >= hi {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    /// The same range multiplied by `attempt`, with both ends capped at `cap`
    pub fn scaled(&self, attempt: u32, cap: Duration) -> DelayRange {
        let factor = attempt.max(1);
        DelayRange {
            min: self.min.saturating_mul(factor).min(cap),
            max: self.max.saturating_mul(factor).min(cap),
        }
    }

    fn bounds_ms(&self) -> (u64, u64) {
        (self.min.as_millis() as u64, self.max.as_millis() as u64)
    }
}

/// Uniform base delay plus up to `jitter` of extra noise
///
/// Keeps consecutive sends from landing on a fixed interval.
pub fn humanized(range: DelayRange, jitter: Duration) -> Duration {
    let extra = jitter.as_millis() as u64;
    let noise = if extra == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..extra)
    };
    range.sample() + Duration::from_millis(noise)
}

/// Backoff before the attempt following `attempt` (1-based)
pub fn backoff(base: DelayRange, attempt: u32, cap: Duration) -> Duration {
    base.scaled(attempt, cap).sample()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_stays_in_range() {
        let range = DelayRange::from_millis(100, 200);
        for _ in 0..100 {
            let d = range.sample();
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_sample_degenerate_ranges() {
        assert_eq!(DelayRange::zero().sample(), Duration::ZERO);
        let inverted = DelayRange::from_millis(500, 100);
        assert_eq!(inverted.sample(), Duration::from_millis(500));
    }

    #[test]
    fn test_scaled_grows_with_attempt_and_caps() {
        let base = DelayRange::from_millis(1_000, 2_000);
        let cap = Duration::from_millis(5_000);

        assert_eq!(base.scaled(1, cap), base);
        assert_eq!(base.scaled(2, cap), DelayRange::from_millis(2_000, 4_000));
        assert_eq!(base.scaled(4, cap), DelayRange::from_millis(4_000, 5_000));
        assert_eq!(base.scaled(10, cap), DelayRange::from_millis(5_000, 5_000));
        assert_eq!(base.scaled(0, cap), base);
    }

    #[test]
    fn test_backoff_is_monotonic_in_lower_bound() {
        let base = DelayRange::from_millis(100, 100);
        let cap = Duration::from_secs(60);
        assert_eq!(backoff(base, 1, cap), Duration::from_millis(100));
        assert_eq!(backoff(base, 3, cap), Duration::from_millis(300));
    }

    #[test]
    fn test_humanized_adds_bounded_jitter() {
        let range = DelayRange::from_millis(10, 10);
        for _ in 0..50 {
            let d = humanized(range, Duration::from_millis(5));
            assert!(d >= Duration::from_millis(10) && d < Duration::from_millis(15));
        }
        assert_eq!(humanized(range, Duration::ZERO), Duration::from_millis(10));
    }
}
