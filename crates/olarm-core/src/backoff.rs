// ── Reconnect backoff ──
//
// Exponential delay with subtractive jitter. Consecutive delays never
// shrink and never exceed the cap; a sufficiently long healthy period
// resets the sequence to the initial delay. There is no attempt limit.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Stateful delay sequence for one retrying loop.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    jitter: f64,
    attempt: u32,
    last: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let jitter = if config.jitter.is_finite() {
            config.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            config,
            jitter,
            attempt: 0,
            last: Duration::ZERO,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Next delay using the thread-local RNG.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    /// Next delay with an explicit jitter source.
    ///
    /// `delay = clamp(max(previous, min(initial * 2^attempt, max) * (1 - u * jitter)), max)`
    /// with `u` uniform in `[0, 1)`.
    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        let factor = 2_u32.saturating_pow(self.attempt);
        let exponential = self.config.initial.saturating_mul(factor).min(self.config.max);

        let candidate = if self.jitter > 0.0 {
            let cut: f64 = rng.gen_range(0.0..1.0) * self.jitter;
            exponential.mul_f64(1.0 - cut)
        } else {
            exponential
        };

        let delay = candidate.max(self.last).min(self.config.max);
        self.last = delay;
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Record the end of a healthy period that lasted `live_for`.
    ///
    /// Returns `true` when the sequence was reset to the initial delay.
    pub fn on_disconnect(&mut self, live_for: Duration) -> bool {
        if live_for >= self.config.reset_after {
            self.reset();
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.last = Duration::ZERO;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn config(jitter: f64) -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            reset_after: Duration::from_secs(60),
            jitter,
        }
    }

    #[test]
    fn without_jitter_delays_double_up_to_cap() {
        let mut backoff = Backoff::new(config(0.0));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn jitter_only_shortens_the_first_delay() {
        let mut backoff = Backoff::new(config(0.25));
        let first = backoff.next_delay();
        assert!(first <= Duration::from_secs(1));
        assert!(first >= Duration::from_millis(750));
    }

    #[test]
    fn long_live_period_resets() {
        let mut backoff = Backoff::new(config(0.0));
        for _ in 0..5 {
            backoff.next_delay();
        }
        assert!(!backoff.on_disconnect(Duration::from_secs(59)));
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));

        assert!(backoff.on_disconnect(Duration::from_secs(60)));
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn huge_attempt_counts_saturate_at_cap() {
        let mut backoff = Backoff::new(config(0.0));
        for _ in 0..200 {
            backoff.next_delay();
        }
        assert_eq!(backoff.next_delay(), Duration::from_secs(60));
    }

    proptest! {
        #[test]
        fn delays_are_non_decreasing_and_capped(
            seed in any::<u64>(),
            jitter in 0.0_f64..=1.0,
            steps in 1_usize..64,
        ) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut backoff = Backoff::new(config(jitter));
            let mut previous = Duration::ZERO;
            for _ in 0..steps {
                let delay = backoff.next_delay_with(&mut rng);
                prop_assert!(delay >= previous);
                prop_assert!(delay <= Duration::from_secs(60));
                previous = delay;
            }
        }

        #[test]
        fn reset_returns_to_initial_band(seed in any::<u64>(), steps in 1_usize..32) {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut backoff = Backoff::new(config(0.25));
            for _ in 0..steps {
                backoff.next_delay_with(&mut rng);
            }
            backoff.on_disconnect(Duration::from_secs(120));
            let delay = backoff.next_delay_with(&mut rng);
            prop_assert!(delay <= Duration::from_secs(1));
            prop_assert!(delay >= Duration::from_millis(750));
        }
    }
}
