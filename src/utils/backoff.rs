use rand::Rng;
use std::time::Duration;

/// Delay between attempts while a lock is contended.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Grows the delay by `multiplier` after every retry, capped at `max`,
    /// plus up to `jitter` of random delay.
    Exponential {
        initial: Duration,
        max: Duration,
        multiplier: f64,
        jitter: Duration,
    },
}

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

impl RetryPolicy {
    pub fn fixed(interval: Duration) -> Self {
        RetryPolicy::Fixed(interval)
    }

    /// 10ms growing 1.5x up to `max`, with up to 100ms of jitter.
    pub fn exponential(max: Duration) -> Self {
        RetryPolicy::Exponential {
            initial: Duration::from_millis(10),
            max,
            multiplier: 1.5,
            jitter: Duration::from_millis(100),
        }
    }

    pub(crate) fn backoff(&self) -> Backoff<'_> {
        let current = match self {
            RetryPolicy::Fixed(interval) => *interval,
            RetryPolicy::Exponential { initial, .. } => *initial,
        };
        Backoff {
            policy: self,
            current,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(DEFAULT_RETRY_INTERVAL)
    }
}

/// Iterator-like state for one acquisition attempt.
#[derive(Debug)]
pub(crate) struct Backoff<'a> {
    policy: &'a RetryPolicy,
    current: Duration,
}

impl Backoff<'_> {
    /// The delay to wait before the next retry.
    pub(crate) fn next_delay(&mut self) -> Duration {
        match self.policy {
            RetryPolicy::Fixed(interval) => (*interval).max(MIN_DELAY),
            RetryPolicy::Exponential {
                max,
                multiplier,
                jitter,
                ..
            } => {
                let base = self.current.min(*max);
                let jitter_ms = u64::try_from(jitter.as_millis()).unwrap_or(u64::MAX);
                let extra = if jitter_ms > 0 {
                    Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
                } else {
                    Duration::ZERO
                };

                // NaN, infinite or overflowing growth saturates at `max`
                let factor = if multiplier.is_nan() { 1.0 } else { multiplier.max(1.0) };
                self.current = Duration::try_from_secs_f64(base.as_secs_f64() * factor)
                    .unwrap_or(*max)
                    .min(*max);
                base.saturating_add(extra).max(MIN_DELAY)
            }
        }
    }
}

// A zero delay would turn the wait into a spin.
const MIN_DELAY: Duration = Duration::from_millis(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_fixed_100ms() {
        let policy = RetryPolicy::default();
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_interval_never_spins() {
        let policy = RetryPolicy::fixed(Duration::ZERO);
        assert_eq!(policy.backoff().next_delay(), MIN_DELAY);
    }

    #[test]
    fn test_exponential_grows_and_caps() {
        let policy = RetryPolicy::Exponential {
            initial: Duration::from_millis(10),
            max: Duration::from_millis(40),
            multiplier: 2.0,
            jitter: Duration::ZERO,
        };
        let mut backoff = policy.backoff();
        let delays: Vec<_> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 40, 40]);
    }

    #[test]
    fn test_unbounded_growth_saturates_at_max() {
        for multiplier in [f64::INFINITY, f64::MAX, f64::NAN] {
            let policy = RetryPolicy::Exponential {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(40),
                multiplier,
                jitter: Duration::ZERO,
            };
            let mut backoff = policy.backoff();
            assert_eq!(backoff.next_delay(), Duration::from_millis(10));
            let next = backoff.next_delay();
            assert!(next >= Duration::from_millis(10) && next <= Duration::from_millis(40));
        }
    }

    #[test]
    fn test_huge_jitter_and_max_do_not_overflow() {
        let policy = RetryPolicy::Exponential {
            initial: Duration::MAX,
            max: Duration::MAX,
            multiplier: 2.0,
            jitter: Duration::MAX,
        };
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), Duration::MAX);
        assert_eq!(backoff.next_delay(), Duration::MAX);
    }

    #[test]
    fn test_exponential_jitter_bounded() {
        let policy = RetryPolicy::exponential(Duration::from_millis(200));
        let mut backoff = policy.backoff();
        for _ in 0..20 {
            assert!(backoff.next_delay() < Duration::from_millis(300));
        }
    }
}
