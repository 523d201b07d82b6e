//! Reconnect scheduling.
//!
//! Pure state: [`ReconnectPolicy`] maps an attempt number to a delay and
//! [`RetryBudget`] counts attempts against the configured maximum. The session
//! driver owns the timer.

use std::time::Duration;

/// Delay schedule between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectPolicy {
    /// Constant delay between attempts.
    Fixed { interval: Duration },
    /// Delay grows by `factor` per attempt up to `max`, with ±`jitter`
    /// (a fraction of the delay, `0.0` disables it).
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
        jitter: f64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self::Fixed { interval }
    }

    /// Delay for a given attempt number (1-based) before jitter.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { interval } => *interval,
            Self::Exponential {
                initial,
                max,
                factor,
                ..
            } => {
                let exp = attempt.saturating_sub(1).min(63) as i32;
                let secs = initial.as_secs_f64() * factor.powi(exp);
                Duration::from_secs_f64(secs.min(max.as_secs_f64()))
            }
        }
    }

    /// Delay for a given attempt number (1-based), jitter included.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        match self {
            Self::Exponential { jitter, .. } if *jitter > 0.0 => {
                let secs = base.as_secs_f64();
                let with_jitter = (secs + secs * jitter * jitter_offset()).max(0.05);
                Duration::from_secs_f64(with_jitter)
            }
            _ => base,
        }
    }
}

/// Pseudo-random offset in `[-1.0, 1.0)` drawn from the clock's sub-second
/// nanos. Good enough to spread reconnects from many dashboards.
fn jitter_offset() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos as f64 / 1_000_000_000.0) * 2.0 - 1.0
}

/// Counts reconnect attempts since the last successful connect.
#[derive(Debug, Clone)]
pub(crate) struct RetryBudget {
    attempts: u32,
    max: u32,
}

impl RetryBudget {
    pub(crate) fn new(max: u32) -> Self {
        Self { attempts: 0, max }
    }

    /// Claims the next attempt, returning its 1-based number, or `None` when
    /// the budget is spent.
    pub(crate) fn next_attempt(&mut self) -> Option<u32> {
        if self.attempts >= self.max {
            return None;
        }
        self.attempts += 1;
        Some(self.attempts)
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_policy_is_constant() {
        let policy = ReconnectPolicy::fixed(Duration::from_secs(5));
        for attempt in 1..=10 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_secs(5));
        }
    }

    #[test]
    fn exponential_policy_doubles_then_caps() {
        let policy = ReconnectPolicy::Exponential {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(15),
            factor: 2.0,
            jitter: 0.0,
        };
        let expected = [0.25, 0.5, 1.0, 2.0, 4.0, 8.0, 15.0, 15.0];
        for (i, &secs) in expected.iter().enumerate() {
            let delay = policy.delay_for_attempt((i + 1) as u32);
            assert!(
                (delay.as_secs_f64() - secs).abs() < 1e-9,
                "attempt {}: got {delay:?}, want {secs}s",
                i + 1
            );
        }
    }

    #[test]
    fn exponential_policy_survives_huge_attempt_numbers() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = ReconnectPolicy::default();
        // Base delays: 1s, 2s, 4s, 8s, 16s, 30s (capped).
        let expected_base = [1.0, 2.0, 4.0, 8.0, 16.0, 30.0];
        for (i, &base) in expected_base.iter().enumerate() {
            let secs = policy.delay_for_attempt((i + 1) as u32).as_secs_f64();
            let lo = base * 0.74;
            let hi = base * 1.26;
            assert!(
                secs >= lo && secs <= hi,
                "attempt {}: {secs:.3}s not in [{lo:.3}, {hi:.3}]",
                i + 1
            );
        }
    }

    #[test]
    fn retry_budget_counts_to_max() {
        let mut budget = RetryBudget::new(2);
        assert_eq!(budget.next_attempt(), Some(1));
        assert_eq!(budget.next_attempt(), Some(2));
        assert_eq!(budget.next_attempt(), None);
        assert_eq!(budget.attempts(), 2);

        budget.reset();
        assert_eq!(budget.attempts(), 0);
        assert_eq!(budget.next_attempt(), Some(1));
    }

    #[test]
    fn zero_budget_never_retries() {
        let mut budget = RetryBudget::new(0);
        assert_eq!(budget.next_attempt(), None);
    }
}
