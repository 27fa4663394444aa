//! Inter-arrival pacing for the dispatcher

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::{ArrivalPolicy, ConfigError};

/// Spaces out dispatches according to an [`ArrivalPolicy`]
///
/// Delays are measured from the start of one dispatch to the start of the
/// next, on an absolute schedule: a slow `start_call` does not push later
/// dispatches back. A pacer is built fresh for every run.
pub struct Pacer {
    policy: ArrivalPolicy,
    state: PacerState,
}

enum PacerState {
    Unlimited,
    Fixed {
        period: Duration,
        interval: Option<Interval>,
    },
    Poisson {
        gaps: Exp<f64>,
        rng: StdRng,
        next: Option<Instant>,
    },
}

impl Pacer {
    /// Create a pacer for `policy`
    ///
    /// # Examples
    /// ```
    /// use stream_bench_core::dispatcher::Pacer;
    /// use stream_bench_core::ArrivalPolicy;
    ///
    /// // Two requests per second
    /// let pacer = Pacer::new(ArrivalPolicy::FixedRate { rate: 2.0 }).unwrap();
    /// assert!(pacer.is_enabled());
    ///
    /// // Back-to-back dispatch
    /// let unlimited = Pacer::new(ArrivalPolicy::Unlimited).unwrap();
    /// assert!(!unlimited.is_enabled());
    /// ```
    pub fn new(policy: ArrivalPolicy) -> Result<Self, ConfigError> {
        policy.validate()?;

        let state = match policy {
            ArrivalPolicy::Unlimited => PacerState::Unlimited,
            ArrivalPolicy::FixedRate { rate } => {
                let period = Duration::try_from_secs_f64(1.0 / rate)
                    .map_err(|e| ConfigError::InvalidRate(format!("rate {rate}: {e}")))?;
                // Rates too high for the timer resolution degrade to a burst
                if period.is_zero() {
                    PacerState::Unlimited
                } else {
                    PacerState::Fixed {
                        period,
                        interval: None,
                    }
                }
            }
            ArrivalPolicy::Poisson { rate, seed } => PacerState::Poisson {
                gaps: Exp::new(rate)
                    .map_err(|e| ConfigError::InvalidRate(format!("rate {rate}: {e}")))?,
                rng: StdRng::seed_from_u64(seed),
                next: None,
            },
        };

        Ok(Self { policy, state })
    }

    /// Pacer that never waits
    pub fn unlimited() -> Self {
        Self {
            policy: ArrivalPolicy::Unlimited,
            state: PacerState::Unlimited,
        }
    }

    /// Wait until the next dispatch may start
    ///
    /// The first call returns immediately for every policy.
    pub async fn wait(&mut self) {
        match &mut self.state {
            PacerState::Unlimited => {}
            PacerState::Fixed { period, interval } => {
                let interval = interval.get_or_insert_with(|| {
                    let mut interval = tokio::time::interval(*period);
                    // Keep the absolute schedule if a dispatch runs late
                    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
                    interval
                });
                interval.tick().await;
            }
            PacerState::Poisson { gaps, rng, next } => {
                let at = *next.get_or_insert_with(Instant::now);
                tokio::time::sleep_until(at).await;

                let gap = Duration::try_from_secs_f64(gaps.sample(rng)).unwrap_or(Duration::ZERO);
                *next = Some(at.checked_add(gap).unwrap_or(at));
            }
        }
    }

    /// Check if dispatches are spaced out at all
    pub fn is_enabled(&self) -> bool {
        !matches!(self.state, PacerState::Unlimited)
    }

    /// Policy this pacer implements
    pub fn policy(&self) -> ArrivalPolicy {
        self.policy
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("policy", &self.policy)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pacer_unlimited() {
        let pacer = Pacer::new(ArrivalPolicy::Unlimited).unwrap();
        assert!(!pacer.is_enabled());
        assert_eq!(pacer.policy(), ArrivalPolicy::Unlimited);
    }

    #[test]
    fn test_pacer_default() {
        assert!(!Pacer::default().is_enabled());
    }

    #[test]
    fn test_pacer_rejects_invalid_rate() {
        assert!(Pacer::new(ArrivalPolicy::FixedRate { rate: 0.0 }).is_err());
        assert!(Pacer::new(ArrivalPolicy::FixedRate { rate: -1.0 }).is_err());
        assert!(Pacer::new(ArrivalPolicy::FixedRate { rate: f64::NAN }).is_err());
        assert!(Pacer::new(ArrivalPolicy::Poisson {
            rate: f64::INFINITY,
            seed: 0
        })
        .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_never_waits() {
        let mut pacer = Pacer::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            pacer.wait().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_schedule() {
        let mut pacer = Pacer::new(ArrivalPolicy::FixedRate { rate: 2.0 }).unwrap();
        let start = Instant::now();

        let mut offsets = Vec::new();
        for _ in 0..4 {
            pacer.wait().await;
            offsets.push(start.elapsed().as_secs_f64());
        }

        let expected = [0.0, 0.5, 1.0, 1.5];
        for (got, want) in offsets.iter().zip(expected) {
            assert!((got - want).abs() < 1e-3, "got {offsets:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_below_one_per_second() {
        let mut pacer = Pacer::new(ArrivalPolicy::FixedRate { rate: 0.5 }).unwrap();
        let start = Instant::now();
        pacer.wait().await;
        pacer.wait().await;
        assert!((start.elapsed().as_secs_f64() - 2.0).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_keeps_absolute_schedule() {
        let mut pacer = Pacer::new(ArrivalPolicy::FixedRate { rate: 10.0 }).unwrap();
        let start = Instant::now();

        pacer.wait().await;
        // A slow dispatch eats the whole gap
        tokio::time::advance(Duration::from_millis(100)).await;
        pacer.wait().await;
        pacer.wait().await;

        assert!((start.elapsed().as_secs_f64() - 0.2).abs() < 1e-3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisson_is_reproducible() {
        async fn offsets(seed: u64) -> Vec<Duration> {
            let mut pacer = Pacer::new(ArrivalPolicy::Poisson { rate: 5.0, seed }).unwrap();
            let start = Instant::now();
            let mut out = Vec::new();
            for _ in 0..5 {
                pacer.wait().await;
                out.push(start.elapsed());
            }
            out
        }

        let a = offsets(42).await;
        let b = offsets(42).await;
        for (x, y) in a.iter().zip(&b) {
            let diff = if x > y { *x - *y } else { *y - *x };
            assert!(diff <= Duration::from_millis(2), "{a:?} vs {b:?}");
        }
        assert_eq!(a[0], Duration::ZERO);
        assert!(a.windows(2).all(|w| w[0] <= w[1]));
    }
}
