//! Run configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rates at or below this value mean "no pacing"
pub const UNLIMITED_RATE_THRESHOLD: f64 = 0.1;

/// How requests are spaced out by the dispatcher
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ArrivalPolicy {
    /// Issue every request back-to-back (open-loop burst)
    #[default]
    Unlimited,

    /// Fixed `1/rate` seconds between the starts of successive dispatches
    FixedRate {
        /// Requests per second
        rate: f64,
    },

    /// Exponentially distributed gaps with mean `1/rate`
    Poisson {
        /// Requests per second
        rate: f64,
        /// RNG seed so a run can be replayed
        seed: u64,
    },
}

impl ArrivalPolicy {
    /// Map a user-supplied rate to a policy
    ///
    /// Absent or `<= 0.1` rates mean unlimited; anything else is a fixed rate.
    pub fn from_rate(rate: Option<f64>) -> Self {
        match rate {
            Some(rate) if rate.is_nan() || rate > UNLIMITED_RATE_THRESHOLD => {
                ArrivalPolicy::FixedRate { rate }
            }
            _ => ArrivalPolicy::Unlimited,
        }
    }

    /// Requests per second, or `None` when unpaced
    pub fn rate(&self) -> Option<f64> {
        match self {
            ArrivalPolicy::Unlimited => None,
            ArrivalPolicy::FixedRate { rate } | ArrivalPolicy::Poisson { rate, .. } => Some(*rate),
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.rate() {
            None => Ok(()),
            Some(rate) if !rate.is_finite() => Err(ConfigError::InvalidRate(format!(
                "request rate must be a finite number, got {rate}"
            ))),
            Some(rate) if rate <= 0.0 => Err(ConfigError::InvalidRate(format!(
                "request rate must be positive, got {rate}"
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Whether failed requests take part in latency and token aggregates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailedRequestPolicy {
    /// Failed requests contribute their (degenerate) latencies
    #[default]
    Include,
    /// Only completed requests are aggregated
    Exclude,
}

/// Configuration for a single benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Optional run-level deadline; remaining requests fail when it expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Duration>,

    /// How failed requests are aggregated
    #[serde(default)]
    pub failed_requests: FailedRequestPolicy,

    /// Buffer between the dispatcher and the reactor
    pub dispatch_buffer: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            deadline: None,
            failed_requests: FailedRequestPolicy::default(),
            dispatch_buffer: 1024,
        }
    }
}

impl RunConfig {
    /// Set the run deadline
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Set the failed-request policy
    pub fn with_failed_requests(mut self, policy: FailedRequestPolicy) -> Self {
        self.failed_requests = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch_buffer == 0 {
            return Err(ConfigError::InvalidBuffer(
                "dispatch buffer must be at least 1".into(),
            ));
        }

        if let Some(deadline) = self.deadline {
            if deadline.is_zero() {
                return Err(ConfigError::InvalidDeadline(
                    "deadline must be greater than zero".into(),
                ));
            }
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid arrival rate
    #[error("Invalid request rate: {0}")]
    InvalidRate(String),

    /// Invalid deadline
    #[error("Invalid deadline: {0}")]
    InvalidDeadline(String),

    /// Invalid channel buffer
    #[error("Invalid buffer: {0}")]
    InvalidBuffer(String),

    /// Invalid sweep definition
    #[error("Invalid sweep: {0}")]
    InvalidSweep(String),
}
