//! Parameter sweeps: one run per point, reported as soon as it completes

use serde::{Deserialize, Serialize};

use crate::config::ArrivalPolicy;
use crate::error::BenchResult;
use crate::request::RequestCatalog;
use crate::traits::ReportSink;

use super::BenchmarkDriver;

/// Parameter varied by a synthetic sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticAxis {
    /// Requests per batch
    BatchSize,
    /// Prompt tokens per request
    InputLen,
    /// Output tokens per request
    OutputLen,
}

impl SyntheticAxis {
    /// Report series this axis is written under
    pub fn series(&self) -> &'static str {
        match self {
            SyntheticAxis::BatchSize => "batch size",
            SyntheticAxis::InputLen => "input lens",
            SyntheticAxis::OutputLen => "output lens",
        }
    }
}

/// One configuration point of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SweepPoint {
    /// Dataset replayed at an arrival rate; `<= 0.1` means unlimited
    RequestRate {
        /// Requests per second as given by the user
        rate: f64,
    },

    /// Fixed-shape synthetic batch
    Synthetic {
        /// Axis being swept
        axis: SyntheticAxis,
        /// Requests in the batch
        batch_size: usize,
        /// Prompt tokens per request
        input_len: usize,
        /// Output tokens per request
        output_len: usize,
    },
}

impl SweepPoint {
    /// Report series this point belongs to
    pub fn series(&self) -> &'static str {
        match self {
            SweepPoint::RequestRate { .. } => "request rate",
            SweepPoint::Synthetic { axis, .. } => axis.series(),
        }
    }

    /// Arrival policy implied by the point
    ///
    /// Synthetic batches are sent all at once.
    pub fn arrival_policy(&self) -> ArrivalPolicy {
        match self {
            SweepPoint::RequestRate { rate } => ArrivalPolicy::from_rate(Some(*rate)),
            SweepPoint::Synthetic { .. } => ArrivalPolicy::Unlimited,
        }
    }
}

impl std::fmt::Display for SweepPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SweepPoint::RequestRate { rate } => write!(f, "request rate {rate}"),
            SweepPoint::Synthetic {
                batch_size,
                input_len,
                output_len,
                ..
            } => write!(
                f,
                "batch size {batch_size}, input len {input_len}, output len {output_len}"
            ),
        }
    }
}

/// A point together with the requests and pacing used to measure it
#[derive(Debug, Clone)]
pub struct SweepEntry {
    /// Point identity, used for reporting
    pub point: SweepPoint,
    /// Requests to send
    pub catalog: RequestCatalog,
    /// Pacing
    pub policy: ArrivalPolicy,
}

impl SweepEntry {
    /// Entry paced by the point's own arrival policy
    pub fn new(point: SweepPoint, catalog: RequestCatalog) -> Self {
        Self {
            policy: point.arrival_policy(),
            point,
            catalog,
        }
    }

    /// Override the pacing
    pub fn with_policy(mut self, policy: ArrivalPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// What happened over a whole sweep
#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    /// Points measured and reported
    pub completed: Vec<SweepPoint>,
    /// Points skipped, with the reason
    pub skipped: Vec<(SweepPoint, String)>,
}

/// Run every entry in order, reporting each point as soon as it completes
///
/// Connection and orchestration failures skip the point. Any other error,
/// including a sink failure, stops the sweep; points already recorded stay
/// recorded.
pub async fn run_sweep(
    driver: &BenchmarkDriver,
    entries: Vec<SweepEntry>,
    sink: &mut dyn ReportSink,
) -> BenchResult<SweepSummary> {
    let mut summary = SweepSummary::default();
    let total = entries.len();

    for (index, entry) in entries.into_iter().enumerate() {
        tracing::info!(
            point = %entry.point,
            index = index + 1,
            total,
            "Running sweep point"
        );

        match driver.run(&entry.catalog, entry.policy).await {
            Ok(outcome) => {
                sink.record(&entry.point, &outcome.metrics)?;
                summary.completed.push(entry.point);
            }
            Err(e) if e.is_point_local() => {
                tracing::error!(point = %entry.point, error = %e, "Sweep point skipped");
                summary.skipped.push((entry.point, e.to_string()));
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        completed = summary.completed.len(),
        skipped = summary.skipped.len(),
        "Sweep finished"
    );
    Ok(summary)
}
