//! JSON sweep report
//!
//! Layout, keyed by series:
//!
//! ```json
//! {
//!   "request rate": [[5.0, {"total_time": 12.3, "throughput": 4.1, ...}]],
//!   "input lens":   [[8, 64, 128, {"total_time": 2.1, ...}]]
//! }
//! ```
//!
//! Rate points carry `[rate, metrics]`; synthetic points carry
//! `[batch_size, input_len, output_len, metrics]`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stream_bench_core::{AggregateMetrics, BenchError, BenchResult, ReportSink, SweepPoint};

/// Figures written for each sweep point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSummary {
    /// Run duration in seconds
    pub total_time: f64,
    /// Completed requests per second
    pub throughput: f64,
    /// Mean end-to-end latency in milliseconds
    pub avg_latency: f64,
    /// Σ e2e / (input + output tokens), milliseconds
    pub avg_per_token_latency: f64,
    /// Σ e2e / output tokens, milliseconds
    pub avg_per_output_token_latency: f64,
    /// Mean time to first fragment in milliseconds
    pub avg_prefill_latency: f64,
    /// Mean inter-token latency in milliseconds
    pub avg_decode_latency: f64,
    /// Input plus output tokens per second
    pub total_token_throughput: f64,
    /// Output tokens per second
    pub output_token_throughput: f64,
    /// Requests that completed
    pub successful_requests: usize,
    /// Requests that failed
    pub failed_requests: usize,
}

impl From<&AggregateMetrics> for PointSummary {
    fn from(metrics: &AggregateMetrics) -> Self {
        Self {
            total_time: metrics.total_time_secs,
            throughput: metrics.requests_per_sec,
            avg_latency: metrics.avg_e2e_ms,
            avg_per_token_latency: metrics.avg_per_token_latency_ms,
            avg_per_output_token_latency: metrics.avg_per_output_token_latency_ms,
            avg_prefill_latency: metrics.avg_prefill_ms,
            avg_decode_latency: metrics.avg_decode_per_token_ms,
            total_token_throughput: metrics.total_tokens_per_sec,
            output_token_throughput: metrics.output_tokens_per_sec,
            successful_requests: metrics.successful_requests,
            failed_requests: metrics.failed_requests,
        }
    }
}

/// Writes the whole report to one JSON file after every point
///
/// The file is replaced atomically, so a crash mid-sweep leaves the last
/// complete report on disk.
#[derive(Debug)]
pub struct JsonReportWriter {
    path: PathBuf,
    series: BTreeMap<String, Vec<Value>>,
}

impl JsonReportWriter {
    /// Create a writer targeting `path`
    ///
    /// Nothing is written until the first point is recorded.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            series: BTreeMap::new(),
        }
    }

    /// Output file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Report document as it stands
    pub fn to_value(&self) -> Value {
        json!(self.series)
    }

    fn entry(point: &SweepPoint, summary: &PointSummary) -> BenchResult<Value> {
        let summary = serde_json::to_value(summary)
            .map_err(|e| BenchError::report(format!("failed to encode metrics: {e}")))?;

        Ok(match point {
            SweepPoint::RequestRate { rate } => json!([rate, summary]),
            SweepPoint::Synthetic {
                batch_size,
                input_len,
                output_len,
                ..
            } => json!([batch_size, input_len, output_len, summary]),
        })
    }

    fn flush(&self) -> BenchResult<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let failed = |e: std::io::Error| {
            BenchError::report(format!("failed to write {}: {e}", self.path.display()))
        };

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(failed)?;
        serde_json::to_writer_pretty(&mut file, &self.series)
            .map_err(|e| failed(e.into()))?;
        file.write_all(b"\n").map_err(failed)?;
        file.persist(&self.path).map_err(|e| failed(e.error))?;
        Ok(())
    }
}

impl ReportSink for JsonReportWriter {
    fn record(&mut self, point: &SweepPoint, metrics: &AggregateMetrics) -> BenchResult<()> {
        let summary = PointSummary::from(metrics);
        let entry = Self::entry(point, &summary)?;
        self.series
            .entry(point.series().to_string())
            .or_default()
            .push(entry);

        self.flush()?;
        tracing::info!(
            point = %point,
            path = %self.path.display(),
            requests_per_sec = summary.throughput,
            avg_latency_ms = summary.avg_latency,
            "Report updated"
        );
        Ok(())
    }
}
