//! Metrics aggregation and percentile calculation
//!
//! Runs once per benchmark run, after every request is terminal. All
//! per-request latencies are in milliseconds; the run duration is in seconds.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::FailedRequestPolicy;
use crate::error::{BenchError, BenchResult};
use crate::record::RequestRecord;
use crate::request::{RequestCatalog, RequestId, RequestSpec};

/// Derived latencies for one request (milliseconds)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestLatency {
    /// Request identifier
    pub id: RequestId,
    /// Whether the request completed successfully
    pub success: bool,
    /// Prompt tokens
    pub prompt_len: usize,
    /// Expected output tokens
    pub output_len: usize,
    /// Dispatch to first fragment
    pub prefill_ms: f64,
    /// First fragment to completion, per remaining output token
    pub decode_per_token_ms: f64,
    /// Dispatch to completion
    pub e2e_ms: f64,
}

impl RequestLatency {
    /// Derive latencies from a terminal record
    ///
    /// A request that never received a fragment has its whole end-to-end
    /// time counted as prefill and no decode time. A request that was never
    /// dispatched contributes zeros.
    pub fn from_record(spec: &RequestSpec, record: &RequestRecord) -> Self {
        let (prefill, decode, e2e) = match (record.dispatch_time, record.completion_time) {
            (Some(dispatch), Some(done)) => {
                let e2e = done.duration_since(dispatch);
                match record.first_chunk_time {
                    Some(first) => {
                        let decode_steps = decode_steps(spec);
                        (
                            first.duration_since(dispatch),
                            done.duration_since(first).as_secs_f64() * 1000.0
                                / decode_steps as f64,
                            e2e,
                        )
                    }
                    None => (e2e, 0.0, e2e),
                }
            }
            _ => (Duration::ZERO, 0.0, Duration::ZERO),
        };

        Self {
            id: spec.id,
            success: record.is_success(),
            prompt_len: spec.prompt_len,
            output_len: spec.expected_output_len,
            prefill_ms: prefill.as_secs_f64() * 1000.0,
            decode_per_token_ms: decode,
            e2e_ms: e2e.as_secs_f64() * 1000.0,
        }
    }
}

/// Run-level statistics
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AggregateMetrics {
    /// Wall-clock run duration in seconds
    pub total_time_secs: f64,

    /// Requests in the run
    pub total_requests: usize,
    /// Requests that completed successfully
    pub successful_requests: usize,
    /// Requests that failed
    pub failed_requests: usize,
    /// Requests that entered latency and token aggregates
    pub aggregated_requests: usize,

    /// Prompt tokens over aggregated requests
    pub total_input_tokens: usize,
    /// Expected output tokens over aggregated requests
    pub total_output_tokens: usize,
    /// Mean prompt length
    pub avg_input_len: f64,
    /// Mean expected output length
    pub avg_output_len: f64,

    /// Mean prefill latency (ms)
    pub avg_prefill_ms: f64,
    /// Mean decode latency per token (ms)
    pub avg_decode_per_token_ms: f64,
    /// Mean end-to-end latency (ms)
    pub avg_e2e_ms: f64,

    /// Run time divided by output tokens (ms)
    pub time_per_token_ms: f64,
    /// Output tokens per second
    pub output_tokens_per_sec: f64,
    /// Input plus output tokens per second
    pub total_tokens_per_sec: f64,
    /// Aggregated requests per second
    pub requests_per_sec: f64,

    /// Sum of end-to-end latencies over input plus output tokens (ms)
    pub avg_per_token_latency_ms: f64,
    /// Sum of end-to-end latencies over output tokens (ms)
    pub avg_per_output_token_latency_ms: f64,

    /// Prefill latency percentiles (ms)
    pub prefill: LatencyPercentiles,
    /// Decode-per-token latency percentiles (ms)
    pub decode_per_token: LatencyPercentiles,
    /// End-to-end latency percentiles (ms)
    pub e2e: LatencyPercentiles,

    /// Per-request latencies, in catalog order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_request: Vec<RequestLatency>,
}

impl AggregateMetrics {
    /// Emit the run summary as log events
    pub fn log_summary(&self) {
        tracing::info!(
            total_time_secs = self.total_time_secs,
            requests = self.total_requests,
            successful = self.successful_requests,
            failed = self.failed_requests,
            "Benchmark finished"
        );
        tracing::info!(
            avg_input_len = self.avg_input_len,
            total_input_tokens = self.total_input_tokens,
            avg_output_len = self.avg_output_len,
            total_output_tokens = self.total_output_tokens,
            "Token counts"
        );
        tracing::info!(
            time_per_token_ms = self.time_per_token_ms,
            avg_prefill_ms = self.avg_prefill_ms,
            avg_decode_per_token_ms = self.avg_decode_per_token_ms,
            avg_e2e_ms = self.avg_e2e_ms,
            "Latency"
        );
        tracing::info!(
            output_tokens_per_sec = self.output_tokens_per_sec,
            total_tokens_per_sec = self.total_tokens_per_sec,
            requests_per_sec = self.requests_per_sec,
            "Throughput"
        );
    }
}

/// Turns terminal request records into [`AggregateMetrics`]
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAggregator {
    failed_requests: FailedRequestPolicy,
}

impl MetricsAggregator {
    /// Create an aggregator
    pub fn new(failed_requests: FailedRequestPolicy) -> Self {
        Self { failed_requests }
    }

    /// Aggregate one run
    ///
    /// `records` must hold one terminal record per catalog entry, in
    /// catalog order.
    pub fn aggregate(
        &self,
        catalog: &RequestCatalog,
        records: &[RequestRecord],
        duration: Duration,
    ) -> BenchResult<AggregateMetrics> {
        if records.len() != catalog.len() {
            return Err(BenchError::metrics(format!(
                "expected {} records, got {}",
                catalog.len(),
                records.len()
            )));
        }

        let per_request = catalog
            .iter()
            .zip(records)
            .map(|(spec, record)| {
                if record.id != spec.id {
                    return Err(BenchError::metrics(format!(
                        "record {} found at position of request {}",
                        record.id, spec.id
                    )));
                }
                if !record.status.is_terminal() {
                    return Err(BenchError::metrics(format!(
                        "request {} is not terminal ({:?})",
                        spec.id, record.status
                    )));
                }
                Ok(RequestLatency::from_record(spec, record))
            })
            .collect::<BenchResult<Vec<_>>>()?;

        let total_requests = per_request.len();
        let successful_requests = per_request.iter().filter(|l| l.success).count();
        let failed_requests = total_requests - successful_requests;

        let included: Vec<&RequestLatency> = per_request
            .iter()
            .filter(|l| l.success || self.failed_requests == FailedRequestPolicy::Include)
            .collect();
        let n = included.len() as f64;

        let total_input_tokens: usize = included.iter().map(|l| l.prompt_len).sum();
        let total_output_tokens: usize = included.iter().map(|l| l.output_len).sum();
        let sum_prefill: f64 = included.iter().map(|l| l.prefill_ms).sum();
        let sum_decode: f64 = included.iter().map(|l| l.decode_per_token_ms).sum();
        let sum_e2e: f64 = included.iter().map(|l| l.e2e_ms).sum();

        let secs = duration.as_secs_f64();
        let input = total_input_tokens as f64;
        let output = total_output_tokens as f64;

        let prefill_values: Vec<f64> = included.iter().map(|l| l.prefill_ms).collect();
        let decode_values: Vec<f64> = included.iter().map(|l| l.decode_per_token_ms).collect();
        let e2e_values: Vec<f64> = included.iter().map(|l| l.e2e_ms).collect();

        let metrics = AggregateMetrics {
            total_time_secs: secs,
            total_requests,
            successful_requests,
            failed_requests,
            aggregated_requests: included.len(),
            total_input_tokens,
            total_output_tokens,
            avg_input_len: ratio(input, n, "avg_input_len"),
            avg_output_len: ratio(output, n, "avg_output_len"),
            avg_prefill_ms: ratio(sum_prefill, n, "avg_prefill_ms"),
            avg_decode_per_token_ms: ratio(sum_decode, n, "avg_decode_per_token_ms"),
            avg_e2e_ms: ratio(sum_e2e, n, "avg_e2e_ms"),
            time_per_token_ms: ratio(secs * 1000.0, output, "time_per_token_ms"),
            output_tokens_per_sec: ratio(output, secs, "output_tokens_per_sec"),
            total_tokens_per_sec: ratio(input + output, secs, "total_tokens_per_sec"),
            requests_per_sec: ratio(n, secs, "requests_per_sec"),
            avg_per_token_latency_ms: ratio(sum_e2e, input + output, "avg_per_token_latency_ms"),
            avg_per_output_token_latency_ms: ratio(
                sum_e2e,
                output,
                "avg_per_output_token_latency_ms",
            ),
            prefill: LatencyPercentiles::from_values(&prefill_values),
            decode_per_token: LatencyPercentiles::from_values(&decode_values),
            e2e: LatencyPercentiles::from_values(&e2e_values),
            per_request,
        };

        metrics.log_summary();
        Ok(metrics)
    }
}

/// `num / den`, or 0 when the denominator is not positive
/// Tokens decoded after the first one, clamped to at least 1
fn decode_steps(spec: &RequestSpec) -> usize {
    let steps = spec.expected_output_len.saturating_sub(1);
    if steps == 0 {
        tracing::warn!(
            request_id = %spec.id,
            expected_output_len = spec.expected_output_len,
            "No tokens after the first, decode divisor clamped to 1"
        );
        return 1;
    }
    steps
}

fn ratio(num: f64, den: f64, metric: &str) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        tracing::warn!(metric, "Zero denominator, reporting 0");
        0.0
    }
}

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

impl LatencyPercentiles {
    /// Calculate percentiles from a slice of values
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<f64> = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let len = sorted.len();
        let mean = sorted.iter().sum::<f64>() / len as f64;

        let variance = if len > 1 {
            sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (len - 1) as f64
        } else {
            0.0
        };

        Self {
            min: sorted[0],
            p50: percentile(&sorted, 0.50),
            p75: percentile(&sorted, 0.75),
            p90: percentile(&sorted, 0.90),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            max: sorted[len - 1],
            mean,
            stddev: variance.sqrt(),
        }
    }
}

/// Percentile of sorted values using linear interpolation
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted {
        [] => 0.0,
        [only] => *only,
        _ => {
            let idx = p * (sorted.len() - 1) as f64;
            let lower = idx.floor() as usize;
            let upper = (idx.ceil() as usize).min(sorted.len() - 1);
            let frac = idx - lower as f64;
            sorted[lower] * (1.0 - frac) + sorted[upper] * frac
        }
    }
}
