//! stream-bench-core: request-lifecycle engine for streaming generation benchmarks
//!
//! This crate owns everything between "a list of prompts" and "a set of
//! latency and throughput numbers":
//!
//! - Request catalog and per-request records
//! - Dispatcher with arrival-rate pacing
//! - Per-call state machine and the completion reactor that drives it
//! - Metrics aggregation
//! - Benchmark driver and parameter sweeps
//! - Core traits (Transport, DatasetSource, TokenCounter, ReportSink)
//! - Error handling
//!
//! Transports, dataset loaders and report writers live in their own crates
//! and plug in through the traits in [`traits`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod config;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod reactor;
pub mod record;
pub mod request;
pub mod traits;

#[cfg(test)]
mod mock;

pub use call::{CallState, CallStateMachine};
pub use config::*;
pub use dispatcher::{DispatchedCall, Dispatcher, Pacer};
pub use driver::{
    run_sweep, BenchmarkDriver, RunOutcome, SweepEntry, SweepPoint, SweepSummary, SyntheticAxis,
};
pub use error::*;
pub use metrics::*;
pub use reactor::CompletionReactor;
pub use record::*;
pub use request::*;
pub use traits::*;
