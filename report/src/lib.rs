//! Report generation for benchmark sweeps
//!
//! This crate provides [`ReportSink`](stream_bench_core::ReportSink)
//! implementations:
//!
//! - [`JsonReportWriter`]: one JSON document per sweep, rewritten after
//!   every point

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod json;

pub use json::{JsonReportWriter, PointSummary};
