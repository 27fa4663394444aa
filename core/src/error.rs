//! Error types for stream-bench-core
//!
//! Only run-level failures are errors. A request that fails mid-flight is
//! recorded on its [`RequestRecord`](crate::record::RequestRecord) as a
//! [`FailureCause`] and counted toward completion like any other request.

use thiserror::Error;

use crate::config::ConfigError;
use crate::traits::{DatasetError, TransportError};

/// Core error type
#[derive(Error, Debug)]
pub enum BenchError {
    /// Dataset could not be turned into a request catalog
    #[error("dataset error: {0}")]
    Dataset(#[from] DatasetError),

    /// Target could not be reached before dispatch
    #[error("connection error: {0}")]
    Connection(#[from] TransportError),

    /// Invalid run configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Metrics could not be derived from the recorded timestamps
    #[error("metrics error: {0}")]
    Metrics(String),

    /// Report sink failed to persist a sweep point
    #[error("report error: {0}")]
    Report(String),

    /// Internal coordination failure (reactor task died, channel closed early)
    #[error("orchestration error: {0}")]
    Orchestration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a metrics error
    pub fn metrics(message: impl Into<String>) -> Self {
        Self::Metrics(message.into())
    }

    /// Create a report error
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report(message.into())
    }

    /// Create an orchestration error
    pub fn orchestration(message: impl Into<String>) -> Self {
        Self::Orchestration(message.into())
    }

    /// Whether this error only invalidates the current sweep point
    ///
    /// Connection and orchestration failures end the point being measured;
    /// the sweep moves on to the next one. Everything else stops the sweep.
    pub fn is_point_local(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Orchestration(_))
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Why a single request ended in the `Failed` state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The transport refused to start the call
    #[error("call could not be started: {0}")]
    StartRejected(String),

    /// The transport failed while reading the response stream
    #[error("stream read failed: {0}")]
    Stream(String),

    /// The call ended with a non-ok final status
    #[error("call finished with error status: {0}")]
    Status(String),

    /// The event stream closed without delivering a final status
    #[error("event stream closed before a final status")]
    StreamClosed,

    /// The run deadline expired while the call was still in flight
    #[error("run deadline exceeded")]
    DeadlineExceeded,

    /// The run ended before the request was dispatched
    #[error("request was never dispatched")]
    NotDispatched,
}
