//! Core traits for transports, dataset sources, tokenizers and report sinks
//!
//! These traits are defined in core to avoid circular dependencies.
//! Implementations live in their respective crates (transport/, samplers/,
//! report/).

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::driver::SweepPoint;
use crate::error::BenchResult;
use crate::metrics::AggregateMetrics;
use crate::request::RequestSpec;

// ============================================================================
// Transport
// ============================================================================

/// Final status reported by the transport once a stream has ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallStatus {
    /// The call finished cleanly
    Ok,
    /// The call finished with an error status
    Error(String),
}

impl CallStatus {
    /// Check if this status indicates success
    pub fn is_ok(&self) -> bool {
        matches!(self, CallStatus::Ok)
    }
}

/// One readiness event for an in-flight call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    /// The transport accepted the call
    Started,
    /// A response fragment arrived
    Fragment(String),
    /// The server signalled end-of-data
    StreamEnded,
    /// The final status is available
    Finished(CallStatus),
    /// The transport failed before a final status was available
    Failed(String),
}

/// Per-call event stream handed out by a [`Transport`]
pub type CallStream = Pin<Box<dyn Stream<Item = CallEvent> + Send>>;

/// Streaming RPC client driven by the completion reactor
///
/// `start_call` must not block: it returns the event stream right away and
/// the call makes progress only when the reactor polls it. Every stream must
/// eventually yield either `Finished` or `Failed`; a stream that simply ends
/// is treated as a failure by the reactor.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport identifier (e.g., "grpc")
    fn name(&self) -> &str;

    /// Address of the target service
    fn target(&self) -> &str;

    /// Check that the target can be reached at all
    async fn ready(&self) -> Result<(), TransportError>;

    /// Initiate the call for one request and return its event stream
    fn start_call(&self, request: &RequestSpec) -> CallStream;
}

/// Transport-level errors surfaced outside of a call's event stream
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Target address could not be parsed
    #[error("invalid target address {target}: {message}")]
    InvalidTarget {
        /// The offending address
        target: String,
        /// Parser message
        message: String,
    },

    /// Target did not accept a connection
    #[error("target unreachable: {0}")]
    Unreachable(String),
}

// ============================================================================
// Dataset
// ============================================================================

/// One loaded dataset entry, before identifiers are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetRecord {
    /// Input text
    pub prompt: String,
    /// Token count of the prompt
    pub prompt_len: usize,
    /// Number of output tokens the server is asked to generate
    pub expected_output_len: usize,
}

/// Produces the ordered list of requests for a run
pub trait DatasetSource: Send + Sync {
    /// Source name for identification
    fn name(&self) -> &str;

    /// Load every record, in source order
    ///
    /// A single malformed record fails the whole load.
    fn load(&self) -> Result<Vec<DatasetRecord>, DatasetError>;
}

/// Dataset loading errors
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// Source could not be read
    #[error("failed to read {path}: {source}")]
    Unreadable {
        /// Path that failed
        path: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Source is not valid for this loader
    #[error("malformed dataset: {0}")]
    Malformed(String),

    /// A single record is structurally invalid
    #[error("malformed record {index}: {reason}")]
    MalformedRecord {
        /// Position of the record in the source
        index: usize,
        /// What is wrong with it
        reason: String,
    },

    /// Source contained no records
    #[error("dataset contains no requests")]
    Empty,

    /// Tokenizer failed on a record
    #[error("tokenization error: {0}")]
    Tokenization(String),
}

// ============================================================================
// Tokenizer
// ============================================================================

/// Counts tokens for prompt and reference-output lengths
pub trait TokenCounter: Send + Sync {
    /// Tokenizer name for identification
    fn name(&self) -> &str;

    /// Number of tokens in `text`
    fn count(&self, text: &str) -> Result<usize, DatasetError>;
}

// ============================================================================
// Report
// ============================================================================

/// Receives aggregated metrics after every completed sweep point
pub trait ReportSink {
    /// Persist one sweep point
    ///
    /// Called as soon as the point completes so that earlier points survive
    /// a later point's failure.
    fn record(&mut self, point: &SweepPoint, metrics: &AggregateMetrics) -> BenchResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_status() {
        assert!(CallStatus::Ok.is_ok());
        assert!(!CallStatus::Error("INTERNAL".into()).is_ok());
    }

    #[test]
    fn test_dataset_error_display() {
        let err = DatasetError::MalformedRecord {
            index: 3,
            reason: "missing conversations".into(),
        };
        assert_eq!(err.to_string(), "malformed record 3: missing conversations");
    }
}
