//! Per-request timing records and the run-wide completion counter

use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::FailureCause;
use crate::request::{RequestId, RequestSpec};

/// Lifecycle status of a request as seen by the metrics layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Not dispatched yet
    Pending,
    /// Dispatched and not yet terminal
    InFlight,
    /// Finished with an ok status
    Completed,
    /// Finished with a failure of any kind
    Failed,
}

impl RequestStatus {
    /// Completed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Failed)
    }
}

/// Timing milestones and response text for one request
///
/// Owned by the reactor while the run is active; read-only afterwards.
/// `dispatch_time <= first_chunk_time <= completion_time` whenever all three
/// are set.
#[derive(Debug, Clone)]
pub struct RequestRecord {
    /// Request this record belongs to
    pub id: RequestId,

    /// When the call was handed to the transport
    pub dispatch_time: Option<Instant>,

    /// First fragment arrival; set at most once
    pub first_chunk_time: Option<Instant>,

    /// When the request reached a terminal state
    pub completion_time: Option<Instant>,

    /// Fragments in arrival order
    pub accumulated_text: String,

    /// Number of fragments received
    pub fragments: usize,

    /// Current status
    pub status: RequestStatus,

    /// Why the request failed, if it did
    pub failure: Option<FailureCause>,
}

impl RequestRecord {
    /// Fresh record for a catalog entry
    pub fn new(spec: &RequestSpec) -> Self {
        Self {
            id: spec.id,
            dispatch_time: None,
            first_chunk_time: None,
            completion_time: None,
            accumulated_text: String::new(),
            fragments: 0,
            status: RequestStatus::Pending,
            failure: None,
        }
    }

    /// Append a fragment, stamping the first-chunk time if unset
    pub(crate) fn push_fragment(&mut self, text: &str, now: Instant) {
        if self.first_chunk_time.is_none() {
            self.first_chunk_time = Some(now);
        }
        self.accumulated_text.push_str(text);
        self.fragments += 1;
    }

    /// Check if the request finished successfully
    pub fn is_success(&self) -> bool {
        self.status == RequestStatus::Completed
    }
}

/// Run-wide count of requests that reached a terminal state
///
/// The reactor is the only writer; the driver waits on it from another task.
/// A new counter is created for every run.
#[derive(Debug)]
pub struct CompletionCounter {
    total: usize,
    completed: AtomicUsize,
    notify: Notify,
}

impl CompletionCounter {
    /// Counter for a run of `total` requests
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: AtomicUsize::new(0),
            notify: Notify::new(),
        }
    }

    /// Number of requests in the run
    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of requests that reached a terminal state
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    /// All requests are terminal
    pub fn is_complete(&self) -> bool {
        self.completed() >= self.total
    }

    /// Count one more terminal request and release waiters on the last one
    ///
    /// Returns the new count.
    pub(crate) fn record_completion(&self) -> usize {
        let completed = self.completed.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(
            completed <= self.total,
            "completed {completed} of {} requests",
            self.total
        );
        if completed >= self.total {
            self.notify.notify_waiters();
        }
        completed
    }

    /// Wait until every request is terminal
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }
}
