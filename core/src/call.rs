//! Per-request call state machine
//!
//! ```text
//!            Started            Fragment (self-loop)
//!  Created ──────────► Streaming ◄──────┐
//!     │                   │  └──────────┘
//!     │ Failed            │ StreamEnded
//!     ▼                   ▼
//!   Failed ◄──────── Finishing ──────► Completed
//!            Finished(err)     Finished(ok)
//! ```
//!
//! Every path into `Completed` or `Failed` goes through a single `finish` step
//! that stamps the completion time and bumps the run's completion counter.
//! Terminal states ignore further events, so each request is counted once.

use tokio::time::Instant;

use crate::error::FailureCause;
use crate::record::{CompletionCounter, RequestRecord, RequestStatus};
use crate::request::{RequestId, RequestSpec};
use crate::traits::{CallEvent, CallStatus};

/// States of a single call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Call object exists; the transport has not acknowledged it yet
    Created,
    /// Response fragments are flowing
    Streaming,
    /// End-of-data seen, waiting for the final status
    Finishing,
    /// Final status was ok
    Completed,
    /// Any failure
    Failed,
}

impl CallState {
    /// Completed or Failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Completed | CallState::Failed)
    }
}

/// Drives one request from dispatch to a terminal state
#[derive(Debug)]
pub struct CallStateMachine {
    state: CallState,
    record: RequestRecord,
}

impl CallStateMachine {
    /// New machine for a catalog entry
    pub fn new(spec: &RequestSpec) -> Self {
        Self {
            state: CallState::Created,
            record: RequestRecord::new(spec),
        }
    }

    /// Request this machine drives
    pub fn id(&self) -> RequestId {
        self.record.id
    }

    /// Current state
    pub fn state(&self) -> CallState {
        self.state
    }

    /// Recorded timings so far
    pub fn record(&self) -> &RequestRecord {
        &self.record
    }

    /// Consume the machine, keeping its record
    pub fn into_record(self) -> RequestRecord {
        self.record
    }

    /// Stamp the dispatch time and move the request in flight
    pub fn mark_dispatched(&mut self, at: Instant) {
        if self.record.dispatch_time.is_some() {
            tracing::warn!(request_id = %self.id(), "Request dispatched twice, ignoring");
            return;
        }
        self.record.dispatch_time = Some(at);
        self.record.status = RequestStatus::InFlight;
    }

    /// Feed one transport event
    ///
    /// Returns the state after the transition.
    pub fn handle(
        &mut self,
        event: CallEvent,
        now: Instant,
        counter: &CompletionCounter,
    ) -> CallState {
        match (self.state, event) {
            (CallState::Completed | CallState::Failed, event) => {
                tracing::trace!(request_id = %self.id(), ?event, "Event after terminal state ignored");
            }

            (CallState::Created, CallEvent::Started) => self.state = CallState::Streaming,

            // A server may skip the explicit acknowledgement
            (CallState::Created | CallState::Streaming, CallEvent::Fragment(text)) => {
                self.state = CallState::Streaming;
                self.record.push_fragment(&text, now);
            }

            (CallState::Created | CallState::Streaming, CallEvent::StreamEnded) => {
                self.state = CallState::Finishing;
            }

            (_, CallEvent::Finished(status)) => {
                let outcome = match status {
                    CallStatus::Ok => Ok(()),
                    CallStatus::Error(message) => Err(FailureCause::Status(message)),
                };
                self.finish(outcome, now, counter);
            }

            (CallState::Created, CallEvent::Failed(cause)) => {
                self.finish(Err(FailureCause::StartRejected(cause)), now, counter);
            }

            (_, CallEvent::Failed(cause)) => {
                self.finish(Err(FailureCause::Stream(cause)), now, counter);
            }

            (CallState::Finishing, event) => {
                tracing::warn!(request_id = %self.id(), ?event, "Unexpected event while finishing");
            }

            (CallState::Streaming, CallEvent::Started) => {
                tracing::warn!(request_id = %self.id(), "Duplicate start acknowledgement");
            }
        }

        self.state
    }

    /// Fail a request the transport will never finish
    ///
    /// Used when the event stream closes early or the run deadline expires.
    /// No-op on terminal machines.
    pub fn abort(&mut self, cause: FailureCause, now: Instant, counter: &CompletionCounter) {
        if self.state.is_terminal() {
            return;
        }
        self.finish(Err(cause), now, counter);
    }

    fn finish(
        &mut self,
        outcome: Result<(), FailureCause>,
        now: Instant,
        counter: &CompletionCounter,
    ) {
        debug_assert!(!self.state.is_terminal());

        self.record.completion_time = Some(now);
        let completed = counter.record_completion();

        match outcome {
            Ok(()) => {
                self.state = CallState::Completed;
                self.record.status = RequestStatus::Completed;
                tracing::debug!(
                    request_id = %self.id(),
                    fragments = self.record.fragments,
                    completed,
                    total = counter.total(),
                    "Request completed"
                );
            }
            Err(cause) => {
                self.state = CallState::Failed;
                self.record.status = RequestStatus::Failed;
                tracing::warn!(
                    request_id = %self.id(),
                    error = %cause,
                    completed,
                    total = counter.total(),
                    "Request failed"
                );
                self.record.failure = Some(cause);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn machine() -> CallStateMachine {
        CallStateMachine::new(&RequestSpec {
            id: RequestId(0),
            prompt: "prompt".into(),
            prompt_len: 1,
            expected_output_len: 3,
        })
    }

    fn dispatched() -> (CallStateMachine, CompletionCounter) {
        let mut m = machine();
        m.mark_dispatched(Instant::now());
        (m, CompletionCounter::new(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path() {
        let (mut m, counter) = dispatched();
        let t0 = m.record().dispatch_time.unwrap();

        assert_eq!(m.handle(CallEvent::Started, Instant::now(), &counter), CallState::Streaming);

        tokio::time::advance(Duration::from_millis(100)).await;
        let first = Instant::now();
        m.handle(CallEvent::Fragment("a".into()), first, &counter);
        tokio::time::advance(Duration::from_millis(10)).await;
        m.handle(CallEvent::Fragment("b".into()), Instant::now(), &counter);

        assert_eq!(m.handle(CallEvent::StreamEnded, Instant::now(), &counter), CallState::Finishing);
        assert_eq!(counter.completed(), 0);

        tokio::time::advance(Duration::from_millis(1)).await;
        let done = Instant::now();
        assert_eq!(
            m.handle(CallEvent::Finished(CallStatus::Ok), done, &counter),
            CallState::Completed
        );

        let record = m.record();
        assert_eq!(record.status, RequestStatus::Completed);
        assert_eq!(record.accumulated_text, "ab");
        assert_eq!(record.first_chunk_time, Some(first));
        assert_eq!(record.completion_time, Some(done));
        assert!(t0 <= first && first <= done);
        assert_eq!(counter.completed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_chunk_time_is_idempotent() {
        let (mut m, counter) = dispatched();
        m.handle(CallEvent::Started, Instant::now(), &counter);

        let first = Instant::now();
        for i in 0..10 {
            m.handle(CallEvent::Fragment(i.to_string()), Instant::now(), &counter);
            tokio::time::advance(Duration::from_millis(3)).await;
        }

        assert_eq!(m.record().first_chunk_time, Some(first));
        assert_eq!(m.record().accumulated_text, "0123456789");
        assert_eq!(m.record().fragments, 10);
    }

    #[tokio::test]
    async fn test_error_status_fails_request() {
        let (mut m, counter) = dispatched();
        m.handle(CallEvent::Started, Instant::now(), &counter);
        m.handle(CallEvent::StreamEnded, Instant::now(), &counter);
        let state = m.handle(
            CallEvent::Finished(CallStatus::Error("INTERNAL".into())),
            Instant::now(),
            &counter,
        );

        assert_eq!(state, CallState::Failed);
        assert_eq!(m.record().status, RequestStatus::Failed);
        assert_eq!(
            m.record().failure,
            Some(FailureCause::Status("INTERNAL".into()))
        );
        assert_eq!(counter.completed(), 1);
    }

    #[tokio::test]
    async fn test_read_failure_mid_stream() {
        let (mut m, counter) = dispatched();
        m.handle(CallEvent::Started, Instant::now(), &counter);
        m.handle(CallEvent::Fragment("partial".into()), Instant::now(), &counter);
        let state = m.handle(CallEvent::Failed("connection reset".into()), Instant::now(), &counter);

        assert_eq!(state, CallState::Failed);
        assert_eq!(m.record().accumulated_text, "partial");
        assert_eq!(
            m.record().failure,
            Some(FailureCause::Stream("connection reset".into()))
        );
        assert!(m.record().completion_time.is_some());
        assert_eq!(counter.completed(), 1);
    }

    #[tokio::test]
    async fn test_start_failure() {
        let (mut m, counter) = dispatched();
        let state = m.handle(CallEvent::Failed("refused".into()), Instant::now(), &counter);

        assert_eq!(state, CallState::Failed);
        assert_eq!(
            m.record().failure,
            Some(FailureCause::StartRejected("refused".into()))
        );
        assert!(m.record().first_chunk_time.is_none());
        assert_eq!(counter.completed(), 1);
    }

    #[tokio::test]
    async fn test_terminal_state_counts_once() {
        let (mut m, counter) = dispatched();
        m.handle(CallEvent::Finished(CallStatus::Ok), Instant::now(), &counter);
        m.handle(CallEvent::Finished(CallStatus::Ok), Instant::now(), &counter);
        m.handle(CallEvent::Failed("late".into()), Instant::now(), &counter);
        m.handle(CallEvent::Fragment("late".into()), Instant::now(), &counter);
        m.abort(FailureCause::DeadlineExceeded, Instant::now(), &counter);

        assert_eq!(m.state(), CallState::Completed);
        assert!(m.record().accumulated_text.is_empty());
        assert_eq!(counter.completed(), 1);
    }

    #[tokio::test]
    async fn test_fragment_after_stream_end_ignored() {
        let (mut m, counter) = dispatched();
        m.handle(CallEvent::Fragment("x".into()), Instant::now(), &counter);
        m.handle(CallEvent::StreamEnded, Instant::now(), &counter);
        m.handle(CallEvent::Fragment("y".into()), Instant::now(), &counter);

        assert_eq!(m.state(), CallState::Finishing);
        assert_eq!(m.record().accumulated_text, "x");
    }

    #[tokio::test]
    async fn test_abort_in_flight() {
        let (mut m, counter) = dispatched();
        m.handle(CallEvent::Started, Instant::now(), &counter);
        m.abort(FailureCause::DeadlineExceeded, Instant::now(), &counter);

        assert_eq!(m.state(), CallState::Failed);
        assert_eq!(m.record().failure, Some(FailureCause::DeadlineExceeded));
        assert_eq!(counter.completed(), 1);
    }

    #[test]
    fn test_undispatched_machine_is_pending() {
        let m = machine();
        assert_eq!(m.state(), CallState::Created);
        assert_eq!(m.record().status, RequestStatus::Pending);
    }
}
