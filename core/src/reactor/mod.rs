//! Completion reactor: the single event loop behind every in-flight call
//!
//! The reactor is the only writer of per-request state. It owns one
//! [`CallStateMachine`] per catalog entry and a readiness queue holding the
//! event stream of every dispatched call, each event tagged with the id of
//! the request it belongs to. The loop:
//!
//! 1. waits for the next ready event (or a new call from the dispatcher),
//! 2. feeds it to the owning state machine,
//! 3. stops once the completion counter reaches the request total.
//!
//! Because all transitions funnel through this one task, records need no
//! locking. Only the completion counter is shared, with the driver.

use std::sync::Arc;

use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::call::CallStateMachine;
use crate::dispatcher::DispatchedCall;
use crate::error::FailureCause;
use crate::record::{CompletionCounter, RequestRecord};
use crate::request::{RequestCatalog, RequestId};
use crate::traits::CallEvent;

/// A tagged readiness event; `None` means the call's stream closed
type ReadyEvent = (RequestId, Option<CallEvent>);

/// Single-consumer event loop over all in-flight calls
pub struct CompletionReactor {
    machines: Vec<CallStateMachine>,
    counter: Arc<CompletionCounter>,
    incoming: mpsc::Receiver<DispatchedCall>,
    ready: SelectAll<BoxStream<'static, ReadyEvent>>,
}

impl CompletionReactor {
    /// Create a reactor for one run over `catalog`
    ///
    /// `counter` must be fresh and sized to the catalog.
    pub fn new(
        catalog: &RequestCatalog,
        counter: Arc<CompletionCounter>,
        incoming: mpsc::Receiver<DispatchedCall>,
    ) -> Self {
        debug_assert_eq!(counter.total(), catalog.len());
        debug_assert_eq!(counter.completed(), 0);

        Self {
            machines: catalog.iter().map(CallStateMachine::new).collect(),
            counter,
            incoming,
            ready: SelectAll::new(),
        }
    }

    /// Run until every request is terminal or shutdown is signalled
    ///
    /// On shutdown, requests still in flight fail with
    /// [`FailureCause::DeadlineExceeded`] and requests never dispatched with
    /// [`FailureCause::NotDispatched`], so the counter always ends at the
    /// total. Returns one record per request in catalog order.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Vec<RequestRecord> {
        let mut dispatch_open = true;
        let mut shutdown_open = true;

        tracing::debug!(total = self.counter.total(), "Completion reactor started");

        while !self.counter.is_complete() {
            if !dispatch_open && self.ready.is_empty() {
                // Dispatch stopped short and nothing is left in flight
                tracing::warn!(
                    completed = self.counter.completed(),
                    total = self.counter.total(),
                    "Dispatch ended early, failing remaining requests"
                );
                self.abandon_remaining(FailureCause::NotDispatched);
                break;
            }

            tokio::select! {
                biased;

                signal = shutdown.recv(), if shutdown_open => match signal {
                    Err(RecvError::Closed) => shutdown_open = false,
                    Ok(()) | Err(RecvError::Lagged(_)) => {
                        tracing::warn!(
                            completed = self.counter.completed(),
                            total = self.counter.total(),
                            "Shutdown signalled, failing remaining requests"
                        );
                        self.abandon_remaining(FailureCause::DeadlineExceeded);
                        break;
                    }
                },

                call = self.incoming.recv(), if dispatch_open => match call {
                    Some(call) => self.register(call),
                    None => dispatch_open = false,
                },

                ready = self.ready.next(), if !self.ready.is_empty() => {
                    if let Some((id, event)) = ready {
                        self.deliver(id, event);
                    }
                }
            }
        }

        tracing::debug!(
            completed = self.counter.completed(),
            total = self.counter.total(),
            "Completion reactor finished"
        );

        self.machines
            .into_iter()
            .map(CallStateMachine::into_record)
            .collect()
    }

    fn register(&mut self, call: DispatchedCall) {
        let DispatchedCall {
            id,
            dispatched_at,
            events,
        } = call;

        let Some(machine) = self.machines.get_mut(id.index()) else {
            tracing::error!(request_id = %id, "Dispatched call for unknown request");
            return;
        };
        machine.mark_dispatched(dispatched_at);

        // The call is dropped as soon as it yields a terminal event. A stream
        // that closes without one yields a final `None`.
        let tagged = stream::unfold(Some(events), move |events| async move {
            let mut events = events?;
            let event = events.next().await;
            let open = matches!(
                event,
                Some(CallEvent::Started | CallEvent::Fragment(_) | CallEvent::StreamEnded)
            );
            Some(((id, event), open.then_some(events)))
        })
        .boxed();

        self.ready.push(tagged);
    }

    fn deliver(&mut self, id: RequestId, event: Option<CallEvent>) {
        let now = Instant::now();
        let Some(machine) = self.machines.get_mut(id.index()) else {
            return;
        };

        match event {
            Some(event) => {
                machine.handle(event, now, &self.counter);
            }
            None => machine.abort(FailureCause::StreamClosed, now, &self.counter),
        }
    }

    fn abandon_remaining(&mut self, in_flight_cause: FailureCause) {
        let now = Instant::now();
        for machine in self.machines.iter_mut() {
            let cause = if machine.record().dispatch_time.is_some() {
                in_flight_cause.clone()
            } else {
                FailureCause::NotDispatched
            };
            machine.abort(cause, now, &self.counter);
        }
    }
}

impl std::fmt::Debug for CompletionReactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionReactor")
            .field("requests", &self.machines.len())
            .field("in_flight", &self.ready.len())
            .field("completed", &self.counter.completed())
            .finish()
    }
}
