//! Dispatcher: issues one call per catalog entry, paced by an arrival policy
//!
//! The dispatcher runs on the driver's task. It never waits for responses:
//! each call's event stream is handed to the completion reactor over a
//! channel, together with the instant the call was dispatched.
//!
//! # Example
//!
//! ```ignore
//! use stream_bench_core::dispatcher::{Dispatcher, Pacer};
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(1024);
//! let mut dispatcher = Dispatcher::new(transport, Pacer::new(policy)?);
//! let dispatched = dispatcher.run(&catalog, tx).await?;
//! ```

mod pacer;

pub use pacer::Pacer;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::{BenchError, BenchResult};
use crate::request::{RequestCatalog, RequestId};
use crate::traits::{CallStream, Transport};

/// A call handed from the dispatcher to the reactor
pub struct DispatchedCall {
    /// Request the call belongs to
    pub id: RequestId,
    /// Taken immediately before the transport was asked to start the call
    pub dispatched_at: Instant,
    /// Readiness events for this call
    pub events: CallStream,
}

impl std::fmt::Debug for DispatchedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchedCall")
            .field("id", &self.id)
            .field("dispatched_at", &self.dispatched_at)
            .finish_non_exhaustive()
    }
}

/// Issues calls in catalog order
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    pacer: Pacer,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(transport: Arc<dyn Transport>, pacer: Pacer) -> Self {
        Self { transport, pacer }
    }

    /// Dispatch every request in `catalog`
    ///
    /// Returns the number of calls handed to the reactor. The sender is
    /// dropped on return, which tells the reactor no more calls are coming.
    pub async fn run(
        &mut self,
        catalog: &RequestCatalog,
        calls: mpsc::Sender<DispatchedCall>,
    ) -> BenchResult<usize> {
        tracing::debug!(
            transport = self.transport.name(),
            requests = catalog.len(),
            policy = ?self.pacer.policy(),
            "Dispatch started"
        );

        let mut dispatched = 0;
        for spec in catalog.iter() {
            self.pacer.wait().await;

            let dispatched_at = Instant::now();
            let events = self.transport.start_call(spec);

            calls
                .send(DispatchedCall {
                    id: spec.id,
                    dispatched_at,
                    events,
                })
                .await
                .map_err(|_| {
                    BenchError::orchestration(format!(
                        "completion reactor stopped before request {} was dispatched",
                        spec.id
                    ))
                })?;

            dispatched += 1;
            tracing::trace!(request_id = %spec.id, "Request dispatched");
        }

        tracing::debug!(dispatched, "Dispatch finished");
        Ok(dispatched)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.transport.name())
            .field("pacer", &self.pacer)
            .finish()
    }
}
