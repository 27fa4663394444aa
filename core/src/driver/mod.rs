//! Benchmark driver: runs one measurement over a request catalog
//!
//! A run wires the engine together with a fresh per-run context:
//!
//! - a [`CompletionCounter`] sized to the catalog,
//! - the dispatcher-to-reactor channel,
//! - a broadcast shutdown signal for the deadline.
//!
//! The reactor runs on its own task. The dispatcher runs on the caller's task
//! and then waits on the completion counter, so pacing sleeps never delay
//! response processing.
//!
//! # Example
//!
//! ```ignore
//! use stream_bench_core::{ArrivalPolicy, BenchmarkDriver, RunConfig};
//!
//! let driver = BenchmarkDriver::new(transport, RunConfig::default());
//! let outcome = driver.run(&catalog, ArrivalPolicy::FixedRate { rate: 10.0 }).await?;
//! println!("{:.2} tokens/s", outcome.metrics.output_tokens_per_sec);
//! ```

mod sweep;

pub use sweep::{run_sweep, SweepEntry, SweepPoint, SweepSummary, SyntheticAxis};

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::config::{ArrivalPolicy, RunConfig};
use crate::dispatcher::{Dispatcher, Pacer};
use crate::error::{BenchError, BenchResult};
use crate::metrics::{AggregateMetrics, MetricsAggregator};
use crate::reactor::CompletionReactor;
use crate::record::{CompletionCounter, RequestRecord};
use crate::request::RequestCatalog;
use crate::traits::Transport;

/// Result of one run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Aggregated statistics
    pub metrics: AggregateMetrics,
    /// Terminal record for every request, in catalog order
    pub records: Vec<RequestRecord>,
    /// Whether the run deadline cut the run short
    pub deadline_exceeded: bool,
}

impl RunOutcome {
    /// Number of requests that were handed to the transport
    pub fn dispatched(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.dispatch_time.is_some())
            .count()
    }
}

/// Orchestrates a run: reactor, dispatcher, barrier, aggregation
pub struct BenchmarkDriver {
    transport: Arc<dyn Transport>,
    config: RunConfig,
}

impl BenchmarkDriver {
    /// Create a driver
    pub fn new(transport: Arc<dyn Transport>, config: RunConfig) -> Self {
        Self { transport, config }
    }

    /// Run configuration
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Transport used for every run
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Run every request in `catalog` once
    ///
    /// Fails before dispatching anything if the configuration is invalid or
    /// the transport cannot be reached. Individual request failures never
    /// fail the run.
    pub async fn run(
        &self,
        catalog: &RequestCatalog,
        policy: ArrivalPolicy,
    ) -> BenchResult<RunOutcome> {
        self.config.validate()?;
        let pacer = Pacer::new(policy)?;

        self.transport.ready().await?;

        tracing::info!(
            endpoint = self.transport.target(),
            requests = catalog.len(),
            rate = ?policy.rate(),
            deadline = ?self.config.deadline,
            "Starting run"
        );

        let counter = Arc::new(CompletionCounter::new(catalog.len()));
        let (call_tx, call_rx) = mpsc::channel(self.config.dispatch_buffer);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let reactor = CompletionReactor::new(catalog, Arc::clone(&counter), call_rx);
        let mut reactor_handle = tokio::spawn(reactor.run(shutdown_rx));

        let start = Instant::now();
        let mut dispatcher = Dispatcher::new(Arc::clone(&self.transport), pacer);
        // Yields the reactor's join result if the task ended before the barrier
        let dispatch_and_wait = async {
            dispatcher.run(catalog, call_tx).await?;
            tokio::select! {
                _ = counter.wait() => Ok::<_, BenchError>(None),
                joined = &mut reactor_handle => Ok(Some(joined)),
            }
        };

        // `None` means the deadline expired
        let finished: Option<BenchResult<_>> = match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, dispatch_and_wait)
                .await
                .ok(),
            None => Some(dispatch_and_wait.await),
        };
        let elapsed = start.elapsed();

        let (deadline_exceeded, joined) = match finished {
            Some(Ok(joined)) => (false, joined),
            Some(Err(e)) => {
                let _ = shutdown_tx.send(());
                let _ = reactor_handle.await;
                return Err(e);
            }
            None => {
                tracing::warn!(
                    completed = counter.completed(),
                    total = counter.total(),
                    elapsed_secs = elapsed.as_secs_f64(),
                    "Run deadline exceeded"
                );
                // The reactor may already be gone if dispatch was cut short
                let _ = shutdown_tx.send(());
                (true, None)
            }
        };

        let joined = match joined {
            Some(joined) => joined,
            None => reactor_handle.await,
        };
        let records = joined
            .map_err(|e| BenchError::orchestration(format!("completion reactor failed: {e}")))?;
        if !counter.is_complete() {
            return Err(BenchError::orchestration(format!(
                "completion reactor stopped after {} of {} requests",
                counter.completed(),
                counter.total()
            )));
        }

        let metrics =
            MetricsAggregator::new(self.config.failed_requests).aggregate(catalog, &records, elapsed)?;

        tracing::info!(
            elapsed_secs = elapsed.as_secs_f64(),
            completed = metrics.successful_requests,
            failed = metrics.failed_requests,
            deadline_exceeded,
            "Run completed"
        );

        Ok(RunOutcome {
            metrics,
            records,
            deadline_exceeded,
        })
    }
}

impl std::fmt::Debug for BenchmarkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchmarkDriver")
            .field("transport", &self.transport.name())
            .field("target", &self.transport.target())
            .field("config", &self.config)
            .finish()
    }
}
