//! Scripted in-memory transport for engine tests

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::request::{RequestCatalog, RequestSpec};
use crate::traits::{
    CallEvent, CallStatus, CallStream, DatasetRecord, Transport, TransportError,
};

/// One scripted event, emitted `delay` after the previous one
pub(crate) type Step = (Duration, CallEvent);

#[derive(Clone)]
struct Script {
    steps: Vec<Step>,
    hang: bool,
}

/// Transport that replays per-request event scripts
///
/// Requests without a script get [`ok`] with a single fragment.
pub(crate) struct ScriptedTransport {
    scripts: Mutex<HashMap<u64, Script>>,
    default_steps: Vec<Step>,
    started: Mutex<Vec<u64>>,
    reachable: bool,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            default_steps: ok(&["tok"], Duration::ZERO),
            started: Mutex::new(Vec::new()),
            reachable: true,
        }
    }

    /// Script used for requests without their own
    pub(crate) fn with_default(mut self, steps: Vec<Step>) -> Self {
        self.default_steps = steps;
        self
    }

    /// Script for one request
    pub(crate) fn with_script(self, id: u64, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(id, Script { steps, hang: false });
        self
    }

    /// Script for one request that never ends after its last step
    pub(crate) fn with_hanging(self, id: u64, steps: Vec<Step>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(id, Script { steps, hang: true });
        self
    }

    /// Fail the readiness probe
    pub(crate) fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// Request ids in the order their calls were started
    pub(crate) fn started(&self) -> Vec<u64> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn target(&self) -> &str {
        "memory"
    }

    async fn ready(&self) -> Result<(), TransportError> {
        if self.reachable {
            Ok(())
        } else {
            Err(TransportError::Unreachable("connection refused".into()))
        }
    }

    fn start_call(&self, request: &RequestSpec) -> CallStream {
        self.started.lock().unwrap().push(request.id.0);

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&request.id.0)
            .cloned()
            .unwrap_or_else(|| Script {
                steps: self.default_steps.clone(),
                hang: false,
            });

        let events = stream::iter(script.steps).then(|(delay, event)| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            event
        });

        if script.hang {
            return Box::pin(events.chain(stream::pending()));
        }
        Box::pin(events)
    }
}

/// Successful call: fragments `gap` apart, then a clean end
pub(crate) fn ok(fragments: &[&str], gap: Duration) -> Vec<Step> {
    let mut steps = vec![(Duration::ZERO, CallEvent::Started)];
    steps.extend(
        fragments
            .iter()
            .map(|text| (gap, CallEvent::Fragment(text.to_string()))),
    );
    steps.push((Duration::ZERO, CallEvent::StreamEnded));
    steps.push((Duration::ZERO, CallEvent::Finished(CallStatus::Ok)));
    steps
}

/// Call that streams `fragments` and then loses its connection
pub(crate) fn broken(fragments: &[&str], gap: Duration) -> Vec<Step> {
    let mut steps = vec![(Duration::ZERO, CallEvent::Started)];
    steps.extend(
        fragments
            .iter()
            .map(|text| (gap, CallEvent::Fragment(text.to_string()))),
    );
    steps.push((gap, CallEvent::Failed("connection reset by peer".into())));
    steps
}

/// Catalog of `n` requests with 4 prompt tokens and 8 expected output tokens
pub(crate) fn catalog(n: usize) -> RequestCatalog {
    catalog_with(&vec![(4, 8); n])
}

/// Catalog with the given `(prompt_len, expected_output_len)` pairs
pub(crate) fn catalog_with(lens: &[(usize, usize)]) -> RequestCatalog {
    let records = lens
        .iter()
        .enumerate()
        .map(|(i, &(prompt_len, expected_output_len))| DatasetRecord {
            prompt: format!("prompt {i}"),
            prompt_len,
            expected_output_len,
        })
        .collect();
    RequestCatalog::from_records(records).unwrap()
}
