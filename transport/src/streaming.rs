//! Response stream processing for the Generation RPC.
//!
//! Maps the `Result<Response, Status>` items of a server-streaming call onto
//! the engine's [`CallEvent`] vocabulary:
//!
//! ```text
//! Ok(Response)             -> Fragment(generated)
//! end of stream            -> StreamEnded, Finished(Ok)
//! Err(status from server)  -> StreamEnded, Finished(Error(status))
//! Err(transport failure)   -> Failed(cause)
//! ```

use std::error::Error as _;

use futures::{Stream, StreamExt};
use stream_bench_core::{CallEvent, CallStatus};
use tonic::Status;

use crate::proto::Response;

/// Turn a response stream into call events for request `request_id`
///
/// Fragments whose embedded id does not match `request_id` are still
/// delivered, with a warning.
pub fn response_events<S>(request_id: u64, responses: S) -> impl Stream<Item = CallEvent> + Send
where
    S: Stream<Item = Result<Response, Status>> + Send,
{
    async_stream::stream! {
        futures::pin_mut!(responses);
        let mut fragments = 0usize;

        while let Some(item) = responses.next().await {
            match item {
                Ok(response) => {
                    if response.id != request_id {
                        tracing::warn!(
                            request_id,
                            response_id = response.id,
                            "Response id does not match its call"
                        );
                    }
                    fragments += 1;
                    yield CallEvent::Fragment(response.generated);
                }
                Err(status) if is_transport_failure(&status) => {
                    tracing::debug!(request_id, fragments, error = %status, "Stream read failed");
                    yield CallEvent::Failed(describe_status(&status));
                    return;
                }
                Err(status) => {
                    tracing::debug!(request_id, fragments, code = ?status.code(), "Call finished with error status");
                    yield CallEvent::StreamEnded;
                    yield CallEvent::Finished(CallStatus::Error(describe_status(&status)));
                    return;
                }
            }
        }

        yield CallEvent::StreamEnded;
        yield CallEvent::Finished(CallStatus::Ok);
    }
}

/// Short human-readable form of a gRPC status
pub fn describe_status(status: &Status) -> String {
    if status.message().is_empty() {
        format!("{:?}", status.code())
    } else {
        format!("{:?}: {}", status.code(), status.message())
    }
}

/// Statuses synthesized from a local error (connection reset, h2 failure)
/// carry their cause; statuses sent by the server do not.
fn is_transport_failure(status: &Status) -> bool {
    status.source().is_some()
}
