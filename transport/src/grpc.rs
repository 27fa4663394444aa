//! gRPC client for the `LLMService.Generation` RPC.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use stream_bench_core::{CallEvent, CallStream, RequestSpec, Transport, TransportError};
use tonic::codec::{ProstCodec, Streaming};
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

use crate::proto::{BatchedRequest, Request, Response};
use crate::streaming::{describe_status, response_events};

/// Fully-qualified method path of the Generation RPC
pub const GENERATION_PATH: &str = "/ppl.llm.proto.LLMService/Generation";

// ============================================================================
// Configuration
// ============================================================================

/// gRPC client settings
#[derive(Debug, Clone)]
pub struct GrpcConfig {
    /// Sampling temperature sent with every request
    pub temperature: f32,
    /// Timeout for establishing the connection
    pub connect_timeout: Duration,
}

impl Default for GrpcConfig {
    fn default() -> Self {
        Self {
            temperature: 1.0,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl GrpcConfig {
    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

// ============================================================================
// Transport
// ============================================================================

/// Streaming gRPC transport
///
/// All calls share one lazily connected HTTP/2 channel. Each request is sent
/// as its own single-element `BatchedRequest`.
#[derive(Debug, Clone)]
pub struct GrpcTransport {
    target: String,
    endpoint: Endpoint,
    channel: Channel,
    config: GrpcConfig,
}

impl GrpcTransport {
    /// Create a transport for `target` (`host:port` or a full URI)
    ///
    /// No connection is made here; use [`Transport::ready`] to probe the
    /// target. Must be called from within a tokio runtime.
    pub fn new(target: impl Into<String>, config: GrpcConfig) -> Result<Self, TransportError> {
        let target = target.into();
        let endpoint = Endpoint::from_shared(endpoint_uri(&target))
            .map_err(|e| TransportError::InvalidTarget {
                target: target.clone(),
                message: e.to_string(),
            })?
            .connect_timeout(config.connect_timeout);
        let channel = endpoint.connect_lazy();

        Ok(Self {
            target,
            endpoint,
            channel,
            config,
        })
    }

    /// Client settings
    pub fn config(&self) -> &GrpcConfig {
        &self.config
    }

    /// Wire message for one request
    pub fn batched_request(&self, request: &RequestSpec) -> BatchedRequest {
        BatchedRequest {
            req: vec![Request {
                id: request.id.0,
                prompt: request.prompt.clone(),
                temperature: self.config.temperature,
                generation_length: u32::try_from(request.expected_output_len)
                    .unwrap_or(u32::MAX),
            }],
        }
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &str {
        "grpc"
    }

    fn target(&self) -> &str {
        &self.target
    }

    async fn ready(&self) -> Result<(), TransportError> {
        self.endpoint
            .connect()
            .await
            .map(drop)
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", self.target, error_chain(&e))))
    }

    fn start_call(&self, request: &RequestSpec) -> CallStream {
        let channel = self.channel.clone();
        let message = self.batched_request(request);
        let request_id = request.id.0;

        // Nothing is sent until the reactor first polls the stream
        Box::pin(async_stream::stream! {
            match generation(channel, message).await {
                Ok(responses) => {
                    yield CallEvent::Started;
                    let events = response_events(request_id, responses);
                    futures::pin_mut!(events);
                    while let Some(event) = events.next().await {
                        yield event;
                    }
                }
                Err(status) => {
                    tracing::debug!(request_id, error = %status, "Generation call rejected");
                    yield CallEvent::Failed(describe_status(&status));
                }
            }
        })
    }
}

/// Issue the Generation RPC and return its response stream
async fn generation(
    channel: Channel,
    message: BatchedRequest,
) -> Result<Streaming<Response>, Status> {
    let mut client = tonic::client::Grpc::new(channel);
    client
        .ready()
        .await
        .map_err(|e| Status::unavailable(format!("channel not ready: {e}")))?;

    let codec = ProstCodec::<BatchedRequest, Response>::default();
    let path = PathAndQuery::from_static(GENERATION_PATH);
    let response = client
        .server_streaming(tonic::Request::new(message), path, codec)
        .await?;
    Ok(response.into_inner())
}

/// Targets are usually given as `host:port`
fn endpoint_uri(target: &str) -> String {
    if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{target}")
    }
}

/// `tonic::transport::Error` hides the useful part in its source chain
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
