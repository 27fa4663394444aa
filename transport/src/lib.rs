//! gRPC transport for stream-bench
//!
//! Implements [`Transport`](stream_bench_core::Transport) for the
//! `LLMService.Generation` server-streaming RPC:
//!
//! - [`proto`]: wire messages
//! - [`streaming`]: response stream to call-event mapping
//! - [`grpc`]: channel management and the `Transport` impl

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod grpc;
pub mod proto;
pub mod streaming;

pub use grpc::{GrpcConfig, GrpcTransport, GENERATION_PATH};
pub use streaming::{describe_status, response_events};
