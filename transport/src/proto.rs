//! Wire messages of the `ppl.llm.proto.LLMService` API
//!
//! Written out by hand with `prost` derives so the crate builds without
//! `protoc`. Field tags must match the server's `.proto`.

/// A single generation request
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    /// Correlation id echoed back on every response
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Input text
    #[prost(string, tag = "2")]
    pub prompt: ::prost::alloc::string::String,
    /// Sampling temperature
    #[prost(float, tag = "3")]
    pub temperature: f32,
    /// Number of tokens to generate
    #[prost(uint32, tag = "4")]
    pub generation_length: u32,
}

/// Requests sent together in one call
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BatchedRequest {
    /// Requests in the batch
    #[prost(message, repeated, tag = "1")]
    pub req: ::prost::alloc::vec::Vec<Request>,
}

/// One streamed response fragment
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    /// Id of the request this fragment belongs to
    #[prost(uint64, tag = "1")]
    pub id: u64,
    /// Generated text
    #[prost(string, tag = "2")]
    pub generated: ::prost::alloc::string::String,
}
