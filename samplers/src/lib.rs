//! Request sources for stream-bench
//!
//! This crate provides implementations of the core dataset and tokenizer
//! traits:
//!
//! - [`ShareGptSource`]: conversation datasets replayed by the throughput sweep
//! - [`SyntheticSource`]: fixed-shape batches used by the latency sweep
//! - [`HfTokenizer`] and [`WhitespaceTokenizer`]: token counting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod sharegpt;
pub mod synthetic;
pub mod tokenizer;

pub use sharegpt::ShareGptSource;
pub use synthetic::SyntheticSource;
pub use tokenizer::{HfTokenizer, WhitespaceTokenizer};
