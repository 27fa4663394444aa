//! Fixed-shape synthetic requests
//!
//! The server treats a prompt consisting of a decimal number `n` as a
//! synthetic prompt of `n` tokens, so a batch can be shaped without a
//! dataset or tokenizer.

use stream_bench_core::{DatasetError, DatasetRecord, DatasetSource};

/// `batch_size` identical requests of a given input and output length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticSource {
    /// Requests in the batch
    pub batch_size: usize,
    /// Prompt tokens per request
    pub input_len: usize,
    /// Output tokens per request
    pub output_len: usize,
}

impl SyntheticSource {
    /// Create a synthetic source
    pub fn new(batch_size: usize, input_len: usize, output_len: usize) -> Self {
        Self {
            batch_size,
            input_len,
            output_len,
        }
    }
}

impl DatasetSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn load(&self) -> Result<Vec<DatasetRecord>, DatasetError> {
        if self.batch_size == 0 {
            return Err(DatasetError::Empty);
        }
        if self.input_len == 0 || self.output_len == 0 {
            return Err(DatasetError::Malformed(format!(
                "input and output lengths must be positive, got {} and {}",
                self.input_len, self.output_len
            )));
        }

        let record = DatasetRecord {
            prompt: self.input_len.to_string(),
            prompt_len: self.input_len,
            expected_output_len: self.output_len,
        };
        Ok(vec![record; self.batch_size])
    }
}
