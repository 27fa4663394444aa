//! Token counters

use std::path::Path;

use stream_bench_core::{DatasetError, TokenCounter};
use tokenizers::Tokenizer;

/// Hugging Face tokenizer loaded from a `tokenizer.json` file
pub struct HfTokenizer {
    name: String,
    tokenizer: Tokenizer,
}

impl HfTokenizer {
    /// Load a tokenizer definition
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path).map_err(|e| {
            DatasetError::Tokenization(format!("failed to load {}: {e}", path.display()))
        })?;

        tracing::debug!(path = %path.display(), "Tokenizer loaded");
        Ok(Self {
            name: path.display().to_string(),
            tokenizer,
        })
    }
}

impl TokenCounter for HfTokenizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn count(&self, text: &str) -> Result<usize, DatasetError> {
        let encoding = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| DatasetError::Tokenization(e.to_string()))?;
        Ok(encoding.len())
    }
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer").field("name", &self.name).finish()
    }
}

/// Whitespace-based counter, used when no tokenizer file is given
///
/// A rough approximation: real tokenizers typically produce 1.3x to 4x as
/// many tokens as there are words.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenizer;

impl TokenCounter for WhitespaceTokenizer {
    fn name(&self) -> &str {
        "whitespace"
    }

    fn count(&self, text: &str) -> Result<usize, DatasetError> {
        Ok(text.split_whitespace().count())
    }
}
