//! ShareGPT-style conversation datasets
//!
//! The file is a JSON array of conversations:
//!
//! ```json
//! [
//!   {
//!     "id": "abc",
//!     "conversations": [
//!       { "from": "human", "value": "prompt text" },
//!       { "from": "gpt", "value": "reference answer" }
//!     ]
//!   }
//! ]
//! ```
//!
//! Turn 0 is the prompt and turn 1 the reference answer; later turns are
//! ignored. The answer is never sent, only its token count, which becomes the
//! requested generation length.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use stream_bench_core::{DatasetError, DatasetRecord, DatasetSource, TokenCounter};

#[derive(Debug, Deserialize)]
struct Conversation {
    conversations: Vec<Turn>,
}

#[derive(Debug, Deserialize)]
struct Turn {
    value: String,
}

/// Loads requests from a ShareGPT-style JSON file
pub struct ShareGptSource {
    path: PathBuf,
    tokenizer: Arc<dyn TokenCounter>,
}

impl ShareGptSource {
    /// Create a source reading `path`, counting tokens with `tokenizer`
    pub fn new(path: impl Into<PathBuf>, tokenizer: Arc<dyn TokenCounter>) -> Self {
        Self {
            path: path.into(),
            tokenizer,
        }
    }

    /// Dataset file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse dataset contents
    pub fn parse(&self, contents: &str) -> Result<Vec<DatasetRecord>, DatasetError> {
        let root: Vec<serde_json::Value> = serde_json::from_str(contents)
            .map_err(|e| DatasetError::Malformed(format!("expected a JSON array: {e}")))?;

        if root.is_empty() {
            return Err(DatasetError::Empty);
        }

        root.into_iter()
            .enumerate()
            .map(|(index, value)| self.record(index, value))
            .collect()
    }

    fn record(&self, index: usize, value: serde_json::Value) -> Result<DatasetRecord, DatasetError> {
        let conversation: Conversation =
            serde_json::from_value(value).map_err(|e| DatasetError::MalformedRecord {
                index,
                reason: e.to_string(),
            })?;

        let mut turns = conversation.conversations.into_iter();
        let (prompt, answer) = match (turns.next(), turns.next()) {
            (Some(prompt), Some(answer)) => (prompt.value, answer.value),
            _ => {
                return Err(DatasetError::MalformedRecord {
                    index,
                    reason: "conversation needs a prompt and a reference answer".into(),
                })
            }
        };

        let count = |text: &str| {
            self.tokenizer
                .count(text)
                .map_err(|e| DatasetError::MalformedRecord {
                    index,
                    reason: e.to_string(),
                })
        };
        // Both lengths are positive by definition
        let prompt_len = count(&prompt)?.max(1);
        let expected_output_len = count(&answer)?.max(1);

        Ok(DatasetRecord {
            prompt,
            prompt_len,
            expected_output_len,
        })
    }
}

impl DatasetSource for ShareGptSource {
    fn name(&self) -> &str {
        "sharegpt"
    }

    fn load(&self) -> Result<Vec<DatasetRecord>, DatasetError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|source| DatasetError::Unreadable {
                path: self.path.display().to_string(),
                source,
            })?;

        let records = self.parse(&contents)?;
        tracing::info!(
            path = %self.path.display(),
            records = records.len(),
            tokenizer = self.tokenizer.name(),
            "Dataset parsed"
        );
        Ok(records)
    }
}

impl std::fmt::Debug for ShareGptSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShareGptSource")
            .field("path", &self.path)
            .field("tokenizer", &self.tokenizer.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WhitespaceTokenizer;
    use std::io::Write;
    use stream_bench_core::RequestCatalog;

    fn source(path: &Path) -> ShareGptSource {
        ShareGptSource::new(path, Arc::new(WhitespaceTokenizer))
    }

    fn write_dataset(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_conversations() {
        let file = write_dataset(
            r#"[
                {"id": "a", "conversations": [
                    {"from": "human", "value": "Tell me a joke"},
                    {"from": "gpt", "value": "Why did the chicken cross the road"},
                    {"from": "human", "value": "ignored"}
                ]},
                {"id": "b", "conversations": [
                    {"from": "human", "value": "Hi"},
                    {"from": "gpt", "value": "Hello there"}
                ]}
            ]"#,
        );

        let records = source(file.path()).load().unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].prompt, "Tell me a joke");
        assert_eq!(records[0].prompt_len, 4);
        assert_eq!(records[0].expected_output_len, 7);
        assert_eq!(records[1].prompt_len, 1);
        assert_eq!(records[1].expected_output_len, 2);
    }

    #[test]
    fn test_catalog_from_dataset() {
        let file = write_dataset(
            r#"[{"conversations": [{"value": "a b"}, {"value": "c d e"}]}]"#,
        );

        let catalog = RequestCatalog::load(&source(file.path())).unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.total_output_tokens(), 3);
    }

    #[test]
    fn test_empty_answer_counts_as_one_token() {
        let file = write_dataset(r#"[{"conversations": [{"value": "q"}, {"value": ""}]}]"#);

        let records = source(file.path()).load().unwrap();

        assert_eq!(records[0].expected_output_len, 1);
    }

    #[test]
    fn test_missing_answer_names_record() {
        let file = write_dataset(
            r#"[
                {"conversations": [{"value": "q"}, {"value": "a"}]},
                {"conversations": [{"value": "q only"}]}
            ]"#,
        );

        let err = source(file.path()).load().unwrap_err();

        match err {
            DatasetError::MalformedRecord { index, .. } => assert_eq!(index, 1),
            other => panic!("expected a malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_field_names_record() {
        let file = write_dataset(r#"[{"conversations": [{"value": "q"}, {"from": "gpt"}]}]"#);

        let err = source(file.path()).load().unwrap_err();

        assert!(matches!(err, DatasetError::MalformedRecord { index: 0, .. }));
    }

    /// Counter that rejects any text containing a marker
    struct RejectingCounter;

    impl TokenCounter for RejectingCounter {
        fn name(&self) -> &str {
            "rejecting"
        }

        fn count(&self, text: &str) -> Result<usize, DatasetError> {
            if text.contains('\u{fffd}') {
                return Err(DatasetError::Tokenization("unencodable text".into()));
            }
            Ok(text.split_whitespace().count())
        }
    }

    #[test]
    fn test_tokenizer_failure_names_record() {
        let file = write_dataset(
            r#"[
                {"conversations": [{"value": "q"}, {"value": "a"}]},
                {"conversations": [{"value": "q"}, {"value": "a"}]},
                {"conversations": [{"value": "q"}, {"value": "bad \ufffd"}]}
            ]"#,
        );

        let err = ShareGptSource::new(file.path(), Arc::new(RejectingCounter))
            .load()
            .unwrap_err();

        match err {
            DatasetError::MalformedRecord { index, reason } => {
                assert_eq!(index, 2);
                assert!(reason.contains("unencodable text"), "{reason}");
            }
            other => panic!("expected a malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json() {
        let file = write_dataset("{not json");
        let err = source(file.path()).load().unwrap_err();
        assert!(matches!(err, DatasetError::Malformed(_)));
    }

    #[test]
    fn test_empty_dataset() {
        let file = write_dataset("[]");
        let err = source(file.path()).load().unwrap_err();
        assert!(matches!(err, DatasetError::Empty));
    }

    #[test]
    fn test_unreadable_file() {
        let err = source(Path::new("/nonexistent/sharegpt.json"))
            .load()
            .unwrap_err();
        assert!(matches!(err, DatasetError::Unreadable { .. }));
    }
}
