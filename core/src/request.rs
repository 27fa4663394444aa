//! Request catalog: the immutable, ordered list of requests for a run

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::traits::{DatasetError, DatasetRecord, DatasetSource};

/// Unique request identifier
///
/// Assigned `0..N-1` in source order and used as the correlation key across
/// dispatch, response delivery and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl RequestId {
    /// Position of this request in its catalog
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A single request to send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    /// Stable identifier
    pub id: RequestId,

    /// Input text
    pub prompt: String,

    /// Token count of the prompt
    pub prompt_len: usize,

    /// Output tokens the server is asked to generate
    ///
    /// Used for per-token latency normalization only, never to decide when a
    /// request is complete.
    pub expected_output_len: usize,
}

/// Ordered, immutable list of requests
///
/// Cheap to clone: sweeps reuse the same catalog for every point.
#[derive(Debug, Clone)]
pub struct RequestCatalog {
    requests: Arc<[RequestSpec]>,
}

impl RequestCatalog {
    /// Build a catalog from loaded records, assigning ids in order
    pub fn from_records(records: Vec<DatasetRecord>) -> Result<Self, DatasetError> {
        if records.is_empty() {
            return Err(DatasetError::Empty);
        }

        let requests = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                if record.prompt_len == 0 {
                    return Err(DatasetError::MalformedRecord {
                        index,
                        reason: "prompt length must be positive".into(),
                    });
                }
                if record.expected_output_len == 0 {
                    return Err(DatasetError::MalformedRecord {
                        index,
                        reason: "expected output length must be positive".into(),
                    });
                }
                Ok(RequestSpec {
                    id: RequestId(index as u64),
                    prompt: record.prompt,
                    prompt_len: record.prompt_len,
                    expected_output_len: record.expected_output_len,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            requests: requests.into(),
        })
    }

    /// Load every record from `source` and build the catalog
    pub fn load(source: &dyn DatasetSource) -> Result<Self, DatasetError> {
        let records = source.load()?;
        let catalog = Self::from_records(records)?;
        tracing::info!(
            source = source.name(),
            requests = catalog.len(),
            "Request catalog loaded"
        );
        Ok(catalog)
    }

    /// Number of requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Look up a request by id
    pub fn get(&self, id: RequestId) -> Option<&RequestSpec> {
        self.requests.get(id.index())
    }

    /// Iterate in dispatch order
    pub fn iter(&self) -> impl Iterator<Item = &RequestSpec> {
        self.requests.iter()
    }

    /// Sum of prompt lengths
    pub fn total_prompt_tokens(&self) -> usize {
        self.requests.iter().map(|r| r.prompt_len).sum()
    }

    /// Sum of expected output lengths
    pub fn total_output_tokens(&self) -> usize {
        self.requests.iter().map(|r| r.expected_output_len).sum()
    }
}
