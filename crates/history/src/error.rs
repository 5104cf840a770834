use thiserror::Error;

use crate::{RunId, Sequence};

/// Errors that can occur when reading or writing run history.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// Another writer appended to the run first.
    #[error("Sequence conflict for run {run_id}: expected {expected}, found {actual}")]
    SequenceConflict {
        run_id: RunId,
        expected: Sequence,
        actual: Sequence,
    },

    /// The batch handed to `append` is malformed.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for history operations.
pub type Result<T> = std::result::Result<T, HistoryError>;
