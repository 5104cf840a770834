//! Domain error types.

use thiserror::Error;

/// Errors raised while constructing domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// Account identifier is empty or malformed.
    #[error("Invalid account id: {0:?}")]
    InvalidAccountId(String),

    /// Transfer amount must be strictly positive.
    #[error("Invalid amount: {0} (must be greater than 0)")]
    InvalidAmount(u64),

    /// Reference identifier is empty.
    #[error("Reference id must not be empty")]
    EmptyReferenceId,

    /// Source and target account are the same.
    #[error("Source and target account cannot be the same: {0}")]
    SameAccount(String),
}
