//! Step results and the failure taxonomy used to classify them.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The three steps of a money transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Withdraw,
    Deposit,
    /// Compensates a successful withdraw after the deposit failed.
    Refund,
}

impl StepKind {
    pub const ALL: [StepKind; 3] = [StepKind::Withdraw, StepKind::Deposit, StepKind::Refund];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Withdraw => "withdraw",
            StepKind::Deposit => "deposit",
            StepKind::Refund => "refund",
        }
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a step failure.
///
/// `InvalidAccount` and `InsufficientFunds` are business failures: retrying
/// cannot change their outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidAccount,
    InsufficientFunds,
    /// The bank refused a request that can never succeed as submitted, such
    /// as a reused idempotency key.
    Rejected,
    /// A single attempt exceeded its start-to-close timeout.
    Timeout,
    /// The remote system could not be reached.
    Unavailable,
    Internal,
}

impl FailureKind {
    /// Returns true for failures caused by business rules rather than
    /// infrastructure.
    pub fn is_business(&self) -> bool {
        matches!(
            self,
            FailureKind::InvalidAccount | FailureKind::InsufficientFunds | FailureKind::Rejected
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidAccount => "invalid_account",
            FailureKind::InsufficientFunds => "insufficient_funds",
            FailureKind::Rejected => "rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            FailureKind::InvalidAccount => "invalid account",
            FailureKind::InsufficientFunds => "insufficient funds",
            FailureKind::Rejected => "request rejected",
            FailureKind::Timeout => "timeout",
            FailureKind::Unavailable => "service unavailable",
            FailureKind::Internal => "internal error",
        };
        f.write_str(text)
    }
}

/// A failed step attempt, with enough structure for the retry policy to
/// classify it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_account(account: impl std::fmt::Display) -> Self {
        Self::new(
            FailureKind::InvalidAccount,
            format!("account number {account} is invalid"),
        )
    }

    pub fn insufficient_funds(account: impl std::fmt::Display, balance: u64, amount: u64) -> Self {
        Self::new(
            FailureKind::InsufficientFunds,
            format!("account {account} has balance {balance}, cannot withdraw {amount}"),
        )
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            FailureKind::Timeout,
            format!("attempt did not finish within {}ms", after.as_millis()),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }
}

/// Opaque identifier returned by a successful step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of a single step execution.
pub type StepResult = Result<TransactionId, StepFailure>;
