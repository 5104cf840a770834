//! Saga error types.

use common::{RunId, WorkflowId};
use history::HistoryError;
use thiserror::Error;

use crate::failure::StepKind;
use crate::state::TransferState;

/// Errors raised while registering, starting or driving transfers.
///
/// Step failures are not errors at this level: they are part of the
/// transfer's outcome.
#[derive(Debug, Error)]
pub enum SagaError {
    /// A recorded step result does not fit the current state.
    #[error("Invalid transition '{transition}' from state {state}")]
    InvalidTransition {
        state: TransferState,
        transition: String,
    },

    /// The worker was built without an executor for a step.
    #[error("No executor registered for step '{0}'")]
    StepNotRegistered(StepKind),

    /// Two executors were registered for the same step.
    #[error("Step '{0}' is registered more than once")]
    DuplicateStep(StepKind),

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// A run with this workflow ID already exists in the namespace.
    #[error("Workflow '{0}' has already been started")]
    WorkflowAlreadyStarted(WorkflowId),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(WorkflowId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// The run has no terminal event yet.
    #[error("Run {0} has not finished")]
    RunNotFinished(RunId),

    /// The run is already terminal and cannot be cancelled.
    #[error("Run {0} has already finished")]
    AlreadyFinished(RunId),

    /// The task driving the run stopped without recording an outcome.
    #[error("Run {run_id} stopped unexpectedly: {reason}")]
    RunCrashed { run_id: RunId, reason: String },

    /// History store error.
    #[error("History store error: {0}")]
    History(#[from] HistoryError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
