//! Events recorded in a transfer's history.

use chrono::{DateTime, Utc};
use common::{Namespace, RunId, WorkflowId};
use domain::{DomainEvent, PaymentDetails};
use serde::{Deserialize, Serialize};

use crate::failure::{StepFailure, StepKind, TransactionId};

/// Facts about a transfer run, in the order they happened.
///
/// Replaying these through [`crate::TransferSaga`] rebuilds the run's state
/// without touching the bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TransferEvent {
    /// The run was submitted.
    TransferStarted {
        run_id: RunId,
        workflow_id: WorkflowId,
        namespace: Namespace,
        details: PaymentDetails,
        started_at: DateTime<Utc>,
    },

    /// A step is about to be executed. Without a matching result the step
    /// was in flight when the run stopped.
    StepScheduled {
        step: StepKind,
        /// None means unlimited.
        attempt_budget: Option<u32>,
    },

    /// A step succeeded, possibly after retries.
    StepCompleted {
        step: StepKind,
        transaction_id: TransactionId,
        attempts: u32,
    },

    /// A step failed terminally.
    StepFailed {
        step: StepKind,
        failure: StepFailure,
        attempts: u32,
    },

    TransferCompleted,

    /// Deposit failed and the refund succeeded.
    TransferCompensated,

    /// Deposit and refund both failed. Someone has to fix the source account
    /// by hand.
    ManualInterventionRequired {
        deposit_error: StepFailure,
        refund_error: StepFailure,
    },

    /// Withdraw failed; no money moved.
    TransferAborted { failure: StepFailure },

    TransferCancelled,
}

impl TransferEvent {
    pub fn started(
        run_id: RunId,
        workflow_id: WorkflowId,
        namespace: Namespace,
        details: PaymentDetails,
    ) -> Self {
        TransferEvent::TransferStarted {
            run_id,
            workflow_id,
            namespace,
            details,
            started_at: Utc::now(),
        }
    }

    /// The event that records a step's terminal result.
    pub fn step_result(step: StepKind, result: crate::failure::StepResult, attempts: u32) -> Self {
        match result {
            Ok(transaction_id) => TransferEvent::StepCompleted {
                step,
                transaction_id,
                attempts,
            },
            Err(failure) => TransferEvent::StepFailed {
                step,
                failure,
                attempts,
            },
        }
    }
}

impl DomainEvent for TransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TransferEvent::TransferStarted { .. } => "TransferStarted",
            TransferEvent::StepScheduled { .. } => "StepScheduled",
            TransferEvent::StepCompleted { .. } => "StepCompleted",
            TransferEvent::StepFailed { .. } => "StepFailed",
            TransferEvent::TransferCompleted => "TransferCompleted",
            TransferEvent::TransferCompensated => "TransferCompensated",
            TransferEvent::ManualInterventionRequired { .. } => "ManualInterventionRequired",
            TransferEvent::TransferAborted { .. } => "TransferAborted",
            TransferEvent::TransferCancelled => "TransferCancelled",
        }
    }

    fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::TransferCompleted
                | TransferEvent::TransferCompensated
                | TransferEvent::ManualInterventionRequired { .. }
                | TransferEvent::TransferAborted { .. }
                | TransferEvent::TransferCancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    #[test]
    fn test_event_type_names() {
        let event = TransferEvent::StepScheduled {
            step: StepKind::Withdraw,
            attempt_budget: None,
        };
        assert_eq!(event.event_type(), "StepScheduled");
        assert!(!event.is_terminal());
        assert!(TransferEvent::TransferCancelled.is_terminal());
    }

    #[test]
    fn test_tagged_serialization() {
        let event = TransferEvent::StepFailed {
            step: StepKind::Deposit,
            failure: StepFailure::new(FailureKind::Unavailable, "bank offline"),
            attempts: 3,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StepFailed");
        assert_eq!(json["data"]["step"], "deposit");
        assert_eq!(json["data"]["failure"]["kind"], "unavailable");

        let back: TransferEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_unit_variants_round_trip() {
        let json = serde_json::to_string(&TransferEvent::TransferCompleted).unwrap();
        let back: TransferEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TransferEvent::TransferCompleted);
    }

    #[test]
    fn test_step_result_picks_variant() {
        let ok = TransferEvent::step_result(StepKind::Withdraw, Ok(TransactionId::new("W-1")), 1);
        assert_eq!(ok.event_type(), "StepCompleted");

        let err = TransferEvent::step_result(
            StepKind::Refund,
            Err(StepFailure::unavailable("down")),
            7,
        );
        assert_eq!(err.event_type(), "StepFailed");
    }
}
