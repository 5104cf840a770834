//! Transfer state machine.

use serde::{Deserialize, Serialize};

use crate::error::SagaError;
use crate::failure::StepKind;

/// The state of a money transfer in its lifecycle.
///
/// ```text
/// NotStarted ──► Withdrawing ──┬──► Depositing ──┬──► Completed
///                              │                 └──► Refunding ──┬──► CompensatedFailure
///                              └──► Aborted                       └──► DoubleFailure
///
/// any non-terminal state ──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransferState {
    #[default]
    NotStarted,

    /// Withdraw is pending or in flight.
    Withdrawing,

    /// Deposit is pending or in flight.
    Depositing,

    /// Deposit failed; the refund is pending or in flight.
    Refunding,

    /// Money moved (terminal state).
    Completed,

    /// Deposit failed and the money was returned (terminal state).
    CompensatedFailure,

    /// Deposit and refund both failed; the source account is short
    /// (terminal state).
    DoubleFailure,

    /// Withdraw failed, nothing to compensate (terminal state).
    Aborted,

    /// Cancelled by the host (terminal state).
    Cancelled,
}

/// Inputs that drive the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    StepSucceeded(StepKind),
    StepFailed(StepKind),
    Cancel,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transition::Start => f.write_str("start"),
            Transition::StepSucceeded(step) => write!(f, "{step} succeeded"),
            Transition::StepFailed(step) => write!(f, "{step} failed"),
            Transition::Cancel => f.write_str("cancel"),
        }
    }
}

impl TransferState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferState::Completed
                | TransferState::CompensatedFailure
                | TransferState::DoubleFailure
                | TransferState::Aborted
                | TransferState::Cancelled
        )
    }

    /// The step this state is waiting on, if any.
    pub fn pending_step(&self) -> Option<StepKind> {
        match self {
            TransferState::Withdrawing => Some(StepKind::Withdraw),
            TransferState::Depositing => Some(StepKind::Deposit),
            TransferState::Refunding => Some(StepKind::Refund),
            _ => None,
        }
    }

    /// Computes the next state, rejecting anything outside the transfer's
    /// fixed shape.
    pub fn transition(self, transition: Transition) -> Result<Self, SagaError> {
        use StepKind::*;
        use TransferState::*;

        let next = match (self, transition) {
            (NotStarted, Transition::Start) => Withdrawing,
            (Withdrawing, Transition::StepSucceeded(Withdraw)) => Depositing,
            (Withdrawing, Transition::StepFailed(Withdraw)) => Aborted,
            (Depositing, Transition::StepSucceeded(Deposit)) => Completed,
            (Depositing, Transition::StepFailed(Deposit)) => Refunding,
            (Refunding, Transition::StepSucceeded(Refund)) => CompensatedFailure,
            (Refunding, Transition::StepFailed(Refund)) => DoubleFailure,
            (state, Transition::Cancel) if !state.is_terminal() => Cancelled,
            (state, transition) => {
                return Err(SagaError::InvalidTransition {
                    state,
                    transition: transition.to_string(),
                });
            }
        };
        Ok(next)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferState::NotStarted => "NotStarted",
            TransferState::Withdrawing => "Withdrawing",
            TransferState::Depositing => "Depositing",
            TransferState::Refunding => "Refunding",
            TransferState::Completed => "Completed",
            TransferState::CompensatedFailure => "CompensatedFailure",
            TransferState::DoubleFailure => "DoubleFailure",
            TransferState::Aborted => "Aborted",
            TransferState::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [TransferState; 9] = [
        TransferState::NotStarted,
        TransferState::Withdrawing,
        TransferState::Depositing,
        TransferState::Refunding,
        TransferState::Completed,
        TransferState::CompensatedFailure,
        TransferState::DoubleFailure,
        TransferState::Aborted,
        TransferState::Cancelled,
    ];

    fn walk(transitions: &[Transition]) -> TransferState {
        transitions
            .iter()
            .try_fold(TransferState::default(), |state, t| state.transition(*t))
            .unwrap()
    }

    #[test]
    fn test_happy_path() {
        let state = walk(&[
            Transition::Start,
            Transition::StepSucceeded(StepKind::Withdraw),
            Transition::StepSucceeded(StepKind::Deposit),
        ]);
        assert_eq!(state, TransferState::Completed);
    }

    #[test]
    fn test_withdraw_failure_aborts_without_refund() {
        let state = walk(&[Transition::Start, Transition::StepFailed(StepKind::Withdraw)]);
        assert_eq!(state, TransferState::Aborted);
        assert_eq!(state.pending_step(), None);
    }

    #[test]
    fn test_deposit_failure_refunds() {
        let refunding = walk(&[
            Transition::Start,
            Transition::StepSucceeded(StepKind::Withdraw),
            Transition::StepFailed(StepKind::Deposit),
        ]);
        assert_eq!(refunding, TransferState::Refunding);
        assert_eq!(refunding.pending_step(), Some(StepKind::Refund));

        assert_eq!(
            refunding
                .transition(Transition::StepSucceeded(StepKind::Refund))
                .unwrap(),
            TransferState::CompensatedFailure
        );
        assert_eq!(
            refunding
                .transition(Transition::StepFailed(StepKind::Refund))
                .unwrap(),
            TransferState::DoubleFailure
        );
    }

    #[test]
    fn test_out_of_order_results_are_rejected() {
        assert!(
            TransferState::Withdrawing
                .transition(Transition::StepSucceeded(StepKind::Deposit))
                .is_err()
        );
        assert!(
            TransferState::Depositing
                .transition(Transition::StepSucceeded(StepKind::Refund))
                .is_err()
        );
        assert!(
            TransferState::NotStarted
                .transition(Transition::StepSucceeded(StepKind::Withdraw))
                .is_err()
        );
        assert!(TransferState::Withdrawing.transition(Transition::Start).is_err());
    }

    #[test]
    fn test_terminal_states_accept_nothing() {
        for state in ALL.into_iter().filter(TransferState::is_terminal) {
            assert!(state.transition(Transition::Cancel).is_err());
            for step in StepKind::ALL {
                assert!(state.transition(Transition::StepSucceeded(step)).is_err());
                assert!(state.transition(Transition::StepFailed(step)).is_err());
            }
        }
    }

    #[test]
    fn test_cancel_from_any_live_state() {
        for state in ALL.into_iter().filter(|s| !s.is_terminal()) {
            assert_eq!(
                state.transition(Transition::Cancel).unwrap(),
                TransferState::Cancelled
            );
        }
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = TransferState::Completed
            .transition(Transition::StepFailed(StepKind::Refund))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid transition 'refund failed' from state Completed"
        );
    }

    #[test]
    fn test_serialization() {
        let state = TransferState::CompensatedFailure;
        let json = serde_json::to_string(&state).unwrap();
        let deserialized: TransferState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, deserialized);
    }
}
