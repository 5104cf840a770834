//! Transfer saga aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{Namespace, RunId, WorkflowId};
use domain::{Aggregate, DomainEvent, PaymentDetails};
use history::{HistoryEvent, Sequence};
use serde::Serialize;

use crate::error::SagaError;
use crate::events::TransferEvent;
use crate::failure::{StepFailure, StepKind, TransactionId};
use crate::money_transfer;
use crate::outcome::{RunFailure, RunOutcome, SagaOutcome};
use crate::state::{TransferState, Transition};

/// What the orchestrator has to do next for a run.
#[derive(Debug, Clone, PartialEq)]
pub enum NextAction {
    /// The run has no `TransferStarted` event.
    AwaitStart,
    /// Execute this step. `resumed` is set when the step was scheduled
    /// before but never produced a result.
    Execute { step: StepKind, resumed: bool },
    /// The state is terminal; record this closing event.
    Close(TransferEvent),
    /// The run is closed.
    Finished,
}

/// An event-sourced money transfer.
///
/// Built only by applying history, so two replays of the same events always
/// agree on what happens next.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TransferSaga {
    run_id: Option<RunId>,
    workflow_id: Option<WorkflowId>,
    namespace: Option<Namespace>,
    #[serde(skip)]
    sequence: Sequence,
    details: Option<PaymentDetails>,
    started_at: Option<DateTime<Utc>>,
    state: TransferState,
    withdraw_tx: Option<TransactionId>,
    deposit_tx: Option<TransactionId>,
    refund_tx: Option<TransactionId>,
    withdraw_error: Option<StepFailure>,
    deposit_error: Option<StepFailure>,
    refund_error: Option<StepFailure>,
    /// Step scheduled without a recorded result.
    in_flight: Option<StepKind>,
    /// Attempts per finished step.
    attempts: BTreeMap<StepKind, u32>,
    /// Set once the terminal event has been recorded.
    closed: bool,
}

impl Aggregate for TransferSaga {
    type Event = TransferEvent;

    fn aggregate_type() -> &'static str {
        money_transfer::SAGA_TYPE
    }

    fn sequence(&self) -> Sequence {
        self.sequence
    }

    fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = sequence;
    }

    fn apply(&mut self, event: Self::Event) {
        if self.closed {
            tracing::warn!(
                event_type = event.event_type(),
                "ignoring event recorded after the run closed"
            );
            return;
        }
        if let Err(err) = self.check(&event) {
            tracing::warn!(error = %err, "ignoring out-of-order event");
            return;
        }
        let terminal = event.is_terminal();

        match event {
            TransferEvent::TransferStarted {
                run_id,
                workflow_id,
                namespace,
                details,
                started_at,
            } => {
                self.run_id = Some(run_id);
                self.workflow_id = Some(workflow_id);
                self.namespace = Some(namespace);
                self.details = Some(details);
                self.started_at = Some(started_at);
                self.advance(Transition::Start);
            }
            TransferEvent::StepScheduled { step, .. } => {
                self.in_flight = Some(step);
            }
            TransferEvent::StepCompleted {
                step,
                transaction_id,
                attempts,
            } => {
                self.in_flight = None;
                self.attempts.insert(step, attempts);
                match step {
                    StepKind::Withdraw => self.withdraw_tx = Some(transaction_id),
                    StepKind::Deposit => self.deposit_tx = Some(transaction_id),
                    StepKind::Refund => self.refund_tx = Some(transaction_id),
                }
                self.advance(Transition::StepSucceeded(step));
            }
            TransferEvent::StepFailed {
                step,
                failure,
                attempts,
            } => {
                self.in_flight = None;
                self.attempts.insert(step, attempts);
                match step {
                    StepKind::Withdraw => self.withdraw_error = Some(failure),
                    StepKind::Deposit => self.deposit_error = Some(failure),
                    StepKind::Refund => self.refund_error = Some(failure),
                }
                self.advance(Transition::StepFailed(step));
            }
            TransferEvent::TransferCancelled => {
                self.in_flight = None;
                self.advance(Transition::Cancel);
            }
            TransferEvent::TransferCompleted
            | TransferEvent::TransferCompensated
            | TransferEvent::ManualInterventionRequired { .. }
            | TransferEvent::TransferAborted { .. } => {}
        }

        if terminal {
            self.closed = true;
        }
    }
}

impl TransferSaga {
    /// Rebuilds a run from its recorded history.
    pub fn from_history(events: &[HistoryEvent]) -> Result<Self, SagaError> {
        let mut saga = Self::default();
        for event in events {
            saga.apply(event.decode::<TransferEvent>()?);
            saga.set_sequence(event.sequence);
        }
        Ok(saga)
    }

    /// Checks that an event fits the current state without applying it.
    pub fn check(&self, event: &TransferEvent) -> Result<(), SagaError> {
        let transition = match event {
            TransferEvent::TransferStarted { .. } => Transition::Start,
            TransferEvent::StepCompleted { step, .. } => Transition::StepSucceeded(*step),
            TransferEvent::StepFailed { step, .. } => Transition::StepFailed(*step),
            TransferEvent::TransferCancelled => Transition::Cancel,
            _ => return Ok(()),
        };
        self.state.transition(transition).map(|_| ())
    }

    /// Only called for events that passed [`Self::check`].
    fn advance(&mut self, transition: Transition) {
        if let Ok(next) = self.state.transition(transition) {
            self.state = next;
        }
    }

    /// Decides the next action from the current state alone.
    pub fn next_step(&self) -> NextAction {
        if self.closed {
            return NextAction::Finished;
        }
        if let Some(step) = self.state.pending_step() {
            return NextAction::Execute {
                step,
                resumed: self.in_flight == Some(step),
            };
        }

        let closing = match self.state {
            TransferState::NotStarted => return NextAction::AwaitStart,
            TransferState::Completed => Some(TransferEvent::TransferCompleted),
            TransferState::CompensatedFailure => Some(TransferEvent::TransferCompensated),
            TransferState::DoubleFailure => self
                .deposit_error
                .clone()
                .zip(self.refund_error.clone())
                .map(|(deposit_error, refund_error)| {
                    TransferEvent::ManualInterventionRequired {
                        deposit_error,
                        refund_error,
                    }
                }),
            TransferState::Aborted => self
                .withdraw_error
                .clone()
                .map(|failure| TransferEvent::TransferAborted { failure }),
            TransferState::Cancelled => Some(TransferEvent::TransferCancelled),
            TransferState::Withdrawing | TransferState::Depositing | TransferState::Refunding => {
                None
            }
        };
        closing.map_or(NextAction::Finished, NextAction::Close)
    }

    /// The run's outcome, once its state is terminal.
    pub fn outcome(&self) -> Option<RunOutcome> {
        let outcome = match self.state {
            TransferState::Completed => Ok(SagaOutcome::Completed {
                withdraw_tx: self.withdraw_tx.clone()?,
                deposit_tx: self.deposit_tx.clone()?,
            }),
            TransferState::CompensatedFailure => Ok(SagaOutcome::CompensatedFailure {
                deposit_error: self.deposit_error.clone()?,
                refund_tx: self.refund_tx.clone()?,
            }),
            TransferState::DoubleFailure => Ok(SagaOutcome::DoubleFailure {
                deposit_error: self.deposit_error.clone()?,
                refund_error: self.refund_error.clone()?,
            }),
            TransferState::Aborted => Err(RunFailure::WithdrawFailed(
                self.withdraw_error.clone()?,
            )),
            TransferState::Cancelled => Err(RunFailure::Cancelled),
            _ => return None,
        };
        Some(outcome)
    }
}

// Query methods
impl TransferSaga {
    pub fn run_id(&self) -> Option<RunId> {
        self.run_id
    }

    pub fn workflow_id(&self) -> Option<&WorkflowId> {
        self.workflow_id.as_ref()
    }

    pub fn namespace(&self) -> Option<&Namespace> {
        self.namespace.as_ref()
    }

    pub fn details(&self) -> Option<&PaymentDetails> {
        self.details.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Transaction ID of a successful step.
    pub fn transaction_id(&self, step: StepKind) -> Option<&TransactionId> {
        match step {
            StepKind::Withdraw => self.withdraw_tx.as_ref(),
            StepKind::Deposit => self.deposit_tx.as_ref(),
            StepKind::Refund => self.refund_tx.as_ref(),
        }
    }

    /// Terminal failure of a step.
    pub fn failure(&self, step: StepKind) -> Option<&StepFailure> {
        match step {
            StepKind::Withdraw => self.withdraw_error.as_ref(),
            StepKind::Deposit => self.deposit_error.as_ref(),
            StepKind::Refund => self.refund_error.as_ref(),
        }
    }

    pub fn attempts(&self, step: StepKind) -> Option<u32> {
        self.attempts.get(&step).copied()
    }

    pub fn in_flight(&self) -> Option<StepKind> {
        self.in_flight
    }

    /// True once the terminal event has been recorded.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::failure::FailureKind;

    fn started() -> TransferEvent {
        TransferEvent::started(
            RunId::new(),
            WorkflowId::new("pay-invoice-701"),
            Namespace::default(),
            PaymentDetails::new("85-150", "43-812", 250, "12345").unwrap(),
        )
    }

    fn scheduled(step: StepKind) -> TransferEvent {
        TransferEvent::StepScheduled {
            step,
            attempt_budget: None,
        }
    }

    fn completed(step: StepKind, tx: &str) -> TransferEvent {
        TransferEvent::StepCompleted {
            step,
            transaction_id: TransactionId::new(tx),
            attempts: 1,
        }
    }

    fn failed(step: StepKind, kind: FailureKind) -> TransferEvent {
        TransferEvent::StepFailed {
            step,
            failure: StepFailure::new(kind, "boom"),
            attempts: 2,
        }
    }

    fn replay(events: Vec<TransferEvent>) -> TransferSaga {
        let mut saga = TransferSaga::default();
        saga.apply_events(events);
        saga
    }

    #[test]
    fn test_default_saga() {
        let saga = TransferSaga::default();
        assert!(saga.run_id().is_none());
        assert_eq!(saga.state(), TransferState::NotStarted);
        assert_eq!(saga.next_step(), NextAction::AwaitStart);
        assert!(saga.outcome().is_none());
    }

    #[test]
    fn test_started_saga_withdraws_first() {
        let saga = replay(vec![started()]);
        assert_eq!(saga.state(), TransferState::Withdrawing);
        assert_eq!(saga.workflow_id().unwrap().as_str(), "pay-invoice-701");
        assert_eq!(
            saga.next_step(),
            NextAction::Execute {
                step: StepKind::Withdraw,
                resumed: false
            }
        );
    }

    #[test]
    fn test_scheduled_step_without_result_is_resumed() {
        let saga = replay(vec![started(), scheduled(StepKind::Withdraw)]);
        assert_eq!(saga.in_flight(), Some(StepKind::Withdraw));
        assert_eq!(
            saga.next_step(),
            NextAction::Execute {
                step: StepKind::Withdraw,
                resumed: true
            }
        );
    }

    #[test]
    fn test_happy_path_outcome() {
        let saga = replay(vec![
            started(),
            scheduled(StepKind::Withdraw),
            completed(StepKind::Withdraw, "W-0001"),
            scheduled(StepKind::Deposit),
            completed(StepKind::Deposit, "D-0002"),
        ]);

        assert_eq!(saga.state(), TransferState::Completed);
        assert_eq!(saga.next_step(), NextAction::Close(TransferEvent::TransferCompleted));
        assert_eq!(
            saga.outcome(),
            Some(Ok(SagaOutcome::Completed {
                withdraw_tx: TransactionId::new("W-0001"),
                deposit_tx: TransactionId::new("D-0002"),
            }))
        );
        assert_eq!(saga.attempts(StepKind::Deposit), Some(1));
    }

    #[test]
    fn test_withdraw_failure_closes_with_abort() {
        let saga = replay(vec![
            started(),
            scheduled(StepKind::Withdraw),
            failed(StepKind::Withdraw, FailureKind::InsufficientFunds),
        ]);

        assert_eq!(saga.state(), TransferState::Aborted);
        assert!(matches!(
            saga.next_step(),
            NextAction::Close(TransferEvent::TransferAborted { .. })
        ));
        assert!(matches!(
            saga.outcome(),
            Some(Err(RunFailure::WithdrawFailed(_)))
        ));
    }

    #[test]
    fn test_double_failure_requires_manual_intervention() {
        let saga = replay(vec![
            started(),
            completed(StepKind::Withdraw, "W-0001"),
            failed(StepKind::Deposit, FailureKind::InvalidAccount),
            failed(StepKind::Refund, FailureKind::Unavailable),
        ]);

        assert_eq!(saga.state(), TransferState::DoubleFailure);
        assert!(matches!(
            saga.next_step(),
            NextAction::Close(TransferEvent::ManualInterventionRequired { .. })
        ));
        assert_eq!(
            saga.failure(StepKind::Refund).map(|f| f.kind),
            Some(FailureKind::Unavailable)
        );
    }

    #[test]
    fn test_closed_saga_is_finished() {
        let saga = replay(vec![
            started(),
            completed(StepKind::Withdraw, "W-0001"),
            failed(StepKind::Deposit, FailureKind::InvalidAccount),
            completed(StepKind::Refund, "D-0002"),
            TransferEvent::TransferCompensated,
        ]);

        assert!(saga.is_closed());
        assert_eq!(saga.next_step(), NextAction::Finished);
        assert!(matches!(
            saga.outcome(),
            Some(Ok(SagaOutcome::CompensatedFailure { .. }))
        ));
    }

    #[test]
    fn test_cancel_mid_deposit_never_refunds() {
        let saga = replay(vec![
            started(),
            completed(StepKind::Withdraw, "W-0001"),
            scheduled(StepKind::Deposit),
            TransferEvent::TransferCancelled,
        ]);

        assert_eq!(saga.state(), TransferState::Cancelled);
        assert!(saga.is_closed());
        assert_eq!(saga.in_flight(), None);
        assert_eq!(saga.next_step(), NextAction::Finished);
        assert_eq!(saga.outcome(), Some(Err(RunFailure::Cancelled)));
    }

    #[test]
    fn test_out_of_order_event_is_ignored() {
        let mut saga = replay(vec![started()]);
        saga.apply(completed(StepKind::Deposit, "D-0001"));

        assert_eq!(saga.state(), TransferState::Withdrawing);
        assert!(saga.transaction_id(StepKind::Deposit).is_none());
        assert!(saga.check(&completed(StepKind::Deposit, "D-0001")).is_err());
        assert!(saga.check(&completed(StepKind::Withdraw, "W-0001")).is_ok());
    }

    #[test]
    fn test_replay_is_deterministic() {
        let events = vec![
            started(),
            scheduled(StepKind::Withdraw),
            completed(StepKind::Withdraw, "W-0001"),
            scheduled(StepKind::Deposit),
            failed(StepKind::Deposit, FailureKind::Timeout),
        ];
        assert_eq!(replay(events.clone()), replay(events));
    }
}
