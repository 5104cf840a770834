//! Drives a single transfer run from its history.

use common::{Namespace, RunId, WorkflowId};
use domain::{Aggregate, DomainEvent, PaymentDetails};
use history::{ExpectedSequence, HistoryError, HistoryEvent, HistoryStore, RunSummary, Sequence};

use crate::aggregate::{NextAction, TransferSaga};
use crate::error::{Result, SagaError};
use crate::events::TransferEvent;
use crate::outcome::RunOutcome;
use crate::state::TransferState;
use crate::worker::TransferWorker;

/// Runs transfers as a replayable state machine.
///
/// Every decision is taken from the saga rebuilt out of history, and every
/// step result is recorded before the next step starts. After a crash,
/// calling [`TransferOrchestrator::run`] again picks up at the first step
/// without a recorded result. That step may execute twice, which the steps'
/// idempotency keys absorb.
pub struct TransferOrchestrator<S: HistoryStore> {
    store: S,
    worker: TransferWorker,
}

impl<S: HistoryStore> TransferOrchestrator<S> {
    pub fn new(store: S, worker: TransferWorker) -> Self {
        Self { store, worker }
    }

    pub fn namespace(&self) -> &Namespace {
        self.worker.namespace()
    }

    pub fn worker(&self) -> &TransferWorker {
        &self.worker
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records the start of a run. Does not execute anything.
    #[tracing::instrument(skip(self, details), fields(namespace = %self.namespace()))]
    pub async fn begin(&self, workflow_id: WorkflowId, details: PaymentDetails) -> Result<RunId> {
        if self
            .store
            .find_run(self.namespace(), &workflow_id)
            .await?
            .is_some()
        {
            return Err(SagaError::WorkflowAlreadyStarted(workflow_id));
        }

        let run_id = RunId::new();
        let event = TransferEvent::started(
            run_id,
            workflow_id.clone(),
            self.namespace().clone(),
            details,
        );
        let envelope = envelope(
            run_id,
            &workflow_id,
            self.namespace(),
            Sequence::empty().next(),
            &event,
        )?;
        self.store
            .append(vec![envelope], ExpectedSequence::Empty)
            .await?;

        tracing::info!(%run_id, saga_type = TransferSaga::aggregate_type(), "transfer started");
        Ok(run_id)
    }

    /// Rebuilds a run from history.
    pub async fn load(&self, run_id: RunId) -> Result<TransferSaga> {
        let events = self.store.read_run(run_id).await?;
        if events.is_empty() {
            return Err(SagaError::RunNotFound(run_id));
        }
        TransferSaga::from_history(&events)
    }

    /// Drives the run until it is closed and returns its outcome.
    ///
    /// Safe to call on a run that was interrupted: completed steps are
    /// replayed from history, not executed again.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn run(&self, run_id: RunId) -> Result<RunOutcome> {
        let mut saga = self.load(run_id).await?;

        loop {
            match saga.next_step() {
                NextAction::AwaitStart => return Err(SagaError::RunNotFound(run_id)),
                NextAction::Finished => {
                    return saga.outcome().ok_or(SagaError::RunNotFinished(run_id));
                }
                NextAction::Close(event) => {
                    self.record(&mut saga, event).await?;
                    report_closed(&saga);
                }
                NextAction::Execute { step, resumed } => {
                    let details = saga
                        .details()
                        .cloned()
                        .ok_or(SagaError::RunNotFound(run_id))?;

                    if resumed {
                        tracing::info!(%step, "re-executing step that was in flight");
                    } else {
                        let attempt_budget = self.worker.options().retry_policy.attempt_budget();
                        self.record(
                            &mut saga,
                            TransferEvent::StepScheduled {
                                step,
                                attempt_budget,
                            },
                        )
                        .await?;
                    }

                    let report = self.worker.execute(step, &details).await?;
                    match &report.result {
                        Ok(transaction_id) => tracing::info!(
                            %step,
                            %transaction_id,
                            attempts = report.attempts,
                            "step completed"
                        ),
                        Err(failure) => tracing::warn!(
                            %step,
                            error = %failure,
                            attempts = report.attempts,
                            "step failed"
                        ),
                    }
                    self.record(
                        &mut saga,
                        TransferEvent::step_result(step, report.result, report.attempts),
                    )
                    .await?;
                }
            }
        }
    }

    /// Reads the outcome of a closed run.
    pub async fn outcome(&self, run_id: RunId) -> Result<RunOutcome> {
        let saga = self.load(run_id).await?;
        if !saga.is_closed() {
            return Err(SagaError::RunNotFinished(run_id));
        }
        saga.outcome().ok_or(SagaError::RunNotFinished(run_id))
    }

    /// Records the cancellation of a live run.
    ///
    /// The caller must have stopped whatever task was driving the run. The
    /// in-flight step, if any, is abandoned and no refund is attempted.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn cancel(&self, run_id: RunId) -> Result<()> {
        loop {
            let mut saga = self.load(run_id).await?;

            if saga.state().is_terminal() {
                // Terminal but unclosed: the driver stopped right before
                // recording the closing event.
                if let NextAction::Close(event) = saga.next_step() {
                    self.record(&mut saga, event).await?;
                    report_closed(&saga);
                }
                return Err(SagaError::AlreadyFinished(run_id));
            }

            let abandoned = saga.in_flight();
            match self.record(&mut saga, TransferEvent::TransferCancelled).await {
                Err(SagaError::History(HistoryError::SequenceConflict { .. })) => continue,
                Err(err) => return Err(err),
                Ok(()) => {
                    tracing::info!(abandoned_step = ?abandoned, "transfer cancelled");
                    report_closed(&saga);
                    return Ok(());
                }
            }
        }
    }

    /// Looks up the run started for a workflow ID.
    pub async fn find_run(&self, workflow_id: &WorkflowId) -> Result<RunId> {
        self.store
            .find_run(self.namespace(), workflow_id)
            .await?
            .ok_or_else(|| SagaError::WorkflowNotFound(workflow_id.clone()))
    }

    pub async fn history(&self, run_id: RunId) -> Result<Vec<HistoryEvent>> {
        let events = self.store.read_run(run_id).await?;
        if events.is_empty() {
            return Err(SagaError::RunNotFound(run_id));
        }
        Ok(events)
    }

    /// Runs in this namespace that have not recorded a terminal event.
    pub async fn incomplete_runs(&self) -> Result<Vec<RunSummary>> {
        let mut incomplete = Vec::new();
        for summary in self.store.list_runs(self.namespace()).await? {
            if !self.load(summary.run_id).await?.is_closed() {
                incomplete.push(summary);
            }
        }
        Ok(incomplete)
    }

    /// Appends an event to the run's history, then applies it.
    async fn record(&self, saga: &mut TransferSaga, event: TransferEvent) -> Result<()> {
        saga.check(&event)?;

        let (Some(run_id), Some(workflow_id), Some(namespace)) =
            (saga.run_id(), saga.workflow_id(), saga.namespace())
        else {
            return Err(HistoryError::InvalidAppend(
                "run has no TransferStarted event".to_string(),
            )
            .into());
        };

        let expected = saga.sequence();
        let sequence = expected.next();
        let envelope = envelope(run_id, workflow_id, namespace, sequence, &event)?;
        self.store
            .append(vec![envelope], ExpectedSequence::Exactly(expected))
            .await?;

        tracing::debug!(%run_id, %sequence, event_type = event.event_type(), "event recorded");
        saga.apply(event);
        saga.set_sequence(sequence);
        Ok(())
    }
}

fn envelope(
    run_id: RunId,
    workflow_id: &WorkflowId,
    namespace: &Namespace,
    sequence: Sequence,
    event: &TransferEvent,
) -> Result<HistoryEvent> {
    Ok(HistoryEvent::builder()
        .run_id(run_id)
        .workflow_id(workflow_id.clone())
        .namespace(namespace.clone())
        .sequence(sequence)
        .event_type(event.event_type())
        .payload(event)?
        .build()?)
}

fn report_closed(saga: &TransferSaga) {
    let workflow_id = saga.workflow_id().map(WorkflowId::as_str).unwrap_or_default();

    match saga.state() {
        TransferState::Completed => {
            metrics::counter!("transfer_completed_total").increment(1);
            tracing::info!(workflow_id, "transfer completed");
        }
        TransferState::CompensatedFailure => {
            metrics::counter!("transfer_compensated_total").increment(1);
            tracing::warn!(workflow_id, "deposit failed, money returned to source account");
        }
        TransferState::DoubleFailure => {
            metrics::counter!("transfer_double_failures_total").increment(1);
            tracing::error!(
                workflow_id,
                manual_intervention = true,
                deposit_error = ?saga.failure(crate::failure::StepKind::Deposit),
                refund_error = ?saga.failure(crate::failure::StepKind::Refund),
                "deposit and refund both failed, source account must be corrected by hand"
            );
        }
        TransferState::Aborted => {
            metrics::counter!("transfer_aborted_total").increment(1);
            tracing::warn!(workflow_id, "withdraw failed, transfer aborted");
        }
        TransferState::Cancelled => {
            metrics::counter!("transfer_cancelled_total").increment(1);
        }
        state => tracing::debug!(workflow_id, %state, "run closed in non-terminal state"),
    }
}
