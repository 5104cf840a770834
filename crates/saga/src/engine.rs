//! Submission interface: starts runs as tasks and hands out their results.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use common::{Namespace, RunId, WorkflowId};
use domain::PaymentDetails;
use history::{HistoryEvent, HistoryStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::aggregate::TransferSaga;
use crate::error::{Result, SagaError};
use crate::orchestrator::TransferOrchestrator;
use crate::outcome::RunOutcome;
use crate::worker::TransferWorker;

#[derive(Debug, Clone, PartialEq, Eq)]
enum RunSignal {
    Running,
    Finished,
    Crashed(String),
}

struct LiveRun {
    task: JoinHandle<()>,
    signal: Arc<watch::Sender<RunSignal>>,
}

type LiveRuns = Arc<Mutex<HashMap<RunId, LiveRun>>>;

fn lock(live: &LiveRuns) -> MutexGuard<'_, HashMap<RunId, LiveRun>> {
    live.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a submitted run.
pub struct RunHandle<S: HistoryStore> {
    workflow_id: WorkflowId,
    run_id: RunId,
    /// None when the run was not live at the time the handle was created.
    signal: Option<watch::Receiver<RunSignal>>,
    orchestrator: Arc<TransferOrchestrator<S>>,
}

impl<S: HistoryStore> RunHandle<S> {
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Waits for the run to finish and returns its outcome.
    pub async fn result(&self) -> Result<RunOutcome> {
        if let Some(mut signal) = self.signal.clone() {
            // A closed channel means the task went away; history decides.
            let crashed = match signal.wait_for(|s| *s != RunSignal::Running).await {
                Ok(state) => match &*state {
                    RunSignal::Crashed(reason) => Some(reason.clone()),
                    _ => None,
                },
                Err(_) => None,
            };
            if let Some(reason) = crashed {
                return Err(SagaError::RunCrashed {
                    run_id: self.run_id,
                    reason,
                });
            }
        }
        self.orchestrator.outcome(self.run_id).await
    }
}

/// Hosts transfer runs for one namespace.
///
/// Each run executes on its own tokio task; runs share nothing but the
/// history store and the registered steps.
pub struct TransferEngine<S: HistoryStore> {
    orchestrator: Arc<TransferOrchestrator<S>>,
    live: LiveRuns,
    /// Serializes the duplicate check and the start record.
    starting: Arc<tokio::sync::Mutex<()>>,
}

impl<S: HistoryStore> Clone for TransferEngine<S> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            live: Arc::clone(&self.live),
            starting: Arc::clone(&self.starting),
        }
    }
}

impl<S: HistoryStore + 'static> TransferEngine<S> {
    pub fn new(store: S, worker: TransferWorker) -> Self {
        Self {
            orchestrator: Arc::new(TransferOrchestrator::new(store, worker)),
            live: Arc::default(),
            starting: Arc::default(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        self.orchestrator.namespace()
    }

    pub fn orchestrator(&self) -> &TransferOrchestrator<S> {
        &self.orchestrator
    }

    /// Number of runs currently executing.
    pub fn live_runs(&self) -> usize {
        lock(&self.live).len()
    }

    /// Submits a transfer. Fails if the workflow ID is already in use.
    #[tracing::instrument(skip(self, details), fields(namespace = %self.namespace()))]
    pub async fn start(
        &self,
        workflow_id: WorkflowId,
        details: PaymentDetails,
    ) -> Result<RunHandle<S>> {
        let run_id = {
            let _guard = self.starting.lock().await;
            self.orchestrator
                .begin(workflow_id.clone(), details)
                .await?
        };
        metrics::counter!("transfer_runs_total").increment(1);
        Ok(self.spawn(run_id, workflow_id))
    }

    /// Submits a transfer and waits for its outcome.
    pub async fn execute(
        &self,
        workflow_id: WorkflowId,
        details: PaymentDetails,
    ) -> Result<RunOutcome> {
        self.start(workflow_id, details).await?.result().await
    }

    fn spawn(&self, run_id: RunId, workflow_id: WorkflowId) -> RunHandle<S> {
        let (sender, receiver) = watch::channel(RunSignal::Running);
        let sender = Arc::new(sender);

        let span = tracing::info_span!("transfer_run", %workflow_id, %run_id);
        let orchestrator = Arc::clone(&self.orchestrator);
        let live = Arc::clone(&self.live);
        let task_sender = Arc::clone(&sender);

        // Holding the lock across the spawn keeps the task from removing its
        // entry before it is inserted.
        let mut runs = lock(&self.live);
        let task = tokio::spawn(
            async move {
                let started = Instant::now();
                let signal = match orchestrator.run(run_id).await {
                    Ok(_) => RunSignal::Finished,
                    Err(err) => {
                        tracing::error!(error = %err, "run stopped before closing");
                        RunSignal::Crashed(err.to_string())
                    }
                };
                metrics::histogram!("transfer_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                lock(&live).remove(&run_id);
                task_sender.send_replace(signal);
            }
            .instrument(span),
        );
        runs.insert(run_id, LiveRun { task, signal: sender });
        drop(runs);

        RunHandle {
            workflow_id,
            run_id,
            signal: Some(receiver),
            orchestrator: Arc::clone(&self.orchestrator),
        }
    }

    /// Returns a handle for an existing run, live or not.
    pub async fn handle(&self, workflow_id: &WorkflowId) -> Result<RunHandle<S>> {
        let run_id = self.orchestrator.find_run(workflow_id).await?;
        let signal = lock(&self.live)
            .get(&run_id)
            .map(|run| run.signal.subscribe());
        Ok(RunHandle {
            workflow_id: workflow_id.clone(),
            run_id,
            signal,
            orchestrator: Arc::clone(&self.orchestrator),
        })
    }

    /// Waits for a run to finish, or reads its outcome from history.
    pub async fn result(&self, workflow_id: &WorkflowId) -> Result<RunOutcome> {
        self.handle(workflow_id).await?.result().await
    }

    /// Current state of a run, rebuilt from history.
    pub async fn describe(&self, workflow_id: &WorkflowId) -> Result<TransferSaga> {
        let run_id = self.orchestrator.find_run(workflow_id).await?;
        self.orchestrator.load(run_id).await
    }

    pub async fn history(&self, workflow_id: &WorkflowId) -> Result<Vec<HistoryEvent>> {
        let run_id = self.orchestrator.find_run(workflow_id).await?;
        self.orchestrator.history(run_id).await
    }

    /// Stops a run and records its cancellation.
    ///
    /// A step that was in flight is abandoned; the refund never runs.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn cancel(&self, workflow_id: &WorkflowId) -> Result<()> {
        let run_id = self.orchestrator.find_run(workflow_id).await?;

        let live = lock(&self.live).remove(&run_id);
        let signal = match live {
            Some(run) => {
                run.task.abort();
                match run.task.await {
                    Err(err) if !err.is_cancelled() => {
                        tracing::warn!(%run_id, error = %err, "run task failed before cancellation");
                    }
                    _ => {}
                }
                Some(run.signal)
            }
            None => None,
        };

        let result = self.orchestrator.cancel(run_id).await;
        if let Some(signal) = signal {
            signal.send_replace(RunSignal::Finished);
        }
        result
    }

    /// Re-drives every run in the namespace that has not closed.
    ///
    /// Call once at startup, before accepting new submissions.
    #[tracing::instrument(skip(self), fields(namespace = %self.namespace()))]
    pub async fn recover(&self) -> Result<Vec<RunHandle<S>>> {
        let mut handles = Vec::new();
        for summary in self.orchestrator.incomplete_runs().await? {
            if lock(&self.live).contains_key(&summary.run_id) {
                continue;
            }
            tracing::info!(
                run_id = %summary.run_id,
                workflow_id = %summary.workflow_id,
                last_event = %summary.last_event_type,
                "recovering incomplete run"
            );
            metrics::counter!("transfer_recovered_total").increment(1);
            handles.push(self.spawn(summary.run_id, summary.workflow_id));
        }
        Ok(handles)
    }
}
