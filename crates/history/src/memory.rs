use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::{ExpectedSequence, HistoryStore, RunSummary, validate_batch};
use crate::{HistoryError, HistoryEvent, Namespace, Result, RunId, Sequence, WorkflowId};

#[derive(Default)]
struct Inner {
    runs: HashMap<RunId, Vec<HistoryEvent>>,
    /// Insertion order of runs, so listings are stable.
    order: Vec<RunId>,
}

/// In-memory history store.
///
/// Cloning shares the underlying storage, which lets a test "restart" an
/// engine against the same history.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every event after `sequence` for a run.
    ///
    /// Used to simulate a process that crashed before recording the rest of
    /// the run.
    pub async fn truncate(&self, run_id: RunId, sequence: Sequence) {
        if let Some(events) = self.inner.write().await.runs.get_mut(&run_id) {
            events.retain(|e| e.sequence <= sequence);
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(
        &self,
        events: Vec<HistoryEvent>,
        expected: ExpectedSequence,
    ) -> Result<Sequence> {
        validate_batch(&events)?;

        let run_id = events[0].run_id;
        let first_sequence = events[0].sequence;
        let mut inner = self.inner.write().await;

        let current = inner
            .runs
            .get(&run_id)
            .and_then(|run| run.last())
            .map(|e| e.sequence)
            .unwrap_or_default();

        expected.check(run_id, current)?;

        if first_sequence != current.next() {
            return Err(HistoryError::SequenceConflict {
                run_id,
                expected: current.next(),
                actual: first_sequence,
            });
        }

        let last = events
            .last()
            .map(|e| e.sequence)
            .unwrap_or(first_sequence);

        if !inner.runs.contains_key(&run_id) {
            inner.order.push(run_id);
        }
        inner.runs.entry(run_id).or_default().extend(events);

        tracing::trace!(%run_id, sequence = %last, "history appended");
        Ok(last)
    }

    async fn read_run(&self, run_id: RunId) -> Result<Vec<HistoryEvent>> {
        let inner = self.inner.read().await;
        Ok(inner.runs.get(&run_id).cloned().unwrap_or_default())
    }

    async fn find_run(
        &self,
        namespace: &Namespace,
        workflow_id: &WorkflowId,
    ) -> Result<Option<RunId>> {
        let inner = self.inner.read().await;
        Ok(inner.order.iter().copied().find(|run_id| {
            inner.runs[run_id]
                .first()
                .is_some_and(|e| &e.namespace == namespace && &e.workflow_id == workflow_id)
        }))
    }

    async fn list_runs(&self, namespace: &Namespace) -> Result<Vec<RunSummary>> {
        let inner = self.inner.read().await;
        Ok(inner
            .order
            .iter()
            .filter_map(|run_id| {
                let events = &inner.runs[run_id];
                let first = events.first()?;
                let last = events.last()?;
                (&first.namespace == namespace).then(|| RunSummary {
                    run_id: *run_id,
                    workflow_id: first.workflow_id.clone(),
                    namespace: first.namespace.clone(),
                    last_sequence: last.sequence,
                    last_event_type: last.event_type.clone(),
                })
            })
            .collect())
    }
}
