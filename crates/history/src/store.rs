use async_trait::async_trait;

use crate::{HistoryError, HistoryEvent, Namespace, Result, RunId, Sequence, WorkflowId};

/// Concurrency expectation for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedSequence {
    /// Append unconditionally.
    Any,
    /// The run must not have any events yet.
    Empty,
    /// The run's last event must be at exactly this sequence.
    Exactly(Sequence),
}

impl ExpectedSequence {
    fn as_sequence(&self) -> Option<Sequence> {
        match self {
            ExpectedSequence::Any => None,
            ExpectedSequence::Empty => Some(Sequence::empty()),
            ExpectedSequence::Exactly(seq) => Some(*seq),
        }
    }

    /// Checks the expectation against the run's current sequence.
    pub fn check(&self, run_id: RunId, actual: Sequence) -> Result<()> {
        match self.as_sequence() {
            Some(expected) if expected != actual => Err(HistoryError::SequenceConflict {
                run_id,
                expected,
                actual,
            }),
            _ => Ok(()),
        }
    }
}

/// Index entry describing one run known to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub workflow_id: WorkflowId,
    pub namespace: Namespace,
    pub last_sequence: Sequence,
    pub last_event_type: String,
}

/// Persistence for run histories.
///
/// Implementations must be safe to share between concurrently executing
/// runs; each run only ever touches its own events.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Appends events to a single run atomically.
    ///
    /// Returns the sequence of the last appended event.
    async fn append(&self, events: Vec<HistoryEvent>, expected: ExpectedSequence)
    -> Result<Sequence>;

    /// Returns the full history of a run in sequence order.
    async fn read_run(&self, run_id: RunId) -> Result<Vec<HistoryEvent>>;

    /// Looks up the run started for a workflow ID within a namespace.
    async fn find_run(&self, namespace: &Namespace, workflow_id: &WorkflowId)
    -> Result<Option<RunId>>;

    /// Lists every run recorded in a namespace.
    async fn list_runs(&self, namespace: &Namespace) -> Result<Vec<RunSummary>>;
}

/// Validates a batch before it is appended.
///
/// All events must belong to the same run and carry consecutive sequences.
pub fn validate_batch(events: &[HistoryEvent]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(HistoryError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected = first.sequence;
    for event in events.iter().skip(1) {
        if event.run_id != first.run_id {
            return Err(HistoryError::InvalidAppend(
                "all events in a batch must belong to the same run".to_string(),
            ));
        }
        expected = expected.next();
        if event.sequence != expected {
            return Err(HistoryError::InvalidAppend(format!(
                "sequences must be consecutive: expected {expected}, got {}",
                event.sequence
            )));
        }
    }

    Ok(())
}
