use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

use crate::{HistoryError, Namespace, RunId, WorkflowId};

/// Unique identifier for a recorded history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of an event within a run's history.
///
/// An empty run is at sequence 0; the first recorded event has sequence 1
/// and each following event increments it by one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(u64);

impl Sequence {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The sequence of a run with no events.
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded fact in the history of a run.
///
/// The payload is stored as JSON so the store stays agnostic of the saga's
/// event types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: EventId,
    pub run_id: RunId,
    pub namespace: Namespace,
    pub workflow_id: WorkflowId,
    pub sequence: Sequence,
    /// Event type name (e.g. "StepCompleted").
    pub event_type: String,
    pub recorded_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl HistoryEvent {
    pub fn builder() -> HistoryEventBuilder {
        HistoryEventBuilder::default()
    }

    /// Deserializes the payload into a typed event.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Builder for [`HistoryEvent`].
#[derive(Debug, Default)]
pub struct HistoryEventBuilder {
    run_id: Option<RunId>,
    namespace: Option<Namespace>,
    workflow_id: Option<WorkflowId>,
    sequence: Option<Sequence>,
    event_type: Option<String>,
    recorded_at: Option<DateTime<Utc>>,
    payload: Option<serde_json::Value>,
}

impl HistoryEventBuilder {
    pub fn run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn namespace(mut self, namespace: Namespace) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn workflow_id(mut self, workflow_id: WorkflowId) -> Self {
        self.workflow_id = Some(workflow_id);
        self
    }

    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the recording time. Defaults to now.
    pub fn recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Builds the event, failing if a required field is missing.
    pub fn build(self) -> Result<HistoryEvent, HistoryError> {
        fn missing(field: &str) -> HistoryError {
            HistoryError::InvalidAppend(format!("history event is missing `{field}`"))
        }

        Ok(HistoryEvent {
            event_id: EventId::new(),
            run_id: self.run_id.ok_or_else(|| missing("run_id"))?,
            namespace: self.namespace.ok_or_else(|| missing("namespace"))?,
            workflow_id: self.workflow_id.ok_or_else(|| missing("workflow_id"))?,
            sequence: self.sequence.ok_or_else(|| missing("sequence"))?,
            event_type: self.event_type.ok_or_else(|| missing("event_type"))?,
            recorded_at: self.recorded_at.unwrap_or_else(Utc::now),
            payload: self.payload.ok_or_else(|| missing("payload"))?,
        })
    }
}
