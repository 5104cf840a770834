//! Core aggregate and domain event traits.

use history::Sequence;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events are facts recorded in a run's history. They are immutable
/// and named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name stored alongside the payload.
    fn event_type(&self) -> &'static str;

    /// Returns true if no further events may follow this one.
    fn is_terminal(&self) -> bool {
        false
    }
}

/// State that is rebuilt by replaying its history.
///
/// `apply` must be pure and deterministic: replaying the same events always
/// yields the same state, which is what makes a run safe to re-execute after
/// a crash.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    /// Sequence of the last event applied.
    fn sequence(&self) -> Sequence;

    fn set_sequence(&mut self, sequence: Sequence);

    /// Applies an event to the aggregate. Must not fail.
    fn apply(&mut self, event: Self::Event);

    /// Applies multiple events in order.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
