//! Durable history of saga runs.
//!
//! Every decision the orchestrator makes is recorded here before it acts on
//! it, so a run can be rebuilt by replaying its events after a crash.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::{Namespace, RunId, WorkflowId};
pub use error::{HistoryError, Result};
pub use event::{EventId, HistoryEvent, HistoryEventBuilder, Sequence};
pub use memory::InMemoryHistoryStore;
pub use store::{ExpectedSequence, HistoryStore, RunSummary};
