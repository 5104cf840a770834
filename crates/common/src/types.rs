use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a single execution of a transfer saga.
///
/// Assigned by the engine when a run starts. A workflow that is recovered
/// after a crash keeps its run ID, so history can be replayed against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a run ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RunId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Caller-supplied identifier of a transfer workflow (e.g. `pay-invoice-701`).
///
/// Unique within a namespace: submitting the same workflow ID twice is
/// rejected rather than starting a second transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkflowId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkflowId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Logical partition of workflows hosted by one engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    /// The namespace used when none is configured.
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Namespace {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_new_creates_unique_ids() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn test_run_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        assert_eq!(RunId::from_uuid(uuid).as_uuid(), uuid);
    }

    #[test]
    fn test_workflow_id_serializes_as_plain_string() {
        let id = WorkflowId::new("pay-invoice-701");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"pay-invoice-701\"");
        assert_eq!(id.to_string(), "pay-invoice-701");
    }

    #[test]
    fn test_namespace_defaults_to_default() {
        assert_eq!(Namespace::default().as_str(), "default");
    }
}
