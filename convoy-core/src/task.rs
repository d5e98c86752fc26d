//! Remote task handles, payloads and run outcomes.

use crate::{ConvoyError, Entity, NicRecord, NodeId, RunId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A rule as returned by the rule-resolution service. Opaque to the core.
pub type Rule = Value;

// ============================================================================
// STAGE OUTCOME
// ============================================================================

/// Output of one orchestration stage together with its human-readable summary.
///
/// Stages return `ConvoyResult<Stage<T>>`: `Err` is a fatal error, `Ok` with
/// `noop == true` means there was nothing to do.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage<T> {
    pub value: T,
    pub summary: String,
    pub noop: bool,
}

impl<T> Stage<T> {
    /// A stage that did work.
    pub fn done(value: T, summary: impl Into<String>) -> Self {
        Self {
            value,
            summary: summary.into(),
            noop: false,
        }
    }

    /// A stage that had nothing to do.
    pub fn noop(value: T, summary: impl Into<String>) -> Self {
        Self {
            value,
            summary: summary.into(),
            noop: true,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stage<U> {
        Stage {
            value: f(self.value),
            summary: self.summary,
            noop: self.noop,
        }
    }
}

// ============================================================================
// TASK STATUS AND HANDLE
// ============================================================================

/// Orchestrator-side state of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Complete,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// `(node, task)` pair used to poll a dispatched operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskHandle {
    pub node_id: NodeId,
    pub task_id: TaskId,
    pub status: TaskStatus,
}

impl TaskHandle {
    /// A freshly dispatched, pending handle.
    pub fn pending(node_id: impl Into<NodeId>, task_id: impl Into<TaskId>) -> Self {
        Self {
            node_id: node_id.into(),
            task_id: task_id.into(),
            status: TaskStatus::Pending,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }
}

/// One observation of a remote task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskState {
    pub status: TaskStatus,
    /// State payload a completed task may carry (e.g. latest node state)
    pub auxiliary: Option<Value>,
}

impl TaskState {
    pub fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            auxiliary: None,
        }
    }

    pub fn complete(auxiliary: Option<Value>) -> Self {
        Self {
            status: TaskStatus::Complete,
            auxiliary,
        }
    }

    pub fn failed() -> Self {
        Self {
            status: TaskStatus::Failed,
            auxiliary: None,
        }
    }
}

// ============================================================================
// OPERATIONS AND PAYLOADS
// ============================================================================

/// Operation submitted to a node's task endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOperation {
    /// Push firewall rules and remote entity data
    FirewallUpdate,
    /// Push NIC tag changes
    NicUpdate,
    /// Any other endpoint below `/targets/{node}/`
    Custom(String),
}

impl TaskOperation {
    /// Path segment below `/targets/{node}/`.
    pub fn path(&self) -> &str {
        match self {
            Self::FirewallUpdate => "fw/update",
            Self::NicUpdate => "nics/update",
            Self::Custom(path) => path.trim_matches('/'),
        }
    }
}

/// Firewall data carried by a task payload or a provisioning request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_entities: Vec<Entity>,
}

impl FirewallData {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.remote_entities.is_empty()
    }
}

/// Body of a task submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub run_id: RunId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_entities: Option<Vec<Entity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nics: Option<Vec<NicRecord>>,
}

impl TaskPayload {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            rules: None,
            remote_entities: None,
            nics: None,
        }
    }

    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_remote_entities(mut self, entities: Vec<Entity>) -> Self {
        self.remote_entities = Some(entities);
        self
    }

    pub fn with_nics(mut self, nics: Vec<NicRecord>) -> Self {
        self.nics = Some(nics);
        self
    }
}

// ============================================================================
// ORCHESTRATION RESULT
// ============================================================================

/// Aggregated outcome of polling every handle of a run.
///
/// Any failed handle marks the whole result failed (`error` is set) while the
/// successes already recorded are kept.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrchestrationResult {
    pub succeeded: Vec<TaskHandle>,
    pub failed: Vec<TaskHandle>,
    /// First failure observed
    pub error: Option<ConvoyError>,
    /// Auxiliary state returned by completed tasks, per node
    pub observed_state: BTreeMap<NodeId, Value>,
    pub summary: String,
}

impl OrchestrationResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Total number of handles accounted for.
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Convert into a `Result`, surfacing the recorded error.
    pub fn into_result(self) -> Result<Self, ConvoyError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self),
        }
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{new_run_id, TaskError};
    use serde_json::json;

    #[test]
    fn test_task_status_terminal() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn test_task_operation_paths() {
        assert_eq!(TaskOperation::FirewallUpdate.path(), "fw/update");
        assert_eq!(TaskOperation::NicUpdate.path(), "nics/update");
        assert_eq!(TaskOperation::Custom("/vm/reboot/".to_string()).path(), "vm/reboot");
    }

    #[test]
    fn test_payload_serialization_omits_absent_fields() {
        let run_id = new_run_id();
        let payload = TaskPayload::new(run_id).with_rules(vec![json!({"rule": "allow"})]);
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["runId"], json!(run_id.to_string()));
        assert_eq!(value["rules"], json!([{"rule": "allow"}]));
        assert!(value.get("remoteEntities").is_none());
        assert!(value.get("nics").is_none());
    }

    #[test]
    fn test_firewall_data_empty() {
        assert!(FirewallData::default().is_empty());
        let data = FirewallData {
            rules: vec![json!("r")],
            remote_entities: vec![],
        };
        assert!(!data.is_empty());
    }

    #[test]
    fn test_stage_map_keeps_summary() {
        let stage = Stage::noop(1, "nothing").map(|v| v + 1);
        assert_eq!(stage.value, 2);
        assert!(stage.noop);
        assert_eq!(stage.summary, "nothing");
    }

    #[test]
    fn test_orchestration_result_into_result() {
        let ok = OrchestrationResult::default();
        assert!(ok.clone().into_result().is_ok());

        let failed = OrchestrationResult {
            failed: vec![TaskHandle::pending("n3", "t3").with_status(TaskStatus::Failed)],
            error: Some(
                TaskError::Failed {
                    task_id: "t3".to_string(),
                    node_id: "n3".to_string(),
                }
                .into(),
            ),
            ..Default::default()
        };
        assert!(!failed.is_success());
        assert_eq!(failed.total(), 1);
        assert!(failed.into_result().is_err());
    }
}
