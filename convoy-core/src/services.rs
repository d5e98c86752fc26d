//! Async traits over the remote services.
//!
//! Orchestration code depends only on these traits. `convoy-clients` provides
//! the HTTP implementations and `convoy-test-utils` the in-memory mocks.

use crate::{
    ConvoyResult, Entity, EntityId, InventoryQuery, NicRecord, OwnerId, Rule, TaskId,
    TaskOperation, TaskPayload, TaskState,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Entity inventory.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// List every entity matching the query.
    async fn list_entities(&self, query: &InventoryQuery) -> ConvoyResult<Vec<Entity>>;
}

/// Asynchronous task API exposed per node.
#[async_trait]
pub trait TaskService: Send + Sync {
    /// Submit an operation to a node, returning the remote task id.
    async fn submit(
        &self,
        node_id: &str,
        operation: &TaskOperation,
        payload: &TaskPayload,
    ) -> ConvoyResult<TaskId>;

    /// Current state of a task.
    async fn task_status(&self, task_id: &str) -> ConvoyResult<TaskState>;

    /// Ask the node to refresh its state from scratch.
    async fn refresh_node(&self, node_id: &str) -> ConvoyResult<()>;

    /// Publish state already observed for the node.
    async fn push_node_state(&self, node_id: &str, state: &Value) -> ConvoyResult<()>;
}

/// Rule resolution service.
#[async_trait]
pub trait RuleService: Send + Sync {
    async fn resolve(&self, request: &ResolveRequest) -> ConvoyResult<ResolveResponse>;
}

/// NIC inventory.
#[async_trait]
pub trait NicService: Send + Sync {
    /// NICs belonging to a node.
    async fn list_nics(&self, node_id: &str) -> ConvoyResult<Vec<NicRecord>>;

    async fn update_nic(&self, nic: &NicRecord) -> ConvoyResult<()>;

    async fn delete_nic(&self, mac: &str) -> ConvoyResult<()>;
}

// ============================================================================
// RULE SERVICE WIRE TYPES
// ============================================================================

/// Body of `POST /resolve`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub addresses: Vec<String>,
    pub owner_id: OwnerId,
    pub attribute_delta: BTreeMap<String, Value>,
    pub entity_ids: Vec<EntityId>,
}

/// Response of `POST /resolve`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Entities the rules reference explicitly
    #[serde(default)]
    pub entity_ids: Vec<EntityId>,
    /// Attribute names the rules reference
    #[serde(default)]
    pub attribute_names: Vec<String>,
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
    /// A rule references every entity
    #[serde(default)]
    pub all_entities: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_request_is_camel_case() {
        let request = ResolveRequest {
            addresses: vec!["10.0.0.1".to_string()],
            owner_id: "o1".to_string(),
            attribute_delta: BTreeMap::from([("role".to_string(), json!("web"))]),
            entity_ids: vec!["v1".to_string()],
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "addresses": ["10.0.0.1"],
                "ownerId": "o1",
                "attributeDelta": {"role": "web"},
                "entityIds": ["v1"],
            })
        );
    }

    #[test]
    fn test_resolve_response_defaults_missing_fields() {
        let response: ResolveResponse = serde_json::from_value(json!({"rules": ["r1"]})).unwrap();
        assert_eq!(response.rules, vec![json!("r1")]);
        assert!(response.entity_ids.is_empty());
        assert!(!response.all_entities);
        assert_eq!(response.owner_id, None);
    }
}
