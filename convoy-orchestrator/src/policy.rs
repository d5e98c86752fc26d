//! Rule resolution adapter.
//!
//! Asks the rule service which rules apply to a changing entity and which
//! other entities those rules reference, then shapes the firewall payload
//! for the entity's own node.

use convoy_core::{
    ConvoyResult, Entity, FirewallData, NodeId, ResolveRequest, ResolveResponse, Rule,
    RuleService, SelectionCriterion, Stage, WorkingSet,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether the entity is being created or updated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[default]
    Create,
    Update,
}

/// Attribute changes accompanying an entity change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeContext {
    #[serde(default)]
    pub kind: ChangeKind,
    /// Attributes the entity carries
    #[serde(default)]
    pub current: BTreeMap<String, Value>,
    #[serde(default)]
    pub added: BTreeMap<String, Value>,
    #[serde(default)]
    pub removed: BTreeMap<String, Value>,
}

impl AttributeContext {
    /// `current`, then `removed`, then `added`, folded into one map.
    pub fn delta(&self) -> BTreeMap<String, Value> {
        let mut delta = self.current.clone();
        delta.extend(self.removed.iter().map(|(k, v)| (k.clone(), v.clone())));
        delta.extend(self.added.iter().map(|(k, v)| (k.clone(), v.clone())));
        delta
    }
}

/// Rules applying to an entity and the selection of entities they reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedPolicy {
    pub rules: Vec<Rule>,
    pub referenced: SelectionCriterion,
}

impl From<ResolveResponse> for ResolvedPolicy {
    fn from(response: ResolveResponse) -> Self {
        let referenced = SelectionCriterion {
            identifiers: response.entity_ids.into_iter().collect(),
            attributes: response
                .attribute_names
                .into_iter()
                .map(|name| (name, None))
                .collect(),
            all: response.all_entities,
            owner_id: response.owner_id,
        };
        Self {
            rules: response.rules,
            referenced,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PolicyResolution {
    /// An update touched neither addresses nor attributes
    NothingToResolve,
    Resolved(ResolvedPolicy),
}

/// Firewall data for the changing entity's node and the other nodes to notify.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyPayload {
    /// `None` unless there is at least one rule or one remote entity
    pub firewall: Option<FirewallData>,
    pub target_nodes: BTreeSet<NodeId>,
}

#[derive(Clone)]
pub struct RuleResolver {
    rules: Arc<dyn RuleService>,
}

impl RuleResolver {
    pub fn new(rules: Arc<dyn RuleService>) -> Self {
        Self { rules }
    }

    pub async fn resolve_policy(
        &self,
        entity: &Entity,
        context: &AttributeContext,
    ) -> ConvoyResult<Stage<PolicyResolution>> {
        let request = ResolveRequest {
            addresses: entity.addresses.clone(),
            owner_id: entity.owner_id.clone(),
            attribute_delta: context.delta(),
            entity_ids: vec![entity.identifier.clone()],
        };

        if context.kind == ChangeKind::Update
            && request.addresses.is_empty()
            && request.attribute_delta.is_empty()
        {
            return Ok(Stage::noop(
                PolicyResolution::NothingToResolve,
                "No attributes or addresses updated: not resolving rules",
            ));
        }

        debug!(entity = %entity.identifier, ?request, "resolving rules");
        let response = self.rules.resolve(&request).await?;
        let policy = ResolvedPolicy::from(response);
        info!(
            entity = %entity.identifier,
            rules = policy.rules.len(),
            "rules resolved"
        );
        Ok(Stage::done(PolicyResolution::Resolved(policy), "Rule data retrieved"))
    }
}

/// Shape the resolved policy into a payload for `self_node_id`.
///
/// The node performing the change already knows about its own entities, so
/// they are left out of `remote_entities` and the node itself is dropped from
/// `target_nodes`.
pub fn build_payload(
    policy: &ResolvedPolicy,
    self_node_id: &str,
    working_set: &WorkingSet,
) -> Stage<PolicyPayload> {
    let firewall = FirewallData {
        rules: policy.rules.clone(),
        remote_entities: working_set.entities_not_on(self_node_id).cloned().collect(),
    };
    let target_nodes = working_set
        .matched_node_ids
        .iter()
        .filter(|n| n.as_str() != self_node_id)
        .cloned()
        .collect();

    if firewall.is_empty() {
        debug!(node = self_node_id, "no firewall data for payload");
        Stage::done(
            PolicyPayload {
                firewall: None,
                target_nodes,
            },
            "No firewall data added to payload",
        )
    } else {
        Stage::done(
            PolicyPayload {
                firewall: Some(firewall),
                target_nodes,
            },
            "Added firewall data to payload",
        )
    }
}
