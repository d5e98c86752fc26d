//! Managed entities and the selections that pick them out of an inventory.

use crate::{EntityId, NodeId, OwnerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// ENTITY
// ============================================================================

/// A managed resource (virtual machine, network interface) as projected from
/// the inventory service. The core only reads and republishes these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier within the inventory
    pub identifier: EntityId,
    /// Owner of the entity
    pub owner_id: OwnerId,
    /// Node hosting the entity
    pub node_id: NodeId,
    /// Attribute name -> value, used for tag predicates
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Whether policy enforcement is enabled for this entity
    #[serde(default)]
    pub enabled: bool,
    /// Network addresses, in interface order
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl Entity {
    /// Create an entity with no attributes or addresses.
    pub fn new(
        identifier: impl Into<EntityId>,
        owner_id: impl Into<OwnerId>,
        node_id: impl Into<NodeId>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            owner_id: owner_id.into(),
            node_id: node_id.into(),
            attributes: BTreeMap::new(),
            enabled: false,
            addresses: Vec::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

// ============================================================================
// SELECTION CRITERION
// ============================================================================

/// Declarative selection of entities: explicit identifiers, attribute
/// predicates, or everything, optionally narrowed to one owner.
///
/// Identifier and attribute predicates are alternatives: an entity matches if
/// it satisfies any of them. `all` selects every entity regardless.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriterion {
    #[serde(default)]
    pub identifiers: BTreeSet<EntityId>,
    /// Attribute name -> required value (`None` = attribute present with any value)
    #[serde(default)]
    pub attributes: BTreeMap<String, Option<Value>>,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub owner_id: Option<OwnerId>,
}

impl SelectionCriterion {
    /// Select entities by identifier.
    pub fn by_identifiers<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityId>,
    {
        Self {
            identifiers: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Select entities carrying any of the given attribute names.
    pub fn by_attribute_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: names.into_iter().map(|n| (n.into(), None)).collect(),
            ..Self::default()
        }
    }

    /// Select every entity.
    pub fn all() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Option<Value>) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_identifier(mut self, id: impl Into<EntityId>) -> Self {
        self.identifiers.insert(id.into());
        self
    }

    /// Narrow the selection to a single owner.
    pub fn with_owner(mut self, owner_id: impl Into<OwnerId>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    /// True when nothing is selected: no identifiers, no attribute
    /// predicates and not `all`. The owner narrowing alone selects nothing.
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty() && self.attributes.is_empty() && !self.all
    }
}

// ============================================================================
// WORKING SET
// ============================================================================

/// Result of resolving a [`SelectionCriterion`] against the inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkingSet {
    pub matched_entities: Vec<Entity>,
    pub matched_node_ids: BTreeSet<NodeId>,
    /// Requested identifiers found in no entity
    pub unmatched_identifiers: BTreeSet<EntityId>,
    /// Requested attributes (and values, where given) no matched entity carries
    pub unmatched_attributes: BTreeSet<String>,
}

impl WorkingSet {
    /// Build a working set from matched entities, deriving the node set.
    pub fn from_entities(matched_entities: Vec<Entity>) -> Self {
        let matched_node_ids = matched_entities
            .iter()
            .map(|e| e.node_id.clone())
            .collect();
        Self {
            matched_entities,
            matched_node_ids,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.matched_entities.is_empty()
    }

    /// Matched entities hosted anywhere except `node_id`.
    pub fn entities_not_on<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Entity> + 'a {
        self.matched_entities
            .iter()
            .filter(move |e| e.node_id != node_id)
    }
}

// ============================================================================
// NIC RECORD
// ============================================================================

/// A network interface as held by the NIC inventory. Its attribute set is
/// the list of NIC tags it provides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicRecord {
    pub mac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nic_tags_provided: Option<Vec<String>>,
}

impl NicRecord {
    pub fn new<I, S>(mac: impl Into<String>, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            mac: mac.into(),
            nic_tags_provided: Some(tags.into_iter().map(Into::into).collect()),
        }
    }

    /// Provided tags as a set; a missing list is empty.
    pub fn tag_set(&self) -> BTreeSet<String> {
        self.nic_tags_provided
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
