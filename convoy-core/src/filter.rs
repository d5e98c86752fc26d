//! Typed predicate tree for inventory queries
//!
//! Predicates are combined as a tree of AND/OR/NOT nodes over identifier,
//! attribute and owner leaves. The tree is serialized to the inventory's
//! LDAP-style filter syntax only at the edge, and can also be evaluated in
//! memory against an [`Entity`].

use crate::{Entity, EntityId, OwnerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

/// A query predicate over inventory entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Entity has this identifier
    Identifier { id: EntityId },
    /// Entity carries the attribute, optionally with a specific value
    Attribute { name: String, value: Option<Value> },
    /// Entity belongs to this owner
    Owner { id: OwnerId },
    /// Every child holds
    And { children: Vec<Predicate> },
    /// At least one child holds
    Or { children: Vec<Predicate> },
    /// The child does not hold
    Not { child: Box<Predicate> },
}

impl Predicate {
    pub fn identifier(id: impl Into<EntityId>) -> Self {
        Self::Identifier { id: id.into() }
    }

    pub fn attribute(name: impl Into<String>, value: Option<Value>) -> Self {
        Self::Attribute {
            name: name.into(),
            value,
        }
    }

    pub fn owner(id: impl Into<OwnerId>) -> Self {
        Self::Owner { id: id.into() }
    }

    pub fn negate(self) -> Self {
        Self::Not {
            child: Box::new(self),
        }
    }

    /// Disjunction of `preds`. A single predicate is returned unwrapped and
    /// an empty input yields `None`.
    pub fn any(preds: impl IntoIterator<Item = Predicate>) -> Option<Self> {
        Self::combine(preds, |children| Self::Or { children })
    }

    /// Conjunction of `preds`, with the same collapsing rules as [`Predicate::any`].
    pub fn all(preds: impl IntoIterator<Item = Predicate>) -> Option<Self> {
        Self::combine(preds, |children| Self::And { children })
    }

    fn combine(
        preds: impl IntoIterator<Item = Predicate>,
        wrap: impl FnOnce(Vec<Predicate>) -> Self,
    ) -> Option<Self> {
        let mut children: Vec<Predicate> = preds.into_iter().collect();
        match children.len() {
            0 => None,
            1 => children.pop(),
            _ => Some(wrap(children)),
        }
    }

    /// Evaluate the predicate against an entity.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::Identifier { id } => entity.identifier == *id,
            Self::Attribute { name, value } => match (entity.attributes.get(name), value) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(actual), Some(expected)) => {
                    actual == expected || value_text(actual) == value_text(expected)
                }
            },
            Self::Owner { id } => entity.owner_id == *id,
            Self::And { children } => children.iter().all(|c| c.matches(entity)),
            Self::Or { children } => children.iter().any(|c| c.matches(entity)),
            Self::Not { child } => !child.matches(entity),
        }
    }

    /// Serialize to the inventory filter syntax, e.g.
    /// `(&(owner_uuid=o1)(|(tags=*role=*)(uuid=v1)))`.
    ///
    /// Attribute leaves become substring matches over the tag text, so the
    /// inventory may return a superset of what [`Predicate::matches`] accepts
    /// (`role=db` also selects `role=dba`). Callers re-check fetched entities
    /// with [`Predicate::matches`].
    pub fn to_filter(&self) -> String {
        let mut out = String::new();
        self.write_filter(&mut out);
        out
    }

    fn write_filter(&self, out: &mut String) {
        match self {
            Self::Identifier { id } => {
                let _ = write!(out, "(uuid={})", escape(id));
            }
            Self::Attribute { name, value: None } => {
                let _ = write!(out, "(tags=*{}=*)", escape(name));
            }
            Self::Attribute {
                name,
                value: Some(value),
            } => {
                let _ = write!(
                    out,
                    "(tags=*{}={}*)",
                    escape(name),
                    escape(&value_text(value))
                );
            }
            Self::Owner { id } => {
                let _ = write!(out, "(owner_uuid={})", escape(id));
            }
            Self::And { children } => write_group(out, '&', children),
            Self::Or { children } => write_group(out, '|', children),
            Self::Not { child } => {
                out.push_str("(!");
                child.write_filter(out);
                out.push(')');
            }
        }
    }
}

fn write_group(out: &mut String, op: char, children: &[Predicate]) {
    out.push('(');
    out.push(op);
    for child in children {
        child.write_filter(out);
    }
    out.push(')');
}

/// Strings compare by content, everything else by its JSON text.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// RFC 4515 escaping of filter metacharacters.
fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '*' => out.push_str("\\2a"),
            '(' => out.push_str("\\28"),
            ')' => out.push_str("\\29"),
            '\\' => out.push_str("\\5c"),
            '\0' => out.push_str("\\00"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// INVENTORY QUERY
// ============================================================================

/// A list request against the inventory service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryQuery {
    /// `None` lists every entity
    pub filter: Option<Predicate>,
    /// Ask for auxiliary per-entity detail
    pub extras: bool,
}

impl InventoryQuery {
    pub fn new(filter: Option<Predicate>) -> Self {
        Self {
            filter,
            extras: true,
        }
    }

    /// Serialized filter text, if any.
    pub fn filter_text(&self) -> Option<String> {
        self.filter.as_ref().map(Predicate::to_filter)
    }
}

// ============================================================================
// UNIT TESTS
// ============================================================================
