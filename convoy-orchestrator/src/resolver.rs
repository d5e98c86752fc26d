//! Target resolution: turn a [`SelectionCriterion`] into a [`WorkingSet`].

use convoy_core::{
    ConvoyError, ConvoyResult, Entity, InventoryQuery, InventoryService, Predicate,
    ResolutionError, SelectionCriterion, Stage, WorkingSet,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves selection criteria against the inventory service.
#[derive(Clone)]
pub struct TargetResolver {
    inventory: Arc<dyn InventoryService>,
}

impl TargetResolver {
    pub fn new(inventory: Arc<dyn InventoryService>) -> Self {
        Self { inventory }
    }

    /// Resolve `criterion`, reusing entities from an optional `known` snapshot.
    ///
    /// Identifiers present in the snapshot are not fetched again. Snapshot
    /// entities matching the criterion take precedence over fetched copies.
    /// Fetched entities are re-checked against the criterion since the
    /// inventory filter is looser than [`Predicate::matches`]. Requested
    /// identifiers that match nothing fail the whole resolution; attributes
    /// that match nothing are only logged.
    pub async fn resolve(
        &self,
        criterion: &SelectionCriterion,
        known: Option<&[Entity]>,
    ) -> ConvoyResult<Stage<WorkingSet>> {
        if criterion.is_empty() {
            return Ok(Stage::noop(WorkingSet::default(), "No entities or attributes to resolve"));
        }

        let known = known.unwrap_or_default();
        let known_ids: BTreeSet<&str> = known.iter().map(|e| e.identifier.as_str()).collect();
        let pending_ids: BTreeSet<&str> = criterion
            .identifiers
            .iter()
            .map(String::as_str)
            .filter(|id| !known_ids.contains(id))
            .collect();

        let full = criterion_predicate(criterion);
        let selects = |e: &Entity| full.as_ref().map_or(true, |p| p.matches(e));
        let mut matched: Vec<Entity> = known.iter().filter(|e| selects(*e)).cloned().collect();
        let mut seen: BTreeSet<String> = matched.iter().map(|e| e.identifier.clone()).collect();

        match build_query(criterion, &pending_ids) {
            Some(query) => {
                debug!(filter = ?query.filter_text(), "querying inventory");
                let fetched = self.inventory.list_entities(&query).await?;
                info!(count = fetched.len(), filter = ?query.filter_text(), "found entities");
                for entity in fetched {
                    if !selects(&entity) {
                        debug!(identifier = %entity.identifier, "discarding entity outside the selection");
                        continue;
                    }
                    if seen.insert(entity.identifier.clone()) {
                        matched.push(entity);
                    }
                }
            }
            None => debug!("every requested entity is already known; skipping inventory query"),
        }

        let mut working_set = WorkingSet::from_entities(matched);
        let found: BTreeSet<&str> = working_set
            .matched_entities
            .iter()
            .map(|e| e.identifier.as_str())
            .collect();
        working_set.unmatched_identifiers = criterion
            .identifiers
            .iter()
            .filter(|id| !found.contains(id.as_str()))
            .cloned()
            .collect();
        working_set.unmatched_attributes = criterion
            .attributes
            .iter()
            .filter(|(name, value)| {
                let wanted = Predicate::attribute(name.as_str(), (**value).clone());
                !working_set.matched_entities.iter().any(|e| wanted.matches(e))
            })
            .map(|(name, _)| name.clone())
            .collect();

        if !working_set.unmatched_identifiers.is_empty() {
            return Err(ConvoyError::Resolution(ResolutionError::UnknownEntities {
                ids: working_set.unmatched_identifiers.iter().cloned().collect(),
            }));
        }

        if !working_set.unmatched_attributes.is_empty() {
            let names: Vec<&str> = working_set.unmatched_attributes.iter().map(String::as_str).collect();
            info!(attributes = ?names, "No entities with attributes: {}", names.join(", "));
        }

        let summary = format!(
            "Matched {} {} on {} {}",
            working_set.matched_entities.len(),
            plural(working_set.matched_entities.len(), "entity", "entities"),
            working_set.matched_node_ids.len(),
            plural(working_set.matched_node_ids.len(), "node", "nodes"),
        );
        info!(nodes = ?working_set.matched_node_ids, "{}", summary);
        Ok(Stage::done(working_set, summary))
    }
}

fn plural<'a>(count: usize, one: &'a str, many: &'a str) -> &'a str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// Selection leaves for the criterion: attributes first, then identifiers.
fn selection_leaves<'a>(
    criterion: &SelectionCriterion,
    ids: impl Iterator<Item = &'a str>,
) -> Vec<Predicate> {
    criterion
        .attributes
        .iter()
        .map(|(name, value)| Predicate::attribute(name.clone(), value.clone()))
        .chain(ids.map(Predicate::identifier))
        .collect()
}

/// Narrow `selection` to the criterion's owner, if any.
fn with_owner(criterion: &SelectionCriterion, selection: Option<Predicate>) -> Option<Predicate> {
    let owner = criterion.owner_id.as_ref().map(|o| Predicate::owner(o.clone()));
    Predicate::all(owner.into_iter().chain(selection))
}

/// The predicate an entity must satisfy to belong to the criterion.
/// `None` selects everything.
pub fn criterion_predicate(criterion: &SelectionCriterion) -> Option<Predicate> {
    let selection = if criterion.all {
        None
    } else {
        Predicate::any(selection_leaves(
            criterion,
            criterion.identifiers.iter().map(String::as_str),
        ))
    };
    with_owner(criterion, selection)
}

/// Inventory query fetching what the criterion still needs, given the
/// identifiers left to fetch. `None` when nothing has to be fetched.
pub fn build_query(criterion: &SelectionCriterion, pending_ids: &BTreeSet<&str>) -> Option<InventoryQuery> {
    if criterion.all {
        return Some(InventoryQuery::new(with_owner(criterion, None)));
    }
    let selection = Predicate::any(selection_leaves(criterion, pending_ids.iter().copied()))?;
    Some(InventoryQuery::new(with_owner(criterion, Some(selection))))
}
