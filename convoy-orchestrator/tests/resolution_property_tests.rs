//! Property-based tests for target resolution

use convoy_core::*;
use convoy_orchestrator::TargetResolver;
use convoy_test_utils::{generators::*, MockInventory};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Unmatched identifiers are exactly the requested ones no entity carries,
    /// and resolution fails precisely when that set is non-empty.
    #[test]
    fn prop_unmatched_is_requested_minus_found(
        fleet in arb_fleet(12),
        extra in prop::collection::btree_set(arb_identifier(), 0..4),
        pick in prop::collection::vec(any::<prop::sample::Index>(), 0..4),
    ) {
        let known: BTreeSet<String> = fleet.iter().map(|e| e.identifier.clone()).collect();
        let mut requested: BTreeSet<String> = pick
            .iter()
            .filter(|_| !fleet.is_empty())
            .map(|i| fleet[i.index(fleet.len())].identifier.clone())
            .collect();
        requested.extend(extra.iter().cloned());
        prop_assume!(!requested.is_empty());
        let expected: Vec<String> = requested.difference(&known).cloned().collect();

        let resolver = TargetResolver::new(Arc::new(MockInventory::new(fleet.clone())));
        let criterion = SelectionCriterion::by_identifiers(requested.iter().cloned());
        let result = block_on(resolver.resolve(&criterion, None));

        if expected.is_empty() {
            let ws = result.unwrap().value;
            let found: BTreeSet<String> = ws.matched_entities.iter().map(|e| e.identifier.clone()).collect();
            prop_assert_eq!(found, requested);
        } else {
            match result {
                Err(ConvoyError::Resolution(ResolutionError::UnknownEntities { ids })) => {
                    prop_assert_eq!(ids, expected);
                }
                other => prop_assert!(false, "expected UnknownEntities, got {:?}", other),
            }
        }
    }

    /// Attribute-only selections never fail, even when nothing matches.
    #[test]
    fn prop_attribute_only_selection_never_errors(
        fleet in arb_fleet(12),
        names in prop::collection::btree_set(arb_attribute_name(), 1..4),
    ) {
        let resolver = TargetResolver::new(Arc::new(MockInventory::new(fleet)));
        let criterion = SelectionCriterion::by_attribute_names(names.iter().cloned());
        let ws = block_on(resolver.resolve(&criterion, None)).unwrap().value;
        for entity in &ws.matched_entities {
            prop_assert!(names.iter().any(|n| entity.attributes.contains_key(n)));
        }
        for name in &ws.unmatched_attributes {
            prop_assert!(ws.matched_entities.iter().all(|e| !e.attributes.contains_key(name)));
        }
    }

    /// An inventory that ignores the filter yields the same working set as one
    /// that applies it.
    #[test]
    fn prop_loose_inventory_resolves_like_strict(
        fleet in arb_fleet(12),
        criterion in arb_criterion(),
    ) {
        let mut criterion = criterion;
        criterion.identifiers.clear();
        prop_assume!(!criterion.is_empty());

        let strict = TargetResolver::new(Arc::new(MockInventory::new(fleet.clone())));
        let loose = TargetResolver::new(Arc::new(MockInventory::new(fleet).ignoring_filter()));
        let expected = block_on(strict.resolve(&criterion, None)).unwrap().value;
        let got = block_on(loose.resolve(&criterion, None)).unwrap().value;
        prop_assert_eq!(got, expected);
    }

    /// Every matched entity's node is in the node set and vice versa.
    #[test]
    fn prop_node_set_covers_matched_entities(fleet in arb_fleet(12)) {
        let resolver = TargetResolver::new(Arc::new(MockInventory::new(fleet)));
        let ws = block_on(resolver.resolve(&SelectionCriterion::all(), None)).unwrap().value;
        let nodes: BTreeSet<String> = ws.matched_entities.iter().map(|e| e.node_id.clone()).collect();
        prop_assert_eq!(nodes, ws.matched_node_ids);
    }
}
