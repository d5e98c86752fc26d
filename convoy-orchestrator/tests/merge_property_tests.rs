//! Property-based tests for the NIC merge workflow and poll aggregation

use convoy_core::*;
use convoy_orchestrator::{apply_nic_updates, PollEngine};
use convoy_test_utils::{fixtures, generators::*, MockTaskService};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

/// NIC records with unique MACs.
fn arb_node_nics() -> impl Strategy<Value = Vec<NicRecord>> {
    prop::collection::vec(arb_nic_record(), 0..8).prop_map(|nics| {
        let mut seen = BTreeSet::new();
        nics.into_iter().filter(|n| seen.insert(n.mac.clone())).collect()
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A single delta applied through the workflow yields the same tag set
    /// as merging it directly.
    #[test]
    fn prop_single_nic_update_matches_merge(
        existing in arb_tag_set(),
        delta in arb_attribute_delta(),
    ) {
        let nic = NicRecord::new("90:b8:d0:00:00:01", existing.iter().cloned());
        let request = NicRecord::new("90:b8:d0:00:00:01", delta.values.iter().cloned());

        let stage = apply_nic_updates(&[nic], &[request], delta.mode);
        prop_assert!(!stage.noop);
        prop_assert_eq!(stage.value.len(), 1);
        prop_assert_eq!(stage.value[0].tag_set(), merge(&existing, &delta));
    }

    /// Merged records are a subset of the node's NICs, each targeted by a
    /// usable delta. Union never loses an existing tag.
    #[test]
    fn prop_nic_updates_only_touch_known_targeted_nics(
        existing in arb_node_nics(),
        deltas in prop::collection::vec(arb_nic_record(), 1..10),
    ) {
        let known: BTreeMap<&str, BTreeSet<String>> =
            existing.iter().map(|n| (n.mac.as_str(), n.tag_set())).collect();
        let targeted: BTreeSet<&str> = deltas
            .iter()
            .filter(|d| d.nic_tags_provided.is_some())
            .map(|d| d.mac.as_str())
            .collect();

        let stage = apply_nic_updates(&existing, &deltas, MergeMode::Union);
        let merged: BTreeSet<&str> = stage.value.iter().map(|n| n.mac.as_str()).collect();
        prop_assert_eq!(merged.len(), stage.value.len());

        for nic in &stage.value {
            let Some(before) = known.get(nic.mac.as_str()) else {
                return Err(TestCaseError::fail(format!("unknown nic {} merged", nic.mac)));
            };
            prop_assert!(targeted.contains(nic.mac.as_str()));
            prop_assert!(nic.tag_set().is_superset(before));
        }
        let expected: BTreeSet<&str> = targeted
            .iter()
            .copied()
            .filter(|mac| known.contains_key(mac))
            .collect();
        prop_assert_eq!(merged, expected);
    }

    /// Every handle lands in exactly one bucket, and the run fails exactly
    /// when some handle failed.
    #[test]
    fn prop_poll_partitions_handles(
        plan in prop::collection::vec((arb_task_status(), any::<bool>()), 0..8),
    ) {
        let tasks = MockTaskService::new();
        let mut handles = Vec::new();
        let mut expected_failed = 0;
        for (i, (status, fails)) in plan.iter().enumerate() {
            let node = format!("n{}", i);
            let task = format!("t{}", i);
            if *status == TaskStatus::Pending {
                let last = if *fails { TaskState::failed() } else { TaskState::complete(None) };
                tasks.insert_task(&node, &task, vec![TaskState::pending(), last]);
            }
            if *status == TaskStatus::Failed || (*status == TaskStatus::Pending && *fails) {
                expected_failed += 1;
            }
            handles.push(TaskHandle::pending(node, task).with_status(*status));
        }

        let engine = PollEngine::new(Arc::new(tasks.clone()), fixtures::fast_poll());
        let result = block_on(engine.poll_all(handles));

        prop_assert_eq!(result.total(), plan.len());
        prop_assert_eq!(result.failed.len(), expected_failed);
        prop_assert_eq!(result.error.is_some(), expected_failed > 0);
        prop_assert_eq!(result.is_success(), expected_failed == 0);
        for (i, (status, _)) in plan.iter().enumerate() {
            let polls = tasks.status_calls(&format!("t{}", i));
            let expected_polls = if *status == TaskStatus::Pending { 2 } else { 0 };
            prop_assert_eq!(polls, expected_polls);
        }
    }
}
