// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for datadog-operator.
//!
//! Uses proptest to generate random inputs and verify invariants of the
//! merge rules, the component requirement union and the change hashes.

use std::collections::{BTreeMap, HashMap};

use proptest::prelude::*;

use datadog_operator::crd::AgentContainerName;
use datadog_operator::feature::{RequiredComponent, RequiredComponents};
use datadog_operator::hash::generate_md5_for_spec;
use datadog_operator::merger::{MergePolicy, merge_keyed};

fn any_container() -> impl Strategy<Value = AgentContainerName> {
    prop_oneof![
        Just(AgentContainerName::CoreAgent),
        Just(AgentContainerName::TraceAgent),
        Just(AgentContainerName::ProcessAgent),
        Just(AgentContainerName::SecurityAgent),
        Just(AgentContainerName::SystemProbe),
        Just(AgentContainerName::OtelAgent),
        Just(AgentContainerName::ClusterAgent),
        Just(AgentContainerName::ClusterChecksRunner),
    ]
}

fn any_component() -> impl Strategy<Value = RequiredComponent> {
    (
        prop::option::of(any::<bool>()),
        prop::collection::vec(any_container(), 0..4),
    )
        .prop_map(|(is_required, drawn)| {
            let mut containers = Vec::new();
            for c in drawn {
                if !containers.contains(&c) {
                    containers.push(c);
                }
            }
            RequiredComponent {
                is_required,
                containers,
            }
        })
}

fn any_components() -> impl Strategy<Value = RequiredComponents> {
    (any_component(), any_component(), any_component()).prop_map(
        |(agent, cluster_agent, cluster_checks_runner)| RequiredComponents {
            agent,
            cluster_agent,
            cluster_checks_runner,
        },
    )
}

/// (key, value) contributions, with keys drawn from a small set so that
/// collisions are frequent.
fn contributions() -> impl Strategy<Value = Vec<(String, i32)>> {
    prop::collection::vec(("[a-d]", any::<i32>()), 0..20)
}

fn merge_all(items: &[(String, i32)], policy: MergePolicy) -> Vec<(String, i32)> {
    let mut merged = Vec::new();
    for item in items {
        merge_keyed(&mut merged, item.clone(), |i| i.0.as_str(), policy, "item", "test").unwrap();
    }
    merged
}

proptest! {
    /// Merging the same contributions in the same order always yields the
    /// same result.
    #[test]
    fn merge_is_deterministic(items in contributions()) {
        prop_assert_eq!(
            merge_all(&items, MergePolicy::KeepExisting),
            merge_all(&items, MergePolicy::KeepExisting)
        );
    }

    /// With KeepExisting the first contribution for a key wins; with Override
    /// the last one does.
    #[test]
    fn merge_policies_pick_first_or_last(items in contributions()) {
        let keep = merge_all(&items, MergePolicy::KeepExisting);
        let over = merge_all(&items, MergePolicy::Override);

        for (key, value) in &keep {
            let first = items.iter().find(|i| &i.0 == key).unwrap();
            prop_assert_eq!(&first.1, value);
        }
        for (key, value) in &over {
            let last = items.iter().rev().find(|i| &i.0 == key).unwrap();
            prop_assert_eq!(&last.1, value);
        }
    }

    /// A merged list never holds two items with the same key.
    #[test]
    fn merge_keeps_keys_unique(items in contributions()) {
        let merged = merge_all(&items, MergePolicy::Override);
        let mut keys: Vec<_> = merged.iter().map(|i| i.0.clone()).collect();
        let total = keys.len();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(keys.len(), total);
    }

    /// ErrorOnConflict fails exactly when a key is contributed twice with
    /// different values.
    #[test]
    fn merge_error_on_conflict(items in contributions()) {
        let mut merged = Vec::new();
        let mut failed = false;
        for item in &items {
            let result = merge_keyed(
                &mut merged,
                item.clone(),
                |i| i.0.as_str(),
                MergePolicy::ErrorOnConflict,
                "item",
                "test",
            );
            if result.is_err() {
                failed = true;
                break;
            }
        }
        let mut first: HashMap<&str, i32> = HashMap::new();
        let conflicting = items.iter().any(|(k, v)| *first.entry(k.as_str()).or_insert(*v) != *v);
        prop_assert_eq!(failed, conflicting);
    }

    /// The container union does not depend on merge order, and holds every
    /// container any side asked for.
    #[test]
    fn required_containers_are_a_union(a in any_component(), b in any_component()) {
        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        let mut left = ab.containers.clone();
        let mut right = ba.containers.clone();
        left.sort_by_key(|c| c.as_str());
        right.sort_by_key(|c| c.as_str());
        prop_assert_eq!(left, right);
        for c in a.containers.iter().chain(b.containers.iter()) {
            prop_assert!(ab.containers.contains(c));
        }
        prop_assert_eq!(ab.is_required, ba.is_required);
    }

    /// An explicit `false` from any feature wins.
    #[test]
    fn required_false_wins(a in any_component()) {
        let mut merged = a.clone();
        merged.merge(&RequiredComponent::required(false));
        prop_assert_eq!(merged.is_required, Some(false));
    }

    /// Merging an opinion twice changes nothing the second time.
    #[test]
    fn required_merge_is_idempotent(a in any_components(), b in any_components()) {
        let mut once = a.clone();
        once.merge(&b);
        let mut twice = once.clone();
        twice.merge(&b);
        prop_assert_eq!(once, twice);
    }

    /// The hash only depends on content, not on map insertion order.
    #[test]
    fn hash_ignores_insertion_order(
        entries in prop::collection::vec(("[a-z]{1,8}", any::<u32>()), 0..10)
    ) {
        let forward: HashMap<_, _> = entries.iter().cloned().collect();
        let backward: HashMap<_, _> = entries.iter().rev().cloned().collect();
        let sorted: BTreeMap<_, _> = forward.clone().into_iter().collect();

        let h1 = generate_md5_for_spec(&forward).unwrap();
        let h2 = generate_md5_for_spec(&sorted).unwrap();
        prop_assert_eq!(&h1, &h2);
        if forward == backward {
            prop_assert_eq!(h1, generate_md5_for_spec(&backward).unwrap());
        }
        prop_assert_eq!(generate_md5_for_spec(&sorted).unwrap().len(), 32);
    }

    /// Different content hashes differently.
    #[test]
    fn hash_changes_with_content(a in "[a-z]{1,16}", b in "[a-z]{1,16}") {
        prop_assume!(a != b);
        prop_assert_ne!(
            generate_md5_for_spec(&a).unwrap(),
            generate_md5_for_spec(&b).unwrap()
        );
    }
}
