// tests/property.rs

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use shepherd::model::{HostRoleStatus, RoleCommand, RoleCommandKey, StatusSummary};
use shepherd::ordering::{RoleCommandOrder, StackDefinition};
use shepherd_test_utils::StackBuilder;

fn role(i: usize) -> String {
    format!("ROLE_{i}")
}

// Strategy for an acyclic role command order: ROLE_i may only wait for
// ROLE_j with j < i. Returns the stack and the blocker lists.
fn order_strategy(max_roles: usize) -> impl Strategy<Value = (StackDefinition, Vec<BTreeSet<usize>>)> {
    (1..=max_roles).prop_flat_map(|num_roles| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_roles),
            num_roles,
        )
        .prop_map(move |raw| {
            let names: Vec<String> = (0..num_roles).map(role).collect();
            let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut builder = StackBuilder::new("PROP", "1").service("SVC", &name_refs, &[], &[]);

            let mut blockers = Vec::with_capacity(num_roles);
            for (i, candidates) in raw.into_iter().enumerate() {
                let deps: BTreeSet<usize> = if i == 0 {
                    BTreeSet::new()
                } else {
                    candidates.into_iter().map(|c| c % i).collect()
                };
                if !deps.is_empty() {
                    let entries: Vec<String> =
                        deps.iter().map(|d| format!("{}-START", role(*d))).collect();
                    let entry_refs: Vec<&str> = entries.iter().map(String::as_str).collect();
                    builder = builder.order(&format!("{}-START", role(i)), &entry_refs);
                }
                blockers.push(deps);
            }
            (builder.build(), blockers)
        })
    })
}

fn key(i: usize) -> RoleCommandKey {
    RoleCommandKey::new("SVC", role(i), RoleCommand::Start)
}

fn status_strategy() -> impl Strategy<Value = HostRoleStatus> {
    proptest::sample::select(HostRoleStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn stage_layers_respect_every_present_edge(
        (def, blockers) in order_strategy(8),
        present in proptest::collection::btree_set(0..8usize, 1..8),
    ) {
        let order = RoleCommandOrder::build(&def).unwrap();
        let present: BTreeSet<usize> = present.into_iter().filter(|i| *i < blockers.len()).collect();
        prop_assume!(!present.is_empty());

        let keys: BTreeSet<RoleCommandKey> = present.iter().map(|i| key(*i)).collect();
        let layers = order.stage_layers(&keys);

        let mut layer_of: BTreeMap<RoleCommandKey, usize> = BTreeMap::new();
        for (n, layer) in layers.iter().enumerate() {
            prop_assert!(!layer.is_empty());
            for k in layer {
                prop_assert!(layer_of.insert(k.clone(), n).is_none(), "{} placed twice", k);
            }
        }
        prop_assert_eq!(layer_of.len(), keys.len());

        for &i in &present {
            for &j in &blockers[i] {
                if present.contains(&j) {
                    prop_assert!(order.blocks(&key(j), &key(i)));
                    prop_assert!(layer_of[&key(j)] < layer_of[&key(i)]);
                }
            }
        }
    }

    #[test]
    fn terminal_statuses_never_move(
        walk in proptest::collection::vec(status_strategy(), 1..30),
    ) {
        let mut current = HostRoleStatus::Pending;
        let mut terminal_at: Option<HostRoleStatus> = None;

        for next in walk {
            if current.can_transition_to(next) {
                prop_assert!(terminal_at.is_none());
                current = next;
                if current.is_terminal() {
                    terminal_at = Some(current);
                }
            }
        }
        if let Some(status) = terminal_at {
            prop_assert_eq!(current, status);
            for next in HostRoleStatus::ALL {
                prop_assert!(!current.can_transition_to(next));
            }
        }
    }

    #[test]
    fn summary_of_finished_tasks_is_finished(
        statuses in proptest::collection::vec(status_strategy(), 0..20),
        tolerate in any::<bool>(),
    ) {
        let summary = StatusSummary::from_statuses(statuses.iter().copied());
        let percent = summary.percent_complete();
        prop_assert!((0.0..=100.0).contains(&percent));

        let derived = summary.calculate(tolerate);
        if statuses.iter().any(|s| s.is_holding()) {
            prop_assert!(derived.is_holding());
        } else if statuses.iter().all(|s| s.is_terminal()) {
            prop_assert!(derived.is_terminal());
            prop_assert_eq!(percent, 100.0);
        } else {
            prop_assert!(!derived.is_terminal());
        }
    }
}
