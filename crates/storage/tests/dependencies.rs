#![forbid(unsafe_code)]

use orc_core::deps::DependencyKind;
use orc_core::model::{Initiative, InitiativeStatus, Task, TaskStatus};
use orc_storage::{ErrorKind, SqliteStore, StoreError};
use proptest::prelude::*;
use std::collections::BTreeMap;
use time::macros::datetime;

fn store_with_tasks(count: usize) -> (SqliteStore, Vec<String>) {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let ids = (0..count)
        .map(|index| {
            store
                .create_task(Task::new("", format!("Task {index}"), datetime!(2026-03-01 12:00 UTC)))
                .expect("create task")
                .id
        })
        .collect();
    (store, ids)
}

#[test]
fn add_edge_is_idempotent() {
    let (mut store, ids) = store_with_tasks(2);
    assert!(store.add_edge(DependencyKind::Task, &ids[1], &ids[0]).expect("first add"));
    assert!(!store.add_edge(DependencyKind::Task, &ids[1], &ids[0]).expect("second add"));
    assert_eq!(
        store.edges(DependencyKind::Task, &ids[1]).expect("edges"),
        vec![ids[0].clone()]
    );
    assert_eq!(
        store.dependents(DependencyKind::Task, &ids[0]).expect("dependents"),
        vec![ids[1].clone()]
    );
}

#[test]
fn self_edges_and_cycles_are_rejected() {
    let (mut store, ids) = store_with_tasks(3);
    let err = store
        .add_edge(DependencyKind::Task, &ids[0], &ids[0])
        .expect_err("self edge");
    assert_eq!(err.kind(), ErrorKind::Validation);

    store.add_edge(DependencyKind::Task, &ids[1], &ids[0]).expect("b -> a");
    store.add_edge(DependencyKind::Task, &ids[2], &ids[1]).expect("c -> b");
    let err = store
        .add_edge(DependencyKind::Task, &ids[0], &ids[2])
        .expect_err("a -> c closes a cycle");
    match err {
        StoreError::DependencyCycle { path } => {
            assert_eq!(
                path,
                vec![ids[0].clone(), ids[2].clone(), ids[1].clone(), ids[0].clone()]
            );
        }
        other => panic!("expected DependencyCycle, got {other:?}"),
    }
}

#[test]
fn unknown_endpoints_violate_constraints() {
    let (mut store, ids) = store_with_tasks(1);
    let err = store
        .add_edge(DependencyKind::Task, &ids[0], "TASK-404")
        .expect_err("unknown target");
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
}

#[test]
fn replace_edges_is_atomic() {
    let (mut store, ids) = store_with_tasks(4);
    store
        .replace_edges(DependencyKind::Task, &ids[3], &[ids[0].clone(), ids[1].clone()])
        .expect("initial replace");

    let err = store
        .replace_edges(
            DependencyKind::Task,
            &ids[3],
            &[ids[2].clone(), "TASK-404".to_string()],
        )
        .expect_err("second replace fails midway");
    assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
    assert_eq!(
        store.edges(DependencyKind::Task, &ids[3]).expect("edges"),
        vec![ids[0].clone(), ids[1].clone()]
    );

    store
        .replace_edges(DependencyKind::Task, &ids[3], &[ids[2].clone()])
        .expect("valid replace");
    assert_eq!(
        store.edges(DependencyKind::Task, &ids[3]).expect("edges"),
        vec![ids[2].clone()]
    );
}

#[test]
fn blocking_edges_skip_finished_dependencies() {
    let (mut store, ids) = store_with_tasks(3);
    store.add_edge(DependencyKind::Task, &ids[2], &ids[0]).expect("c -> a");
    store.add_edge(DependencyKind::Task, &ids[2], &ids[1]).expect("c -> b");

    let mut done = store.get_task(&ids[0]).expect("get").expect("exists");
    done.status = TaskStatus::Resolved;
    store.save_task(&done).expect("resolve a");

    assert_eq!(
        store.blocking_edges(DependencyKind::Task, &ids[2]).expect("blocking"),
        vec![ids[1].clone()]
    );
}

#[test]
fn initiative_graph_is_independent() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let now = store.now();
    let first = store
        .create_initiative(Initiative::new("", "Foundations", now))
        .expect("create first");
    let second = store
        .create_initiative(Initiative::new("", "Features", now))
        .expect("create second");

    store
        .add_edge(DependencyKind::Initiative, &second.id, &first.id)
        .expect("add initiative edge");
    assert!(store.all_edges(DependencyKind::Task).expect("task edges").is_empty());
    assert_eq!(
        store
            .blocking_edges(DependencyKind::Initiative, &second.id)
            .expect("blocking"),
        vec![first.id.clone()]
    );

    let mut finished = first.clone();
    finished.status = InitiativeStatus::Completed;
    store.save_initiative(&finished).expect("complete first");
    assert!(store
        .blocking_edges(DependencyKind::Initiative, &second.id)
        .expect("blocking")
        .is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn batch_loaders_match_single_queries(
        pairs in proptest::collection::vec((0usize..6, 0usize..6), 0..24)
    ) {
        let (mut store, ids) = store_with_tasks(6);
        for (from, to) in pairs {
            // Keep the graph acyclic by only pointing at lower indices.
            if from > to {
                store
                    .add_edge(DependencyKind::Task, &ids[from], &ids[to])
                    .expect("add edge");
            }
        }

        let all_edges = store.all_edges(DependencyKind::Task).expect("all edges");
        let all_dependents = store.all_dependents(DependencyKind::Task).expect("all dependents");
        let empty: Vec<String> = Vec::new();
        for id in &ids {
            let single = store.edges(DependencyKind::Task, id).expect("edges");
            prop_assert_eq!(all_edges.get(id).unwrap_or(&empty), &single);

            let reverse = store.dependents(DependencyKind::Task, id).expect("dependents");
            prop_assert_eq!(all_dependents.get(id).unwrap_or(&empty), &reverse);
        }

        let mut rebuilt: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (subject, deps) in &all_edges {
            for dep in deps {
                rebuilt.entry(dep.clone()).or_default().push(subject.clone());
            }
        }
        for deps in rebuilt.values_mut() {
            deps.sort();
        }
        prop_assert_eq!(rebuilt, all_dependents);
    }
}
