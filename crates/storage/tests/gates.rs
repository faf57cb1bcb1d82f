#![forbid(unsafe_code)]

use orc_core::ManualClock;
use orc_core::gates::{GateState, POLICY_DECIDER};
use orc_core::model::{
    GateOutcome, GateType, NewGateDecision, PhaseGate, PhaseTemplate, Task, TaskGateOverride,
};
use orc_storage::{ErrorKind, SqliteStore, StoreError};
use rusqlite::Connection;
use std::sync::Arc;
use time::macros::datetime;

fn store_with_task() -> (SqliteStore, ManualClock, String) {
    let clock = ManualClock::new(datetime!(2026-03-01 12:00 UTC));
    let mut store = SqliteStore::open_in_memory()
        .expect("open store")
        .with_clock(Arc::new(clock.clone()));
    let task = store
        .create_task(Task::new("", "Gated", datetime!(2026-03-01 12:00 UTC)))
        .expect("create task");
    (store, clock, task.id)
}

fn decision(task_id: &str, gate_type: GateType, outcome: GateOutcome) -> NewGateDecision {
    NewGateDecision {
        task_id: task_id.to_string(),
        phase: "review".to_string(),
        gate_type,
        outcome,
        reason: None,
        decided_by: Some("alice".to_string()),
    }
}

#[test]
fn retries_append_and_the_latest_decision_wins() {
    let (mut store, clock, task_id) = store_with_task();
    assert_eq!(
        store.gate_state(&task_id, "review").expect("state"),
        GateState::NoDecision
    );

    let mut rejected = decision(&task_id, GateType::Human, GateOutcome::Rejected);
    rejected.reason = Some("missing tests".to_string());
    let first = store.record_decision(rejected).expect("record rejection");
    assert_eq!(first.decided_at, datetime!(2026-03-01 12:00 UTC));

    clock.advance(time::Duration::minutes(10));
    let second = store
        .record_decision(decision(&task_id, GateType::Human, GateOutcome::Approved))
        .expect("record approval");
    assert!(second.id > first.id);

    let history = store.gate_history(&task_id, "review").expect("history");
    assert_eq!(history, vec![first.clone(), second.clone()]);
    assert_eq!(
        store.current_decision(&task_id, "review").expect("current"),
        Some(second)
    );
    let state = store.gate_state(&task_id, "review").expect("state");
    assert_eq!(state, GateState::Approved);
    assert!(state.is_open());
    assert_eq!(store.list_decisions(&task_id).expect("list").len(), 2);
    assert!(store.gate_history(&task_id, "implement").expect("other phase").is_empty());
}

#[test]
fn same_instant_decisions_fall_back_to_insertion_order() {
    let (mut store, _clock, task_id) = store_with_task();
    store
        .record_decision(decision(&task_id, GateType::Ai, GateOutcome::Approved))
        .expect("record approval");
    let pending = store
        .record_decision(decision(&task_id, GateType::Human, GateOutcome::Pending))
        .expect("record pending");

    let current = store
        .current_decision(&task_id, "review")
        .expect("current")
        .expect("has decision");
    assert_eq!(current.id, pending.id);
    assert_eq!(
        store.gate_state(&task_id, "review").expect("state"),
        GateState::PendingReview
    );
}

#[test]
fn skip_gates_are_approved_by_policy() {
    let (mut store, _clock, task_id) = store_with_task();
    let mut requested = decision(&task_id, GateType::Skip, GateOutcome::Rejected);
    requested.decided_by = None;
    let recorded = store.record_decision(requested).expect("record skip");
    assert_eq!(recorded.outcome, GateOutcome::Approved);
    assert_eq!(recorded.decided_by.as_deref(), Some(POLICY_DECIDER));
    assert!(recorded.approved());
}

#[test]
fn decisions_for_unknown_tasks_are_rejected() {
    let (mut store, _clock, _task_id) = store_with_task();
    let err = store
        .record_decision(decision("TASK-404", GateType::Human, GateOutcome::Approved))
        .expect_err("unknown task");
    match &err {
        StoreError::UnknownId { entity, id } => {
            assert_eq!((*entity, id.as_str()), ("task", "TASK-404"));
        }
        other => panic!("expected UnknownId, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn stored_decisions_cannot_be_rewritten() {
    let dir = tempfile::tempdir().expect("temp dir");
    let task_id = {
        let mut store = SqliteStore::open(dir.path()).expect("open store");
        let task = store
            .create_task(Task::new("", "Audited", datetime!(2026-03-01 12:00 UTC)))
            .expect("create task");
        store
            .record_decision(decision(&task.id, GateType::Human, GateOutcome::Rejected))
            .expect("record decision");
        task.id
    };

    let raw = Connection::open(dir.path().join(orc_storage::DATABASE_FILE)).expect("raw open");
    let result = raw.execute(
        "UPDATE gate_decisions SET outcome='approved' WHERE task_id=?1",
        [&task_id],
    );
    assert!(result.is_err(), "update must be refused");
    drop(raw);

    let store = SqliteStore::open(dir.path()).expect("reopen store");
    let history = store.gate_history(&task_id, "review").expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, GateOutcome::Rejected);
}

#[test]
fn overrides_can_be_set_claimed_and_removed() {
    let (mut store, _clock, task_id) = store_with_task();
    let human = TaskGateOverride {
        task_id: task_id.clone(),
        phase_id: "review".to_string(),
        gate_type: GateType::Human,
    };
    let skip = TaskGateOverride {
        gate_type: GateType::Skip,
        ..human.clone()
    };

    assert!(store.claim_gate_override(&human).expect("first claim"));
    assert!(!store.claim_gate_override(&skip).expect("second claim"));
    assert_eq!(
        store.gate_override(&task_id, "review").expect("get"),
        Some(human.clone())
    );

    store.set_gate_override(&skip).expect("replace override");
    assert_eq!(
        store.gate_override(&task_id, "review").expect("get"),
        Some(skip)
    );

    assert!(store.delete_gate_override(&task_id, "review").expect("delete"));
    assert!(!store.delete_gate_override(&task_id, "review").expect("delete again"));
    assert!(store.gate_override(&task_id, "review").expect("get").is_none());
}

#[test]
fn effective_gate_type_follows_precedence() {
    let (mut store, _clock, task_id) = store_with_task();
    let effective = |store: &SqliteStore, workflow: Option<GateType>| {
        store
            .effective_gate_type(&task_id, "review", workflow, GateType::Auto)
            .expect("effective gate type")
    };

    assert_eq!(effective(&store, None), GateType::Auto);
    assert_eq!(effective(&store, Some(GateType::Skip)), GateType::Skip);

    store
        .save_phase_template(
            &PhaseTemplate::new("review", "Review", datetime!(2026-03-01 12:00 UTC))
                .with_gate(GateType::Human),
        )
        .expect("save template");
    assert_eq!(effective(&store, None), GateType::Human);
    assert_eq!(effective(&store, Some(GateType::Skip)), GateType::Skip);

    store
        .save_phase_gate(&PhaseGate {
            phase_id: "review".to_string(),
            gate_type: GateType::Ai,
            enabled: false,
        })
        .expect("save disabled phase gate");
    assert_eq!(effective(&store, Some(GateType::Skip)), GateType::Skip);

    let enabled = PhaseGate {
        phase_id: "review".to_string(),
        gate_type: GateType::Ai,
        enabled: true,
    };
    store.save_phase_gate(&enabled).expect("enable phase gate");
    assert_eq!(store.phase_gate("review").expect("phase gate"), Some(enabled));
    assert_eq!(effective(&store, Some(GateType::Skip)), GateType::Ai);

    store
        .set_gate_override(&TaskGateOverride {
            task_id: task_id.clone(),
            phase_id: "review".to_string(),
            gate_type: GateType::Human,
        })
        .expect("set override");
    assert_eq!(effective(&store, Some(GateType::Skip)), GateType::Human);
}

#[test]
fn overrides_load_per_task_keyed_by_phase() {
    let (mut store, _clock, task_id) = store_with_task();
    let other = store
        .create_task(Task::new("", "Other", datetime!(2026-03-01 12:00 UTC)))
        .expect("create other task");
    for (task, phase, gate_type) in [
        (&task_id, "review", GateType::Human),
        (&task_id, "docs", GateType::Skip),
        (&other.id, "review", GateType::Ai),
    ] {
        store
            .set_gate_override(&TaskGateOverride {
                task_id: task.clone(),
                phase_id: phase.to_string(),
                gate_type,
            })
            .expect("set override");
    }

    let listed: Vec<(String, GateType)> = store
        .list_gate_overrides(&task_id)
        .expect("list overrides")
        .into_iter()
        .map(|entry| (entry.phase_id, entry.gate_type))
        .collect();
    assert_eq!(
        listed,
        vec![
            ("docs".to_string(), GateType::Skip),
            ("review".to_string(), GateType::Human),
        ]
    );

    let by_phase = store.gate_overrides_by_phase(&other.id).expect("by phase");
    assert_eq!(by_phase.len(), 1);
    assert_eq!(by_phase["review"].gate_type, GateType::Ai);
    assert!(store.list_gate_overrides("TASK-404").expect("none").is_empty());
}
