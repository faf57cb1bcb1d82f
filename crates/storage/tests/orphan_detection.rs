#![forbid(unsafe_code)]

use orc_core::ManualClock;
use orc_core::model::{Task, TaskState};
use orc_storage::SqliteStore;
use std::sync::Arc;
use time::Duration;
use time::macros::datetime;

const THRESHOLD: Duration = Duration::minutes(5);

fn store_at_noon() -> (SqliteStore, ManualClock) {
    let clock = ManualClock::new(datetime!(2026-03-01 12:00 UTC));
    let store = SqliteStore::open_in_memory()
        .expect("open store")
        .with_clock(Arc::new(clock.clone()));
    (store, clock)
}

fn running_task(store: &mut SqliteStore, title: &str) -> String {
    let mut task = store
        .create_task(Task::new("", title, datetime!(2026-03-01 12:00 UTC)))
        .expect("create task");
    task.state_status = TaskState::Running;
    store.save_task(&task).expect("start task");
    task.id
}

fn stale_ids(store: &SqliteStore) -> Vec<String> {
    store
        .stale_tasks(THRESHOLD)
        .expect("stale tasks")
        .into_iter()
        .map(|liveness| liveness.task_id)
        .collect()
}

#[test]
fn claim_stamps_start_and_first_heartbeat() {
    let (mut store, _clock) = store_at_noon();
    let id = running_task(&mut store, "Claimed");
    assert!(store.set_executor(&id, 4242, "worker-a").expect("claim"));

    let liveness = store
        .executor_liveness(&id)
        .expect("liveness")
        .expect("task exists");
    assert_eq!(liveness.pid, 4242);
    assert_eq!(liveness.hostname, "worker-a");
    assert_eq!(liveness.started_at, Some(datetime!(2026-03-01 12:00 UTC)));
    assert_eq!(liveness.last_heartbeat, liveness.started_at);
    assert_eq!(liveness.state_status, TaskState::Running);
}

#[test]
fn staleness_boundary_is_strict() {
    let (mut store, clock) = store_at_noon();
    let id = running_task(&mut store, "Watched");
    store.set_executor(&id, 4242, "worker-a").expect("claim");

    clock.advance(THRESHOLD - Duration::seconds(1));
    assert!(stale_ids(&store).is_empty());

    clock.set(datetime!(2026-03-01 12:00 UTC) + THRESHOLD);
    assert!(stale_ids(&store).is_empty(), "exactly at the threshold is live");

    clock.advance(Duration::seconds(1));
    assert_eq!(stale_ids(&store), vec![id]);
}

#[test]
fn heartbeats_keep_a_task_alive() {
    let (mut store, clock) = store_at_noon();
    let id = running_task(&mut store, "Beating");
    store.set_executor(&id, 4242, "worker-a").expect("claim");

    for _ in 0..3 {
        clock.advance(Duration::minutes(4));
        assert!(store.heartbeat(&id).expect("heartbeat"));
        assert!(stale_ids(&store).is_empty());
    }

    let liveness = store
        .executor_liveness(&id)
        .expect("liveness")
        .expect("task exists");
    assert_eq!(liveness.started_at, Some(datetime!(2026-03-01 12:00 UTC)));
    assert_eq!(liveness.last_heartbeat, Some(datetime!(2026-03-01 12:12 UTC)));
    assert_eq!(liveness.heartbeat_age(store.now()), Some(Duration::ZERO));

    clock.advance(Duration::minutes(6));
    assert_eq!(stale_ids(&store), vec![id]);
}

#[test]
fn only_running_tasks_are_reported() {
    let (mut store, clock) = store_at_noon();
    let running = running_task(&mut store, "Running");
    let never_beat = running_task(&mut store, "No heartbeat");
    let idle = store
        .create_task(Task::new("", "Pending", datetime!(2026-03-01 12:00 UTC)))
        .expect("create idle task");
    store.set_executor(&running, 1, "worker-a").expect("claim running");
    store.set_executor(&idle.id, 2, "worker-b").expect("claim idle");

    assert_eq!(stale_ids(&store), vec![never_beat.clone()]);

    clock.advance(Duration::hours(1));
    assert_eq!(stale_ids(&store), vec![running, never_beat]);
}

#[test]
fn clearing_the_executor_resets_the_claim() {
    let (mut store, _clock) = store_at_noon();
    let id = running_task(&mut store, "Released");
    store.set_executor(&id, 4242, "worker-a").expect("claim");
    assert!(store.clear_executor(&id).expect("clear"));

    let liveness = store
        .executor_liveness(&id)
        .expect("liveness")
        .expect("task exists");
    assert_eq!(liveness.pid, 0);
    assert_eq!(liveness.hostname, "");

    let task = store.get_task(&id).expect("get").expect("task exists");
    assert!(!task.executor.is_claimed());
}

#[test]
fn unknown_tasks_report_false() {
    let (store, _clock) = store_at_noon();
    assert!(!store.heartbeat("TASK-404").expect("heartbeat"));
    assert!(!store.set_executor("TASK-404", 1, "worker-a").expect("claim"));
    assert!(!store.clear_executor("TASK-404").expect("clear"));
    assert!(store.executor_liveness("TASK-404").expect("liveness").is_none());
}
