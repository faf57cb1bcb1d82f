#![forbid(unsafe_code)]

use orc_core::deps::DependencyKind;
use orc_core::ids::IdKind;
use orc_core::model::{Pagination, Task, TaskFilter};
use orc_storage::{CancelHandle, Dialect, ErrorKind, SqliteStore, StoreError, TxContext};
use std::time::{Duration, Instant};
use time::macros::datetime;

fn draft(title: &str) -> Task {
    Task::new("", title, datetime!(2026-03-01 12:00 UTC))
}

fn task_count(store: &SqliteStore) -> u64 {
    store
        .list_tasks(&TaskFilter::default(), Pagination::all())
        .expect("list tasks")
        .total
}

#[test]
fn run_in_tx_commits_composed_operations() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let (a, b) = store
        .run_in_tx(&TxContext::background(), |tx| {
            let a = tx.create_task(draft("A"))?;
            let b = tx.create_task(draft("B"))?;
            tx.add_edge(DependencyKind::Task, &b.id, &a.id)?;
            Ok((a, b))
        })
        .expect("transaction commits");

    assert_eq!(task_count(&store), 2);
    assert_eq!(
        store.edges(DependencyKind::Task, &b.id).expect("edges"),
        vec![a.id]
    );
}

#[test]
fn errors_roll_back_and_are_returned_unchanged() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let err = store
        .run_in_tx(&TxContext::background(), |tx| {
            tx.create_task(draft("Never committed"))?;
            Err::<(), _>(StoreError::InvalidInput("caller aborted"))
        })
        .expect_err("closure error propagates");
    match err {
        StoreError::InvalidInput(message) => assert_eq!(message, "caller aborted"),
        other => panic!("expected InvalidInput, got {other:?}"),
    }
    assert_eq!(task_count(&store), 0);

    let task = store.create_task(draft("Committed")).expect("create task");
    assert_eq!(task.id, "TASK-001", "rolled back allocation is reused");
}

#[test]
fn cancellation_aborts_the_next_statement() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let cancel = CancelHandle::default();
    let ctx = TxContext::background().with_cancel(&cancel);

    let err = store
        .run_in_tx(&ctx, |tx| {
            tx.create_task(draft("Before cancel"))?;
            cancel.cancel();
            tx.create_task(draft("After cancel"))?;
            Ok(())
        })
        .expect_err("cancelled");
    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(err.kind(), ErrorKind::TransactionAborted);
    assert_eq!(task_count(&store), 0);

    let err = store
        .run_in_tx(&ctx, |_| Ok(()))
        .expect_err("already cancelled context");
    assert!(matches!(err, StoreError::Cancelled));
}

#[test]
fn cancellation_after_the_last_statement_still_rolls_back() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let cancel = CancelHandle::default();
    let ctx = TxContext::background().with_cancel(&cancel);

    let err = store
        .run_in_tx(&ctx, |tx| {
            tx.create_task(draft("Written"))?;
            cancel.cancel();
            Ok(())
        })
        .expect_err("cancelled before commit");
    assert!(matches!(err, StoreError::Cancelled));
    assert_eq!(task_count(&store), 0);
}

#[test]
fn expired_deadline_is_reported() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let past = Instant::now()
        .checked_sub(Duration::from_millis(1))
        .unwrap_or_else(Instant::now);
    let ctx = TxContext::background().with_deadline(past);
    let err = store
        .run_in_tx(&ctx, |tx| tx.create_task(draft("Late")))
        .expect_err("deadline passed");
    assert!(matches!(err, StoreError::DeadlineExceeded));
    assert_eq!(task_count(&store), 0);

    let generous = TxContext::background().with_deadline(Instant::now() + Duration::from_secs(60));
    store
        .run_in_tx(&generous, |tx| tx.create_task(draft("On time")))
        .expect("within deadline");
    assert_eq!(task_count(&store), 1);
}

#[test]
fn ids_are_allocated_inside_the_transaction() {
    let mut store = SqliteStore::open_in_memory().expect("open store");
    let ids = store
        .run_in_tx(&TxContext::background(), |tx| {
            Ok(vec![tx.next_id(IdKind::Task)?, tx.next_id(IdKind::Task)?])
        })
        .expect("allocate ids");
    assert_eq!(ids, vec!["TASK-001".to_string(), "TASK-002".to_string()]);

    let task = store.create_task(draft("After reservation")).expect("create task");
    assert_eq!(task.id, "TASK-003");
}

#[test]
fn store_reports_sqlite_dialect() {
    let store = SqliteStore::open_in_memory().expect("open store");
    assert_eq!(store.dialect(), Dialect::Sqlite);
}
