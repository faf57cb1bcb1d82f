#![forbid(unsafe_code)]

use orc_core::model::Task;
use orc_storage::{MIGRATIONS, Migration, SqliteStore, StoreConfig, apply_migrations, schema_version};
use rusqlite::Connection;
use time::macros::datetime;

#[test]
fn migrations_apply_once_in_order() {
    let mut conn = Connection::open_in_memory().expect("open connection");
    assert_eq!(schema_version(&conn).ok(), None, "no ledger yet");

    let applied = apply_migrations(&mut conn, MIGRATIONS).expect("first apply");
    assert_eq!(applied, vec![1, 2, 3, 4]);
    assert_eq!(schema_version(&conn).expect("version"), 4);

    let again = apply_migrations(&mut conn, MIGRATIONS).expect("second apply");
    assert!(again.is_empty());

    let names: Vec<String> = conn
        .prepare("SELECT name FROM schema_migrations ORDER BY version")
        .expect("prepare")
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("collect");
    assert_eq!(names, vec!["core_entities", "gates", "workflows", "phase_templates"]);
}

#[test]
fn later_migrations_extend_an_existing_schema() {
    const EXTRA: Migration = Migration {
        version: 5,
        name: "task_labels",
        sql: "CREATE TABLE task_labels (task_id TEXT NOT NULL, label TEXT NOT NULL);",
    };
    let mut conn = Connection::open_in_memory().expect("open connection");
    apply_migrations(&mut conn, &MIGRATIONS[..1]).expect("base schema");
    assert_eq!(schema_version(&conn).expect("version"), 1);

    let mut all = MIGRATIONS.to_vec();
    all.push(EXTRA);
    let applied = apply_migrations(&mut conn, &all).expect("upgrade");
    assert_eq!(applied, vec![2, 3, 4, 5]);
    assert_eq!(schema_version(&conn).expect("version"), 5);
}

#[test]
fn unordered_migrations_are_rejected() {
    let mut conn = Connection::open_in_memory().expect("open connection");
    let unordered = [MIGRATIONS[1], MIGRATIONS[0]];
    assert!(apply_migrations(&mut conn, &unordered).is_err());
    assert_eq!(
        schema_version(&conn).ok(),
        None,
        "nothing is created for a rejected list"
    );
}

#[test]
fn failed_migration_leaves_no_trace() {
    const BROKEN: Migration = Migration {
        version: 5,
        name: "broken",
        sql: "CREATE TABLE half_done (id TEXT); CREATE TABLE tasks (id TEXT);",
    };
    let mut conn = Connection::open_in_memory().expect("open connection");
    let mut all = MIGRATIONS.to_vec();
    all.push(BROKEN);
    assert!(apply_migrations(&mut conn, &all).is_err());
    assert_eq!(schema_version(&conn).expect("version"), 4);

    let half_done: i64 = conn
        .query_row(
            "SELECT COUNT(1) FROM sqlite_master WHERE name='half_done'",
            [],
            |row| row.get(0),
        )
        .expect("inspect schema");
    assert_eq!(half_done, 0);
}

#[test]
fn data_survives_reopening_the_store() {
    let dir = tempfile::tempdir().expect("temp dir");
    let id = {
        let mut store = SqliteStore::open(dir.path()).expect("open store");
        assert_eq!(store.schema_version().expect("version"), 4);
        store
            .create_task(Task::new("", "Persisted", datetime!(2026-03-01 12:00 UTC)))
            .expect("create task")
            .id
    };

    let mut store = SqliteStore::open(dir.path()).expect("reopen store");
    assert_eq!(store.schema_version().expect("version"), 4);
    let task = store.get_task(&id).expect("get").expect("task persisted");
    assert_eq!(task.title, "Persisted");
    let next = store
        .create_task(Task::new("", "Next", datetime!(2026-03-01 12:00 UTC)))
        .expect("create next");
    assert_eq!(next.id, "TASK-002");
}

#[test]
fn config_deserializes_with_defaults() {
    let config: StoreConfig =
        serde_json::from_str(r#"{"path":"/tmp/orc/orc.db","busy_timeout_ms":250}"#)
            .expect("parse config");
    assert_eq!(config.busy_timeout(), std::time::Duration::from_millis(250));
    assert!(config.wal);
    assert!(config.foreign_keys);

    let store = SqliteStore::open_with(StoreConfig {
        busy_timeout_ms: 250,
        ..StoreConfig::in_memory()
    })
    .expect("open with config");
    assert_eq!(store.config().busy_timeout_ms, 250);
    assert_eq!(store.config().path, None);
}
