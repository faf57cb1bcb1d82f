#![forbid(unsafe_code)]

use super::dialect::Dialect;
use super::error::{SqlContext, StoreError};
use rusqlite::{Connection, OptionalExtension, params};

/// One schema step. Versions are applied in ascending order exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core_entities",
        sql: CORE_ENTITIES,
    },
    Migration {
        version: 2,
        name: "gates",
        sql: GATES,
    },
    Migration {
        version: 3,
        name: "workflows",
        sql: WORKFLOWS,
    },
    Migration {
        version: 4,
        name: "phase_templates",
        sql: PHASE_TEMPLATES,
    },
];

const LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);";

/// Applies every migration not yet recorded in `schema_migrations`.
/// Returns the versions applied by this call.
pub fn apply_migrations(
    conn: &mut Connection,
    migrations: &[Migration],
) -> Result<Vec<i64>, StoreError> {
    if migrations
        .windows(2)
        .any(|pair| pair[0].version >= pair[1].version)
    {
        return Err(StoreError::InvalidInput(
            "migration versions must be strictly ascending",
        ));
    }

    conn.execute_batch(LEDGER).op("create migration ledger")?;

    let insert = format!(
        "INSERT INTO schema_migrations(version, name, applied_at) VALUES (?1, ?2, {})",
        Dialect::Sqlite.now_expr()
    );
    let mut applied = Vec::new();
    for migration in migrations {
        let op = format!("migration {} ({})", migration.version, migration.name);
        let tx = conn.transaction().op(&op)?;
        let recorded = tx
            .query_row(
                "SELECT 1 FROM schema_migrations WHERE version=?1",
                params![migration.version],
                |_| Ok(()),
            )
            .optional()
            .op(&op)?
            .is_some();
        if recorded {
            tracing::debug!(version = migration.version, "migration already applied");
            continue;
        }
        tx.execute_batch(migration.sql).op(&op)?;
        tx.execute(&insert, params![migration.version, migration.name])
            .op(&op)?;
        tx.commit().op(&op)?;
        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        applied.push(migration.version);
    }
    Ok(applied)
}

/// Highest applied version, or 0 on a fresh database.
pub fn schema_version(conn: &Connection) -> Result<i64, StoreError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .op("read schema version")
}

const CORE_ENTITIES: &str = "
CREATE TABLE counters (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE initiatives (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    vision TEXT,
    owner_initials TEXT,
    owner_display_name TEXT,
    owner_email TEXT,
    branch_base TEXT,
    branch_prefix TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE tasks (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    weight TEXT,
    workflow_id TEXT,
    status TEXT NOT NULL DEFAULT 'created',
    state_status TEXT,
    current_phase TEXT,
    queue TEXT,
    priority TEXT,
    category TEXT,
    initiative_id TEXT REFERENCES initiatives(id) ON DELETE SET NULL,
    branch TEXT,
    target_branch TEXT,
    pr_url TEXT,
    pr_number INTEGER,
    pr_status TEXT,
    pr_draft INTEGER,
    metadata TEXT,
    executor_pid INTEGER NOT NULL DEFAULT 0,
    executor_hostname TEXT NOT NULL DEFAULT '',
    executor_started_at TEXT,
    last_heartbeat TEXT,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_tasks_status ON tasks(status);
CREATE INDEX idx_tasks_state_status ON tasks(state_status);
CREATE INDEX idx_tasks_initiative ON tasks(initiative_id);

CREATE TABLE phases (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    phase_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    iterations INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    interrupted_at TEXT,
    commit_sha TEXT,
    skip_reason TEXT,
    error TEXT,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    session_id TEXT,
    PRIMARY KEY (task_id, phase_id)
);

CREATE TABLE task_dependencies (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    depends_on TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    PRIMARY KEY (task_id, depends_on),
    CHECK (task_id <> depends_on)
);
CREATE INDEX idx_task_dependencies_depends_on ON task_dependencies(depends_on);

CREATE TABLE initiative_dependencies (
    initiative_id TEXT NOT NULL REFERENCES initiatives(id) ON DELETE CASCADE,
    depends_on TEXT NOT NULL REFERENCES initiatives(id) ON DELETE CASCADE,
    PRIMARY KEY (initiative_id, depends_on),
    CHECK (initiative_id <> depends_on)
);
CREATE INDEX idx_initiative_dependencies_depends_on ON initiative_dependencies(depends_on);

CREATE TABLE initiative_tasks (
    initiative_id TEXT NOT NULL REFERENCES initiatives(id) ON DELETE CASCADE,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    sequence INTEGER NOT NULL,
    PRIMARY KEY (initiative_id, task_id)
);

CREATE TABLE initiative_decisions (
    id TEXT PRIMARY KEY,
    initiative_id TEXT NOT NULL REFERENCES initiatives(id) ON DELETE CASCADE,
    decision TEXT NOT NULL,
    rationale TEXT,
    decided_by TEXT,
    decided_at TEXT NOT NULL
);
CREATE INDEX idx_initiative_decisions_initiative ON initiative_decisions(initiative_id);
";

const GATES: &str = "
CREATE TABLE gate_decisions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    phase TEXT NOT NULL,
    gate_type TEXT NOT NULL,
    outcome TEXT NOT NULL,
    reason TEXT,
    decided_by TEXT,
    decided_at TEXT NOT NULL
);
CREATE INDEX idx_gate_decisions_task_phase ON gate_decisions(task_id, phase);

CREATE TRIGGER gate_decisions_no_update
BEFORE UPDATE ON gate_decisions
BEGIN
    SELECT RAISE(ABORT, 'gate decisions are append-only');
END;

CREATE TABLE phase_gates (
    phase_id TEXT PRIMARY KEY,
    gate_type TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL
);

CREATE TABLE task_gate_overrides (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    phase_id TEXT NOT NULL,
    gate_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (task_id, phase_id)
);
";

const WORKFLOWS: &str = "
CREATE TABLE workflows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    workflow_type TEXT NOT NULL DEFAULT 'task',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE workflow_phases (
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    phase_template_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    depends_on TEXT,
    gate_type_override TEXT,
    max_iterations_override INTEGER,
    loop_config TEXT,
    PRIMARY KEY (workflow_id, phase_template_id)
);

CREATE TABLE workflow_runs (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    context_type TEXT NOT NULL DEFAULT 'standalone',
    context_data TEXT,
    task_id TEXT REFERENCES tasks(id) ON DELETE SET NULL,
    prompt TEXT NOT NULL DEFAULT '',
    instructions TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    current_phase TEXT,
    started_at TEXT,
    completed_at TEXT,
    variables_snapshot TEXT,
    total_input_tokens INTEGER NOT NULL DEFAULT 0,
    total_output_tokens INTEGER NOT NULL DEFAULT 0,
    total_cost_usd REAL NOT NULL DEFAULT 0,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX idx_workflow_runs_task ON workflow_runs(task_id);
CREATE INDEX idx_workflow_runs_status ON workflow_runs(status);

CREATE TABLE workflow_run_phases (
    workflow_run_id TEXT NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
    phase_template_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    iterations INTEGER NOT NULL DEFAULT 0,
    started_at TEXT,
    completed_at TEXT,
    commit_sha TEXT,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    cost_usd REAL NOT NULL DEFAULT 0,
    content TEXT,
    error TEXT,
    session_id TEXT,
    PRIMARY KEY (workflow_run_id, phase_template_id)
);
";

const PHASE_TEMPLATES: &str = "
CREATE TABLE phase_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT,
    gate_type TEXT,
    max_iterations INTEGER,
    retry_from_phase TEXT,
    checkpoint INTEGER NOT NULL DEFAULT 0,
    is_builtin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE workflow_variables (
    workflow_id TEXT NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    source_type TEXT NOT NULL DEFAULT 'static',
    source_config TEXT NOT NULL DEFAULT '{}',
    required INTEGER NOT NULL DEFAULT 0,
    default_value TEXT,
    cache_ttl_seconds INTEGER NOT NULL DEFAULT 0,
    script_content TEXT,
    extract TEXT,
    PRIMARY KEY (workflow_id, name)
);
";
