#![forbid(unsafe_code)]

use super::rows::{enum_col, non_empty, opt_ts_col, opt_ts_text, u32_col, usage_cols};
use super::*;
use orc_core::ids::normalize_id;
use orc_core::model::Phase;
use rusqlite::{Row, params};

const PHASE_COLUMNS: &str = "task_id, phase_id, status, iterations, started_at, completed_at, \
     interrupted_at, commit_sha, skip_reason, error, input_tokens, output_tokens, cost_usd, session_id";

fn phase_from_row(row: &Row<'_>) -> rusqlite::Result<Phase> {
    Ok(Phase {
        task_id: row.get(0)?,
        phase_id: row.get(1)?,
        status: enum_col(row, 2)?,
        iterations: u32_col(row, 3)?,
        started_at: opt_ts_col(row, 4)?,
        completed_at: opt_ts_col(row, 5)?,
        interrupted_at: opt_ts_col(row, 6)?,
        commit_sha: row.get(7)?,
        skip_reason: row.get(8)?,
        error: row.get(9)?,
        usage: usage_cols(row, 10)?,
        session_id: row.get(13)?,
    })
}

impl TxOps<'_> {
    /// Upserts a task phase. An empty `session_id` keeps the stored handle
    /// and `iterations` never moves backwards.
    pub fn save_phase(&self, phase: &Phase) -> Result<(), StoreError> {
        let task_id = normalize_id(&phase.task_id)?;
        let phase_id = normalize_id(&phase.phase_id)?;
        self.ensure_task_exists(&task_id)?;
        self.execute(
            &format!("save phase {phase_id} of task {task_id}"),
            &format!(
                "INSERT INTO phases ({PHASE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
                 ON CONFLICT(task_id, phase_id) DO UPDATE SET \
                 status=excluded.status, \
                 iterations=MAX(phases.iterations, excluded.iterations), \
                 started_at=excluded.started_at, completed_at=excluded.completed_at, \
                 interrupted_at=excluded.interrupted_at, commit_sha=excluded.commit_sha, \
                 skip_reason=excluded.skip_reason, error=excluded.error, \
                 input_tokens=excluded.input_tokens, output_tokens=excluded.output_tokens, \
                 cost_usd=excluded.cost_usd, \
                 session_id=COALESCE(excluded.session_id, phases.session_id)"
            ),
            params![
                task_id,
                phase_id,
                phase.status.as_str(),
                i64::from(phase.iterations),
                opt_ts_text(phase.started_at),
                opt_ts_text(phase.completed_at),
                opt_ts_text(phase.interrupted_at),
                phase.commit_sha,
                phase.skip_reason,
                phase.error,
                phase.usage.input_tokens,
                phase.usage.output_tokens,
                phase.usage.cost_usd,
                non_empty(&phase.session_id),
            ],
        )?;
        Ok(())
    }

    pub fn get_phase(&self, task_id: &str, phase_id: &str) -> Result<Option<Phase>, StoreError> {
        self.query_one(
            &format!("get phase {phase_id} of task {task_id}"),
            &format!("SELECT {PHASE_COLUMNS} FROM phases WHERE task_id=?1 AND phase_id=?2"),
            params![task_id, phase_id],
            phase_from_row,
        )
    }

    /// Phases of a task in the order they were first saved.
    pub fn list_phases(&self, task_id: &str) -> Result<Vec<Phase>, StoreError> {
        self.query_all(
            &format!("list phases of task {task_id}"),
            &format!("SELECT {PHASE_COLUMNS} FROM phases WHERE task_id=?1 ORDER BY rowid ASC"),
            params![task_id],
            phase_from_row,
        )
    }

    pub fn delete_phase(&self, task_id: &str, phase_id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete phase {phase_id} of task {task_id}"),
            "DELETE FROM phases WHERE task_id=?1 AND phase_id=?2",
            params![task_id, phase_id],
        )?;
        Ok(removed > 0)
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, phase), fields(task_id = %phase.task_id, phase_id = %phase.phase_id))]
    pub fn save_phase(&mut self, phase: &Phase) -> Result<(), StoreError> {
        self.write(|tx| tx.save_phase(phase))
    }

    pub fn get_phase(&self, task_id: &str, phase_id: &str) -> Result<Option<Phase>, StoreError> {
        self.direct(|tx| tx.get_phase(task_id, phase_id))
    }

    pub fn list_phases(&self, task_id: &str) -> Result<Vec<Phase>, StoreError> {
        self.direct(|tx| tx.list_phases(task_id))
    }

    pub fn delete_phase(&mut self, task_id: &str, phase_id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_phase(task_id, phase_id))
    }
}
