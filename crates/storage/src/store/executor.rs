#![forbid(unsafe_code)]

use super::rows::{enum_col, opt_ts_col, u32_col};
use super::*;
use orc_core::liveness::ExecutorLiveness;
use rusqlite::{Row, params};
use time::Duration;

const LIVENESS_COLUMNS: &str =
    "id, state_status, executor_pid, executor_hostname, executor_started_at, last_heartbeat";

fn liveness_from_row(row: &Row<'_>) -> rusqlite::Result<ExecutorLiveness> {
    Ok(ExecutorLiveness {
        task_id: row.get(0)?,
        state_status: enum_col(row, 1)?,
        pid: u32_col(row, 2)?,
        hostname: row.get(3)?,
        started_at: opt_ts_col(row, 4)?,
        last_heartbeat: opt_ts_col(row, 5)?,
    })
}

impl TxOps<'_> {
    /// Claims `task_id` for an executor process. Stamps both the start time
    /// and the first heartbeat. Returns `false` when the task does not exist.
    pub fn set_executor(&self, task_id: &str, pid: u32, hostname: &str) -> Result<bool, StoreError> {
        let now = self.now_text();
        let updated = self.execute(
            &format!("set executor of task {task_id}"),
            "UPDATE tasks SET executor_pid=?2, executor_hostname=?3, \
             executor_started_at=?4, last_heartbeat=?4 WHERE id=?1",
            params![task_id, i64::from(pid), hostname.trim(), now],
        )?;
        Ok(updated > 0)
    }

    /// Refreshes `last_heartbeat` only.
    pub fn heartbeat(&self, task_id: &str) -> Result<bool, StoreError> {
        let updated = self.execute(
            &format!("heartbeat task {task_id}"),
            "UPDATE tasks SET last_heartbeat=?2 WHERE id=?1",
            params![task_id, self.now_text()],
        )?;
        Ok(updated > 0)
    }

    /// Releases the claim: pid 0, empty hostname.
    pub fn clear_executor(&self, task_id: &str) -> Result<bool, StoreError> {
        let updated = self.execute(
            &format!("clear executor of task {task_id}"),
            "UPDATE tasks SET executor_pid=0, executor_hostname='' WHERE id=?1",
            params![task_id],
        )?;
        Ok(updated > 0)
    }

    pub fn executor_liveness(&self, task_id: &str) -> Result<Option<ExecutorLiveness>, StoreError> {
        self.query_one(
            &format!("read executor of task {task_id}"),
            &format!("SELECT {LIVENESS_COLUMNS} FROM tasks WHERE id=?1"),
            params![task_id],
            liveness_from_row,
        )
    }

    /// Running tasks whose claim is older than `threshold` by the store
    /// clock.
    pub fn stale_tasks(&self, threshold: Duration) -> Result<Vec<ExecutorLiveness>, StoreError> {
        let now = self.now();
        let running = self.query_all(
            "scan running executors",
            &format!(
                "SELECT {LIVENESS_COLUMNS} FROM tasks WHERE state_status='running' ORDER BY id ASC"
            ),
            [],
            liveness_from_row,
        )?;
        Ok(running
            .into_iter()
            .filter(|liveness| liveness.is_stale(now, threshold))
            .collect())
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn set_executor(&self, task_id: &str, pid: u32, hostname: &str) -> Result<bool, StoreError> {
        self.direct(|tx| tx.set_executor(task_id, pid, hostname))
    }

    pub fn heartbeat(&self, task_id: &str) -> Result<bool, StoreError> {
        self.direct(|tx| tx.heartbeat(task_id))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn clear_executor(&self, task_id: &str) -> Result<bool, StoreError> {
        self.direct(|tx| tx.clear_executor(task_id))
    }

    pub fn executor_liveness(&self, task_id: &str) -> Result<Option<ExecutorLiveness>, StoreError> {
        self.direct(|tx| tx.executor_liveness(task_id))
    }

    /// `threshold` is caller policy; nothing is reclaimed automatically.
    pub fn stale_tasks(&self, threshold: Duration) -> Result<Vec<ExecutorLiveness>, StoreError> {
        self.direct(|tx| tx.stale_tasks(threshold))
    }
}
