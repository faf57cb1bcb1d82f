#![forbid(unsafe_code)]

use super::rows::{
    enum_col, json_col, limit_offset, non_empty, opt_ts_col, opt_ts_text, to_json, ts_col,
    ts_text, u32_col, usage_cols,
};
use super::*;
use orc_core::ids::{IdKind, normalize_id};
use orc_core::model::{
    ExecutorClaim, Page, Pagination, PullRequestInfo, Task, TaskFilter, TaskState,
};
use rusqlite::{Row, params};

const TASK_COLUMNS: &str = "id, title, description, weight, workflow_id, status, state_status, \
     current_phase, queue, priority, category, initiative_id, branch, target_branch, \
     pr_url, pr_number, pr_status, pr_draft, metadata, \
     executor_pid, executor_hostname, executor_started_at, last_heartbeat, \
     input_tokens, output_tokens, cost_usd, created_at, started_at, completed_at, updated_at";

const TASK_FILTER: &str = "(?1 IS NULL OR status=?1) \
     AND (?2 IS NULL OR COALESCE(state_status, 'pending')=?2) \
     AND (?3 IS NULL OR COALESCE(queue, 'active')=?3) \
     AND (?4 IS NULL OR COALESCE(priority, 'normal')=?4) \
     AND (?5 IS NULL OR COALESCE(category, 'feature')=?5) \
     AND (?6 IS NULL OR initiative_id=?6)";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        weight: enum_col(row, 3)?,
        workflow_id: row.get(4)?,
        status: enum_col(row, 5)?,
        state_status: enum_col(row, 6)?,
        current_phase: row.get(7)?,
        queue: enum_col(row, 8)?,
        priority: enum_col(row, 9)?,
        category: enum_col(row, 10)?,
        initiative_id: row.get(11)?,
        branch: row.get(12)?,
        target_branch: row.get(13)?,
        pr: PullRequestInfo {
            url: row.get(14)?,
            number: row.get(15)?,
            status: row.get(16)?,
            draft: row.get(17)?,
        },
        metadata: json_col(row, 18)?,
        executor: ExecutorClaim {
            pid: u32_col(row, 19)?,
            hostname: row.get(20)?,
            started_at: opt_ts_col(row, 21)?,
            last_heartbeat: opt_ts_col(row, 22)?,
        },
        usage: usage_cols(row, 23)?,
        created_at: ts_col(row, 26)?,
        started_at: opt_ts_col(row, 27)?,
        completed_at: opt_ts_col(row, 28)?,
        updated_at: ts_col(row, 29)?,
    })
}

fn validate_task(task: &Task) -> Result<String, StoreError> {
    let id = normalize_id(&task.id)?;
    if task.title.trim().is_empty() {
        return Err(StoreError::InvalidInput("task.title must not be empty"));
    }
    if let Some(initiative_id) = non_empty(&task.initiative_id) {
        normalize_id(initiative_id)?;
    }
    Ok(id)
}

impl TxOps<'_> {
    /// Upserts `task`. `created_at` and the executor claim are only written
    /// on insert; state transitions are checked against the stored row.
    pub fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        let id = validate_task(task)?;
        let op = format!("save task {id}");

        let stored: Option<TaskState> = self.query_one(
            &op,
            "SELECT state_status FROM tasks WHERE id=?1",
            params![id],
            |row| enum_col(row, 0),
        )?;
        if let Some(stored) = stored {
            if !stored.can_transition_to(task.state_status) {
                return Err(StoreError::InvalidTransition {
                    entity: "task",
                    id,
                    from: stored.as_str(),
                    to: task.state_status.as_str(),
                });
            }
        }

        let metadata = if task.metadata.is_empty() {
            None
        } else {
            Some(to_json("task.metadata", &task.metadata)?)
        };

        self.execute(
            &op,
            &format!(
                "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, \
                 ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, \
                 ?27, ?28, ?29, ?30) \
                 ON CONFLICT(id) DO UPDATE SET \
                 title=excluded.title, description=excluded.description, weight=excluded.weight, \
                 workflow_id=excluded.workflow_id, status=excluded.status, \
                 state_status=excluded.state_status, current_phase=excluded.current_phase, \
                 queue=excluded.queue, priority=excluded.priority, category=excluded.category, \
                 initiative_id=excluded.initiative_id, branch=excluded.branch, \
                 target_branch=excluded.target_branch, pr_url=excluded.pr_url, \
                 pr_number=excluded.pr_number, pr_status=excluded.pr_status, \
                 pr_draft=excluded.pr_draft, metadata=excluded.metadata, \
                 input_tokens=excluded.input_tokens, output_tokens=excluded.output_tokens, \
                 cost_usd=excluded.cost_usd, started_at=excluded.started_at, \
                 completed_at=excluded.completed_at, updated_at=excluded.updated_at"
            ),
            params![
                id,
                task.title.trim(),
                task.description,
                task.weight.as_str(),
                non_empty(&task.workflow_id),
                task.status.as_str(),
                task.state_status.as_str(),
                non_empty(&task.current_phase),
                task.queue.as_str(),
                task.priority.as_str(),
                task.category.as_str(),
                non_empty(&task.initiative_id),
                task.branch,
                task.target_branch,
                task.pr.url,
                task.pr.number,
                task.pr.status,
                task.pr.draft,
                metadata,
                i64::from(task.executor.pid),
                task.executor.hostname,
                opt_ts_text(task.executor.started_at),
                opt_ts_text(task.executor.last_heartbeat),
                task.usage.input_tokens,
                task.usage.output_tokens,
                task.usage.cost_usd,
                ts_text(task.created_at),
                opt_ts_text(task.started_at),
                opt_ts_text(task.completed_at),
                self.now_text(),
            ],
        )?;
        Ok(())
    }

    /// Inserts `task` under a freshly allocated `TASK-NNN` id.
    pub fn create_task(&self, mut task: Task) -> Result<Task, StoreError> {
        let now = self.now();
        task.id = self.next_id(IdKind::Task)?;
        task.created_at = now;
        task.updated_at = now;
        self.save_task(&task)?;
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.query_one(
            &format!("get task {id}"),
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id=?1"),
            params![id],
            task_from_row,
        )
    }

    pub fn list_tasks(&self, filter: &TaskFilter, page: Pagination) -> Result<Page<Task>, StoreError> {
        let (limit, offset) = limit_offset(page);
        let status = filter.status.map(|v| v.as_str());
        let state_status = filter.state_status.map(|v| v.as_str());
        let queue = filter.queue.map(|v| v.as_str());
        let priority = filter.priority.map(|v| v.as_str());
        let category = filter.category.map(|v| v.as_str());
        let initiative_id = filter.initiative_id.as_deref();

        let total = self.count(
            "count tasks",
            &format!("SELECT COUNT(1) FROM tasks WHERE {TASK_FILTER}"),
            params![status, state_status, queue, priority, category, initiative_id],
        )?;
        let items = self.query_all(
            "list tasks",
            &format!(
                "SELECT {TASK_COLUMNS} FROM tasks WHERE {TASK_FILTER} \
                 ORDER BY created_at DESC, id DESC LIMIT ?7 OFFSET ?8"
            ),
            params![
                status,
                state_status,
                queue,
                priority,
                category,
                initiative_id,
                limit,
                offset
            ],
            task_from_row,
        )?;
        Ok(Page { items, total })
    }

    /// Removes the task with its phases, gate history, overrides, dependency
    /// edges and initiative links. Workflow runs keep existing unlinked.
    pub fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete task {id}"),
            "DELETE FROM tasks WHERE id=?1",
            params![id],
        )?;
        Ok(removed > 0)
    }

    pub(crate) fn ensure_task_exists(&self, id: &str) -> Result<(), StoreError> {
        let found = self.query_one(
            &format!("lookup task {id}"),
            "SELECT 1 FROM tasks WHERE id=?1",
            params![id],
            |_| Ok(()),
        )?;
        match found {
            Some(()) => Ok(()),
            None => Err(StoreError::UnknownId {
                entity: "task",
                id: id.to_string(),
            }),
        }
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, task), fields(title = %task.title))]
    pub fn create_task(&mut self, task: Task) -> Result<Task, StoreError> {
        self.write(|tx| tx.create_task(task))
    }

    #[tracing::instrument(level = "debug", skip(self, task), fields(task_id = %task.id))]
    pub fn save_task(&mut self, task: &Task) -> Result<(), StoreError> {
        self.write(|tx| tx.save_task(task))
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        self.direct(|tx| tx.get_task(id))
    }

    pub fn list_tasks(&self, filter: &TaskFilter, page: Pagination) -> Result<Page<Task>, StoreError> {
        self.direct(|tx| tx.list_tasks(filter, page))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_task(&mut self, id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_task(id))
    }
}
