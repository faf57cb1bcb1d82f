#![forbid(unsafe_code)]

use super::rows::{
    enum_col, json_col, limit_offset, non_empty, opt_ts_col, opt_ts_text, to_json, ts_col,
    ts_text, u32_col, usage_cols,
};
use super::*;
use orc_core::ids::{IdKind, normalize_id};
use orc_core::model::{
    Page, Pagination, RunFilter, RunPhaseStatus, RunStatus, WorkflowRun, WorkflowRunPhase,
};
use orc_core::workflow::{LoopDecision, decide_loop};
use rusqlite::{Row, params};
use std::collections::BTreeMap;

const RUN_COLUMNS: &str = "id, workflow_id, context_type, context_data, task_id, prompt, \
     instructions, status, current_phase, started_at, completed_at, variables_snapshot, \
     total_input_tokens, total_output_tokens, total_cost_usd, error, created_at, updated_at";

const RUN_FILTER: &str = "(?1 IS NULL OR workflow_id=?1) \
     AND (?2 IS NULL OR task_id=?2) \
     AND (?3 IS NULL OR status=?3)";

const RUN_PHASE_COLUMNS: &str = "workflow_run_id, phase_template_id, status, iterations, \
     started_at, completed_at, commit_sha, input_tokens, output_tokens, cost_usd, content, \
     error, session_id";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowRun> {
    Ok(WorkflowRun {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        context_type: enum_col(row, 2)?,
        context_data: row.get(3)?,
        task_id: row.get(4)?,
        prompt: row.get(5)?,
        instructions: row.get(6)?,
        status: enum_col(row, 7)?,
        current_phase: row.get(8)?,
        started_at: opt_ts_col(row, 9)?,
        completed_at: opt_ts_col(row, 10)?,
        variables: json_col(row, 11)?,
        totals: usage_cols(row, 12)?,
        error: row.get(15)?,
        created_at: ts_col(row, 16)?,
        updated_at: ts_col(row, 17)?,
    })
}

fn run_phase_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowRunPhase> {
    Ok(WorkflowRunPhase {
        workflow_run_id: row.get(0)?,
        phase_template_id: row.get(1)?,
        status: enum_col(row, 2)?,
        iterations: u32_col(row, 3)?,
        started_at: opt_ts_col(row, 4)?,
        completed_at: opt_ts_col(row, 5)?,
        commit_sha: row.get(6)?,
        usage: usage_cols(row, 7)?,
        content: row.get(10)?,
        error: row.get(11)?,
        session_id: row.get(12)?,
    })
}

impl TxOps<'_> {
    fn stored_run_status(&self, run_id: &str) -> Result<Option<RunStatus>, StoreError> {
        self.query_one(
            &format!("read status of run {run_id}"),
            "SELECT status FROM workflow_runs WHERE id=?1",
            params![run_id],
            |row| enum_col(row, 0),
        )
    }

    /// Fails unless `run_id` exists and can still be written to.
    fn writable_run_status(&self, run_id: &str) -> Result<RunStatus, StoreError> {
        let Some(status) = self.stored_run_status(run_id)? else {
            return Err(StoreError::UnknownId {
                entity: "workflow run",
                id: run_id.to_string(),
            });
        };
        if status.is_terminal() {
            return Err(StoreError::RunTerminal {
                run_id: run_id.to_string(),
                status: status.as_str(),
            });
        }
        Ok(status)
    }

    /// Upserts a run. Status changes follow the run lifecycle and a run in
    /// a terminal status is never rewritten. Running totals and
    /// `created_at` are owned by the store and never taken from `run` on
    /// update.
    pub fn save_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let id = normalize_id(&run.id)?;
        let workflow_id = normalize_id(&run.workflow_id)?;
        if let Some(stored) = self.stored_run_status(&id)? {
            if stored.is_terminal() {
                return Err(StoreError::RunTerminal {
                    run_id: id,
                    status: stored.as_str(),
                });
            }
            if stored != run.status && !stored.can_transition_to(run.status) {
                return Err(StoreError::InvalidTransition {
                    entity: "workflow run",
                    id,
                    from: stored.as_str(),
                    to: run.status.as_str(),
                });
            }
        }

        let variables = if run.variables.is_empty() {
            None
        } else {
            Some(to_json("workflow_run.variables", &run.variables)?)
        };
        self.execute(
            &format!("save workflow run {id}"),
            &format!(
                "INSERT INTO workflow_runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, \
                 ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18) \
                 ON CONFLICT(id) DO UPDATE SET \
                 workflow_id=excluded.workflow_id, context_type=excluded.context_type, \
                 context_data=excluded.context_data, task_id=excluded.task_id, \
                 prompt=excluded.prompt, instructions=excluded.instructions, \
                 status=excluded.status, current_phase=excluded.current_phase, \
                 started_at=excluded.started_at, completed_at=excluded.completed_at, \
                 variables_snapshot=excluded.variables_snapshot, error=excluded.error, \
                 updated_at=excluded.updated_at"
            ),
            params![
                id,
                workflow_id,
                run.context_type.as_str(),
                run.context_data,
                non_empty(&run.task_id),
                run.prompt,
                run.instructions,
                run.status.as_str(),
                non_empty(&run.current_phase),
                opt_ts_text(run.started_at),
                opt_ts_text(run.completed_at),
                variables,
                run.totals.input_tokens,
                run.totals.output_tokens,
                run.totals.cost_usd,
                run.error,
                ts_text(run.created_at),
                self.now_text(),
            ],
        )?;
        Ok(())
    }

    /// Inserts `run` under a fresh `RUN-NNN` id with zeroed totals.
    pub fn create_run(&self, mut run: WorkflowRun) -> Result<WorkflowRun, StoreError> {
        let now = self.now();
        run.id = self.next_id(IdKind::Run)?;
        run.created_at = now;
        run.updated_at = now;
        run.totals = Default::default();
        self.save_run(&run)?;
        Ok(run)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        self.query_one(
            &format!("get workflow run {id}"),
            &format!("SELECT {RUN_COLUMNS} FROM workflow_runs WHERE id=?1"),
            params![id],
            run_from_row,
        )
    }

    pub fn list_runs(&self, filter: &RunFilter, page: Pagination) -> Result<Page<WorkflowRun>, StoreError> {
        let (limit, offset) = limit_offset(page);
        let workflow_id = filter.workflow_id.as_deref();
        let task_id = filter.task_id.as_deref();
        let status = filter.status.map(RunStatus::as_str);

        let total = self.count(
            "count workflow runs",
            &format!("SELECT COUNT(1) FROM workflow_runs WHERE {RUN_FILTER}"),
            params![workflow_id, task_id, status],
        )?;
        let items = self.query_all(
            "list workflow runs",
            &format!(
                "SELECT {RUN_COLUMNS} FROM workflow_runs WHERE {RUN_FILTER} \
                 ORDER BY created_at DESC, id DESC LIMIT ?4 OFFSET ?5"
            ),
            params![workflow_id, task_id, status, limit, offset],
            run_from_row,
        )?;
        Ok(Page { items, total })
    }

    pub fn delete_run(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete workflow run {id}"),
            "DELETE FROM workflow_runs WHERE id=?1",
            params![id],
        )?;
        Ok(removed > 0)
    }

    /// Moves a run to `status`, stamping `started_at` on first start and
    /// `completed_at` on reaching a terminal status.
    pub fn set_run_status(
        &self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<WorkflowRun, StoreError> {
        let Some(mut run) = self.get_run(run_id)? else {
            return Err(StoreError::UnknownId {
                entity: "workflow run",
                id: run_id.to_string(),
            });
        };
        let now = self.now();
        run.status = status;
        if status == RunStatus::Running && run.started_at.is_none() {
            run.started_at = Some(now);
        }
        if status.is_terminal() {
            run.completed_at = Some(now);
        }
        if let Some(error) = error {
            run.error = Some(error.to_string());
        }
        self.save_run(&run)?;
        run.updated_at = now;
        Ok(run)
    }

    /// Upserts a run phase. The phase must belong to the run's workflow.
    /// Its usage is added to the run totals once, when it first becomes
    /// `completed`.
    pub fn save_run_phase(&self, phase: &WorkflowRunPhase) -> Result<(), StoreError> {
        let run_id = normalize_id(&phase.workflow_run_id)?;
        let phase_id = normalize_id(&phase.phase_template_id)?;
        self.writable_run_status(&run_id)?;
        let Some(run) = self.get_run(&run_id)? else {
            return Err(StoreError::UnknownId {
                entity: "workflow run",
                id: run_id,
            });
        };
        if self.run_plan(&run)?.phase(&phase_id).is_none() {
            return Err(StoreError::UnknownId {
                entity: "workflow phase",
                id: phase_id,
            });
        }

        let op = format!("save phase {phase_id} of run {run_id}");
        let previous: Option<RunPhaseStatus> = self.query_one(
            &op,
            "SELECT status FROM workflow_run_phases WHERE workflow_run_id=?1 AND phase_template_id=?2",
            params![run_id, phase_id],
            |row| enum_col(row, 0),
        )?;

        self.execute(
            &op,
            &format!(
                "INSERT INTO workflow_run_phases ({RUN_PHASE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13) \
                 ON CONFLICT(workflow_run_id, phase_template_id) DO UPDATE SET \
                 status=excluded.status, \
                 iterations=MAX(workflow_run_phases.iterations, excluded.iterations), \
                 started_at=excluded.started_at, completed_at=excluded.completed_at, \
                 commit_sha=excluded.commit_sha, input_tokens=excluded.input_tokens, \
                 output_tokens=excluded.output_tokens, cost_usd=excluded.cost_usd, \
                 content=excluded.content, error=excluded.error, \
                 session_id=COALESCE(excluded.session_id, workflow_run_phases.session_id)"
            ),
            params![
                run_id,
                phase_id,
                phase.status.as_str(),
                i64::from(phase.iterations),
                opt_ts_text(phase.started_at),
                opt_ts_text(phase.completed_at),
                phase.commit_sha,
                phase.usage.input_tokens,
                phase.usage.output_tokens,
                phase.usage.cost_usd,
                phase.content,
                phase.error,
                non_empty(&phase.session_id),
            ],
        )?;

        let newly_completed = phase.status == RunPhaseStatus::Completed
            && previous != Some(RunPhaseStatus::Completed);
        if newly_completed && !phase.usage.is_zero() {
            self.execute(
                &op,
                "UPDATE workflow_runs SET total_input_tokens=total_input_tokens + ?2, \
                 total_output_tokens=total_output_tokens + ?3, \
                 total_cost_usd=total_cost_usd + ?4, updated_at=?5 WHERE id=?1",
                params![
                    run_id,
                    phase.usage.input_tokens,
                    phase.usage.output_tokens,
                    phase.usage.cost_usd,
                    self.now_text(),
                ],
            )?;
        }
        Ok(())
    }

    pub fn get_run_phase(
        &self,
        run_id: &str,
        phase_id: &str,
    ) -> Result<Option<WorkflowRunPhase>, StoreError> {
        self.query_one(
            &format!("get phase {phase_id} of run {run_id}"),
            &format!(
                "SELECT {RUN_PHASE_COLUMNS} FROM workflow_run_phases \
                 WHERE workflow_run_id=?1 AND phase_template_id=?2"
            ),
            params![run_id, phase_id],
            run_phase_from_row,
        )
    }

    /// Phases of a run in the order they were first saved.
    pub fn run_phases(&self, run_id: &str) -> Result<Vec<WorkflowRunPhase>, StoreError> {
        self.query_all(
            &format!("list phases of run {run_id}"),
            &format!(
                "SELECT {RUN_PHASE_COLUMNS} FROM workflow_run_phases \
                 WHERE workflow_run_id=?1 ORDER BY rowid ASC"
            ),
            params![run_id],
            run_phase_from_row,
        )
    }

    fn run_plan(&self, run: &WorkflowRun) -> Result<orc_core::workflow::ExecutionPlan, StoreError> {
        self.workflow_plan(&run.workflow_id)?
            .ok_or_else(|| StoreError::UnknownId {
                entity: "workflow",
                id: run.workflow_id.clone(),
            })
    }

    /// Phases of the run's workflow that may start now.
    pub fn eligible_phases(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        let Some(run) = self.get_run(run_id)? else {
            return Err(StoreError::UnknownId {
                entity: "workflow run",
                id: run_id.to_string(),
            });
        };
        if run.status.is_terminal() {
            return Ok(Vec::new());
        }
        let plan = self.run_plan(&run)?;
        let statuses: BTreeMap<String, RunPhaseStatus> = self
            .run_phases(run_id)?
            .into_iter()
            .map(|phase| (phase.phase_template_id, phase.status))
            .collect();
        Ok(plan
            .eligible(&statuses)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Evaluates the loop config of `phase_id` against its `output`. On a
    /// loop-back the phase's iteration count is bumped, the phases on the
    /// dependency paths from the loop target to `phase_id` return to
    /// `pending`, and the run points at the target.
    pub fn resolve_loop(
        &self,
        run_id: &str,
        phase_id: &str,
        output: &str,
    ) -> Result<LoopDecision, StoreError> {
        self.writable_run_status(run_id)?;
        let Some(run) = self.get_run(run_id)? else {
            return Err(StoreError::UnknownId {
                entity: "workflow run",
                id: run_id.to_string(),
            });
        };
        let plan = self.run_plan(&run)?;
        let Some(planned) = plan.phase(phase_id) else {
            return Err(StoreError::UnknownId {
                entity: "workflow phase",
                id: phase_id.to_string(),
            });
        };
        let Some(config) = planned.loop_config.as_ref() else {
            return Ok(LoopDecision::Continue);
        };

        let taken = self
            .get_run_phase(run_id, phase_id)?
            .map(|phase| phase.iterations)
            .unwrap_or(0);
        let decision = decide_loop(config, output, taken);

        match &decision {
            LoopDecision::LoopBack { target, iteration } => {
                let op = format!("loop run {run_id} from {phase_id} to {target}");
                for span in plan.loop_span(phase_id) {
                    self.execute(
                        &op,
                        "UPDATE workflow_run_phases SET status=?3, completed_at=NULL \
                         WHERE workflow_run_id=?1 AND phase_template_id=?2",
                        params![run_id, span.id, RunPhaseStatus::Pending.as_str()],
                    )?;
                }
                self.execute(
                    &op,
                    "INSERT INTO workflow_run_phases (workflow_run_id, phase_template_id, status, iterations) \
                     VALUES (?1, ?2, ?3, ?4) \
                     ON CONFLICT(workflow_run_id, phase_template_id) DO UPDATE SET \
                     iterations=excluded.iterations",
                    params![
                        run_id,
                        phase_id,
                        RunPhaseStatus::Pending.as_str(),
                        i64::from(*iteration)
                    ],
                )?;
                self.execute(
                    &op,
                    "UPDATE workflow_runs SET current_phase=?2, updated_at=?3 WHERE id=?1",
                    params![run_id, target, self.now_text()],
                )?;
                tracing::debug!(run_id, phase_id, target = %target, iteration, "loop back");
            }
            LoopDecision::Exhausted { target, iterations } => {
                tracing::info!(
                    run_id,
                    phase_id,
                    target = %target,
                    iterations,
                    "loop bound reached, continuing"
                );
            }
            LoopDecision::Continue => {}
        }
        Ok(decision)
    }

    /// Running runs keyed by the task they execute.
    pub fn running_runs_by_task(&self) -> Result<BTreeMap<String, WorkflowRun>, StoreError> {
        let runs = self.query_all(
            "list running workflow runs",
            &format!(
                "SELECT {RUN_COLUMNS} FROM workflow_runs \
                 WHERE status=?1 AND task_id IS NOT NULL ORDER BY created_at ASC, id ASC"
            ),
            params![RunStatus::Running.as_str()],
            run_from_row,
        )?;
        Ok(runs
            .into_iter()
            .filter_map(|run| run.task_id.clone().map(|task_id| (task_id, run)))
            .collect())
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, run), fields(workflow_id = %run.workflow_id))]
    pub fn create_run(&mut self, run: WorkflowRun) -> Result<WorkflowRun, StoreError> {
        self.write(|tx| tx.create_run(run))
    }

    #[tracing::instrument(level = "debug", skip(self, run), fields(run_id = %run.id, status = %run.status))]
    pub fn save_run(&mut self, run: &WorkflowRun) -> Result<(), StoreError> {
        self.write(|tx| tx.save_run(run))
    }

    pub fn get_run(&self, id: &str) -> Result<Option<WorkflowRun>, StoreError> {
        self.direct(|tx| tx.get_run(id))
    }

    pub fn list_runs(&self, filter: &RunFilter, page: Pagination) -> Result<Page<WorkflowRun>, StoreError> {
        self.direct(|tx| tx.list_runs(filter, page))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_run(&mut self, id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_run(id))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn set_run_status(
        &mut self,
        run_id: &str,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<WorkflowRun, StoreError> {
        self.write(|tx| tx.set_run_status(run_id, status, error))
    }

    #[tracing::instrument(level = "debug", skip(self, phase), fields(run_id = %phase.workflow_run_id, phase_id = %phase.phase_template_id))]
    pub fn save_run_phase(&mut self, phase: &WorkflowRunPhase) -> Result<(), StoreError> {
        self.write(|tx| tx.save_run_phase(phase))
    }

    pub fn get_run_phase(
        &self,
        run_id: &str,
        phase_id: &str,
    ) -> Result<Option<WorkflowRunPhase>, StoreError> {
        self.direct(|tx| tx.get_run_phase(run_id, phase_id))
    }

    pub fn run_phases(&self, run_id: &str) -> Result<Vec<WorkflowRunPhase>, StoreError> {
        self.direct(|tx| tx.run_phases(run_id))
    }

    pub fn eligible_phases(&self, run_id: &str) -> Result<Vec<String>, StoreError> {
        self.direct(|tx| tx.eligible_phases(run_id))
    }

    #[tracing::instrument(level = "debug", skip(self, output))]
    pub fn resolve_loop(
        &mut self,
        run_id: &str,
        phase_id: &str,
        output: &str,
    ) -> Result<LoopDecision, StoreError> {
        self.write(|tx| tx.resolve_loop(run_id, phase_id, output))
    }

    pub fn running_runs_by_task(&self) -> Result<BTreeMap<String, WorkflowRun>, StoreError> {
        self.direct(|tx| tx.running_runs_by_task())
    }
}
