#![forbid(unsafe_code)]

use super::rows::{
    enum_col, json_col, opt_enum_col, opt_json_col, opt_u32_col, to_json, ts_col, ts_text,
};
use super::*;
use orc_core::ids::normalize_id;
use orc_core::model::{Workflow, WorkflowPhase};
use orc_core::workflow::ExecutionPlan;
use rusqlite::{Row, params};

const WORKFLOW_COLUMNS: &str = "id, name, description, workflow_type, created_at, updated_at";

const WORKFLOW_PHASE_COLUMNS: &str = "phase_template_id, sequence, depends_on, \
     gate_type_override, max_iterations_override, loop_config";

fn workflow_from_row(row: &Row<'_>) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        workflow_type: enum_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
    })
}

fn workflow_phase_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowPhase> {
    Ok(WorkflowPhase {
        phase_template_id: row.get(0)?,
        sequence: row.get(1)?,
        depends_on: json_col(row, 2)?,
        gate_type_override: opt_enum_col(row, 3)?,
        max_iterations_override: opt_u32_col(row, 4)?,
        loop_config: opt_json_col(row, 5)?,
    })
}

impl TxOps<'_> {
    /// Validates the phase graph, then stores the workflow and replaces its
    /// phase set. Nothing is written when the graph is invalid.
    pub fn save_workflow(
        &self,
        workflow: &Workflow,
        phases: &[WorkflowPhase],
    ) -> Result<ExecutionPlan, StoreError> {
        let id = normalize_id(&workflow.id)?;
        if workflow.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("workflow.name must not be empty"));
        }
        let plan = self.plan_for(phases)?;

        let op = format!("save workflow {id}");
        self.execute(
            &op,
            &format!(
                "INSERT INTO workflows ({WORKFLOW_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO UPDATE SET name=excluded.name, \
                 description=excluded.description, workflow_type=excluded.workflow_type, \
                 updated_at=excluded.updated_at"
            ),
            params![
                id,
                workflow.name.trim(),
                workflow.description,
                workflow.workflow_type.as_str(),
                ts_text(workflow.created_at),
                self.now_text(),
            ],
        )?;
        self.execute(
            &op,
            "DELETE FROM workflow_phases WHERE workflow_id=?1",
            params![id],
        )?;
        for phase in phases {
            self.upsert_workflow_phase(&op, &id, phase)?;
        }
        Ok(plan)
    }

    fn upsert_workflow_phase(
        &self,
        op: &str,
        workflow_id: &str,
        phase: &WorkflowPhase,
    ) -> Result<(), StoreError> {
        let depends_on = if phase.depends_on.is_empty() {
            None
        } else {
            Some(to_json("workflow_phase.depends_on", &phase.depends_on)?)
        };
        let loop_config = phase
            .loop_config
            .as_ref()
            .map(|config| to_json("workflow_phase.loop_config", config))
            .transpose()?;
        self.execute(
            op,
            &format!(
                "INSERT INTO workflow_phases (workflow_id, {WORKFLOW_PHASE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT(workflow_id, phase_template_id) DO UPDATE SET \
                 sequence=excluded.sequence, depends_on=excluded.depends_on, \
                 gate_type_override=excluded.gate_type_override, \
                 max_iterations_override=excluded.max_iterations_override, \
                 loop_config=excluded.loop_config"
            ),
            params![
                workflow_id,
                phase.phase_template_id,
                phase.sequence,
                depends_on,
                phase.gate_type_override.map(|gate| gate.as_str()),
                phase.max_iterations_override.map(i64::from),
                loop_config,
            ],
        )?;
        Ok(())
    }

    /// Resolves `phases` against whatever templates are stored for them.
    fn plan_for(&self, phases: &[WorkflowPhase]) -> Result<ExecutionPlan, StoreError> {
        let ids: Vec<String> = phases
            .iter()
            .map(|phase| phase.phase_template_id.clone())
            .collect();
        let templates = self.phase_templates_for(&ids)?;
        Ok(ExecutionPlan::resolve_with_templates(phases, &templates)?)
    }

    fn existing_workflow_phases(&self, workflow_id: &str) -> Result<Vec<WorkflowPhase>, StoreError> {
        if self.get_workflow(workflow_id)?.is_none() {
            return Err(StoreError::UnknownId {
                entity: "workflow",
                id: workflow_id.to_string(),
            });
        }
        self.workflow_phases(workflow_id)
    }

    /// Adds or replaces one phase of an existing workflow. The whole graph
    /// is re-validated first; nothing is written when it no longer resolves.
    pub fn save_workflow_phase(
        &self,
        workflow_id: &str,
        phase: &WorkflowPhase,
    ) -> Result<ExecutionPlan, StoreError> {
        let workflow_id = normalize_id(workflow_id)?;
        let phase_id = normalize_id(&phase.phase_template_id)?;
        let mut phases = self.existing_workflow_phases(&workflow_id)?;
        let mut phase = phase.clone();
        phase.phase_template_id = phase_id;
        match phases
            .iter_mut()
            .find(|existing| existing.phase_template_id == phase.phase_template_id)
        {
            Some(existing) => *existing = phase.clone(),
            None => phases.push(phase.clone()),
        }
        let plan = self.plan_for(&phases)?;
        let op = format!(
            "save phase {} of workflow {workflow_id}",
            phase.phase_template_id
        );
        self.upsert_workflow_phase(&op, &workflow_id, &phase)?;
        self.touch_workflow(&op, &workflow_id)?;
        Ok(plan)
    }

    /// Removes one phase. Fails when another phase still depends on or
    /// loops to it, or when it is the workflow's last phase.
    pub fn delete_workflow_phase(&self, workflow_id: &str, phase_id: &str) -> Result<bool, StoreError> {
        let mut phases = self.existing_workflow_phases(workflow_id)?;
        let before = phases.len();
        phases.retain(|phase| phase.phase_template_id != phase_id);
        if phases.len() == before {
            return Ok(false);
        }
        self.plan_for(&phases)?;
        let op = format!("delete phase {phase_id} of workflow {workflow_id}");
        self.execute(
            &op,
            "DELETE FROM workflow_phases WHERE workflow_id=?1 AND phase_template_id=?2",
            params![workflow_id, phase_id],
        )?;
        self.touch_workflow(&op, workflow_id)?;
        Ok(true)
    }

    fn touch_workflow(&self, op: &str, workflow_id: &str) -> Result<(), StoreError> {
        self.execute(
            op,
            "UPDATE workflows SET updated_at=?2 WHERE id=?1",
            params![workflow_id, self.now_text()],
        )?;
        Ok(())
    }

    pub fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        self.query_one(
            &format!("get workflow {id}"),
            &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id=?1"),
            params![id],
            workflow_from_row,
        )
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        self.query_all(
            "list workflows",
            &format!("SELECT {WORKFLOW_COLUMNS} FROM workflows ORDER BY id ASC"),
            [],
            workflow_from_row,
        )
    }

    pub fn workflow_phases(&self, workflow_id: &str) -> Result<Vec<WorkflowPhase>, StoreError> {
        self.query_all(
            &format!("list phases of workflow {workflow_id}"),
            &format!(
                "SELECT {WORKFLOW_PHASE_COLUMNS} FROM workflow_phases WHERE workflow_id=?1 \
                 ORDER BY sequence ASC, phase_template_id ASC"
            ),
            params![workflow_id],
            workflow_phase_from_row,
        )
    }

    /// Resolved execution plan of a stored workflow, with template gates and
    /// iteration budgets filled in.
    pub fn workflow_plan(&self, workflow_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        if self.get_workflow(workflow_id)?.is_none() {
            return Ok(None);
        }
        let phases = self.workflow_phases(workflow_id)?;
        Ok(Some(self.plan_for(&phases)?))
    }

    /// Removes the workflow, its phases and its runs.
    pub fn delete_workflow(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete workflow {id}"),
            "DELETE FROM workflows WHERE id=?1",
            params![id],
        )?;
        Ok(removed > 0)
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, workflow, phases), fields(workflow_id = %workflow.id, phases = phases.len()))]
    pub fn save_workflow(
        &mut self,
        workflow: &Workflow,
        phases: &[WorkflowPhase],
    ) -> Result<ExecutionPlan, StoreError> {
        self.write(|tx| tx.save_workflow(workflow, phases))
    }

    pub fn get_workflow(&self, id: &str) -> Result<Option<Workflow>, StoreError> {
        self.direct(|tx| tx.get_workflow(id))
    }

    pub fn list_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        self.direct(|tx| tx.list_workflows())
    }

    pub fn workflow_phases(&self, workflow_id: &str) -> Result<Vec<WorkflowPhase>, StoreError> {
        self.direct(|tx| tx.workflow_phases(workflow_id))
    }

    #[tracing::instrument(level = "debug", skip(self, phase), fields(phase_id = %phase.phase_template_id))]
    pub fn save_workflow_phase(
        &mut self,
        workflow_id: &str,
        phase: &WorkflowPhase,
    ) -> Result<ExecutionPlan, StoreError> {
        self.write(|tx| tx.save_workflow_phase(workflow_id, phase))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_workflow_phase(&mut self, workflow_id: &str, phase_id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_workflow_phase(workflow_id, phase_id))
    }

    pub fn workflow_plan(&self, workflow_id: &str) -> Result<Option<ExecutionPlan>, StoreError> {
        self.direct(|tx| tx.workflow_plan(workflow_id))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_workflow(&mut self, id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_workflow(id))
    }
}
