#![forbid(unsafe_code)]

use super::rows::{enum_col, opt_enum_col, opt_u32_col, ts_col, ts_text, u32_col};
use super::*;
use orc_core::ids::normalize_id;
use orc_core::model::{PhaseTemplate, WorkflowVariable};
use rusqlite::{Row, params};

const TEMPLATE_COLUMNS: &str = "id, name, description, gate_type, max_iterations, \
     retry_from_phase, checkpoint, is_builtin, created_at, updated_at";

const VARIABLE_COLUMNS: &str = "workflow_id, name, description, source_type, source_config, \
     required, default_value, cache_ttl_seconds, script_content, extract";

fn template_from_row(row: &Row<'_>) -> rusqlite::Result<PhaseTemplate> {
    Ok(PhaseTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        gate_type: opt_enum_col(row, 3)?,
        max_iterations: opt_u32_col(row, 4)?,
        retry_from_phase: row.get(5)?,
        checkpoint: row.get(6)?,
        is_builtin: row.get(7)?,
        created_at: ts_col(row, 8)?,
        updated_at: ts_col(row, 9)?,
    })
}

fn variable_from_row(row: &Row<'_>) -> rusqlite::Result<WorkflowVariable> {
    Ok(WorkflowVariable {
        workflow_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        source_type: enum_col(row, 3)?,
        source_config: row.get(4)?,
        required: row.get(5)?,
        default_value: row.get(6)?,
        cache_ttl_seconds: u32_col(row, 7)?,
        script_content: row.get(8)?,
        extract: row.get(9)?,
    })
}

impl TxOps<'_> {
    /// Upserts a phase template. `created_at` and `is_builtin` are kept on
    /// update.
    pub fn save_phase_template(&self, template: &PhaseTemplate) -> Result<(), StoreError> {
        let id = normalize_id(&template.id)?;
        if template.name.trim().is_empty() {
            return Err(StoreError::InvalidInput("phase_template.name must not be empty"));
        }
        let retry_from = template
            .retry_from_phase
            .as_deref()
            .map(str::trim)
            .filter(|phase| !phase.is_empty());
        if retry_from == Some(id.as_str()) {
            return Err(StoreError::InvalidInput(
                "phase_template.retry_from_phase must name another phase",
            ));
        }
        self.execute(
            &format!("save phase template {id}"),
            &format!(
                "INSERT INTO phase_templates ({TEMPLATE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(id) DO UPDATE SET name=excluded.name, \
                 description=excluded.description, gate_type=excluded.gate_type, \
                 max_iterations=excluded.max_iterations, \
                 retry_from_phase=excluded.retry_from_phase, \
                 checkpoint=excluded.checkpoint, updated_at=excluded.updated_at"
            ),
            params![
                id,
                template.name.trim(),
                template.description,
                template.gate_type.map(|gate| gate.as_str()),
                template.max_iterations.map(i64::from),
                retry_from,
                template.checkpoint,
                template.is_builtin,
                ts_text(template.created_at),
                self.now_text(),
            ],
        )?;
        Ok(())
    }

    pub fn get_phase_template(&self, id: &str) -> Result<Option<PhaseTemplate>, StoreError> {
        self.query_one(
            &format!("get phase template {id}"),
            &format!("SELECT {TEMPLATE_COLUMNS} FROM phase_templates WHERE id=?1"),
            params![id],
            template_from_row,
        )
    }

    /// Built-in templates first, then by name.
    pub fn list_phase_templates(&self) -> Result<Vec<PhaseTemplate>, StoreError> {
        self.query_all(
            "list phase templates",
            &format!(
                "SELECT {TEMPLATE_COLUMNS} FROM phase_templates \
                 ORDER BY is_builtin DESC, name ASC, id ASC"
            ),
            [],
            template_from_row,
        )
    }

    /// Stored templates for the given phase ids; ids without one are skipped.
    pub fn phase_templates_for(&self, ids: &[String]) -> Result<Vec<PhaseTemplate>, StoreError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(template) = self.get_phase_template(id)? {
                out.push(template);
            }
        }
        Ok(out)
    }

    /// Removes a user template. Built-in templates are never deleted.
    pub fn delete_phase_template(&self, id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete phase template {id}"),
            "DELETE FROM phase_templates WHERE id=?1 AND is_builtin=0",
            params![id],
        )?;
        Ok(removed > 0)
    }

    /// Upserts a variable of an existing workflow. `source_config` must be a
    /// JSON document.
    pub fn save_workflow_variable(&self, variable: &WorkflowVariable) -> Result<(), StoreError> {
        let workflow_id = normalize_id(&variable.workflow_id)?;
        let name = variable.name.trim();
        if name.is_empty() {
            return Err(StoreError::InvalidInput("workflow_variable.name must not be empty"));
        }
        if self.get_workflow(&workflow_id)?.is_none() {
            return Err(StoreError::UnknownId {
                entity: "workflow",
                id: workflow_id,
            });
        }
        serde_json::from_str::<serde_json::Value>(&variable.source_config).map_err(|source| {
            StoreError::Json {
                what: "workflow_variable.source_config",
                source,
            }
        })?;
        self.execute(
            &format!("save variable {name} of workflow {workflow_id}"),
            &format!(
                "INSERT INTO workflow_variables ({VARIABLE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(workflow_id, name) DO UPDATE SET \
                 description=excluded.description, source_type=excluded.source_type, \
                 source_config=excluded.source_config, required=excluded.required, \
                 default_value=excluded.default_value, \
                 cache_ttl_seconds=excluded.cache_ttl_seconds, \
                 script_content=excluded.script_content, extract=excluded.extract"
            ),
            params![
                workflow_id,
                name,
                variable.description,
                variable.source_type.as_str(),
                variable.source_config,
                variable.required,
                variable.default_value,
                i64::from(variable.cache_ttl_seconds),
                variable.script_content,
                variable.extract,
            ],
        )?;
        Ok(())
    }

    /// Variables of a workflow by name.
    pub fn workflow_variables(&self, workflow_id: &str) -> Result<Vec<WorkflowVariable>, StoreError> {
        self.query_all(
            &format!("list variables of workflow {workflow_id}"),
            &format!(
                "SELECT {VARIABLE_COLUMNS} FROM workflow_variables \
                 WHERE workflow_id=?1 ORDER BY name ASC"
            ),
            params![workflow_id],
            variable_from_row,
        )
    }

    pub fn delete_workflow_variable(&self, workflow_id: &str, name: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete variable {name} of workflow {workflow_id}"),
            "DELETE FROM workflow_variables WHERE workflow_id=?1 AND name=?2",
            params![workflow_id, name],
        )?;
        Ok(removed > 0)
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, template), fields(template_id = %template.id))]
    pub fn save_phase_template(&mut self, template: &PhaseTemplate) -> Result<(), StoreError> {
        self.write(|tx| tx.save_phase_template(template))
    }

    pub fn get_phase_template(&self, id: &str) -> Result<Option<PhaseTemplate>, StoreError> {
        self.direct(|tx| tx.get_phase_template(id))
    }

    pub fn list_phase_templates(&self) -> Result<Vec<PhaseTemplate>, StoreError> {
        self.direct(|tx| tx.list_phase_templates())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_phase_template(&mut self, id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_phase_template(id))
    }

    #[tracing::instrument(level = "debug", skip(self, variable), fields(workflow_id = %variable.workflow_id, name = %variable.name))]
    pub fn save_workflow_variable(&mut self, variable: &WorkflowVariable) -> Result<(), StoreError> {
        self.write(|tx| tx.save_workflow_variable(variable))
    }

    pub fn workflow_variables(&self, workflow_id: &str) -> Result<Vec<WorkflowVariable>, StoreError> {
        self.direct(|tx| tx.workflow_variables(workflow_id))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete_workflow_variable(&mut self, workflow_id: &str, name: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_workflow_variable(workflow_id, name))
    }
}
