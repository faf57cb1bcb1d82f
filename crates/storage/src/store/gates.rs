#![forbid(unsafe_code)]

use super::rows::{enum_col, ts_col, ts_text};
use super::*;
use orc_core::gates::{GateState, current_decision, normalize_decision, resolve_gate_type};
use orc_core::ids::normalize_id;
use orc_core::model::{GateDecision, GateType, NewGateDecision, PhaseGate, TaskGateOverride};
use rusqlite::{Row, params};
use std::collections::BTreeMap;

const DECISION_COLUMNS: &str =
    "id, task_id, phase, gate_type, outcome, reason, decided_by, decided_at";

fn decision_from_row(row: &Row<'_>) -> rusqlite::Result<GateDecision> {
    Ok(GateDecision {
        id: row.get(0)?,
        task_id: row.get(1)?,
        phase: row.get(2)?,
        gate_type: enum_col(row, 3)?,
        outcome: enum_col(row, 4)?,
        reason: row.get(5)?,
        decided_by: row.get(6)?,
        decided_at: ts_col(row, 7)?,
    })
}

fn override_from_row(row: &Row<'_>) -> rusqlite::Result<TaskGateOverride> {
    Ok(TaskGateOverride {
        task_id: row.get(0)?,
        phase_id: row.get(1)?,
        gate_type: enum_col(row, 2)?,
    })
}

impl TxOps<'_> {
    /// Appends a decision; history is never rewritten.
    pub fn record_decision(&self, decision: NewGateDecision) -> Result<GateDecision, StoreError> {
        let decision = normalize_decision(decision);
        let task_id = normalize_id(&decision.task_id)?;
        let phase = normalize_id(&decision.phase)?;
        self.ensure_task_exists(&task_id)?;

        let decided_at = self.now();
        let op = format!("record gate decision for {task_id}/{phase}");
        self.execute(
            &op,
            "INSERT INTO gate_decisions(task_id, phase, gate_type, outcome, reason, decided_by, decided_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                task_id,
                phase,
                decision.gate_type.as_str(),
                decision.outcome.as_str(),
                decision.reason,
                decision.decided_by,
                ts_text(decided_at),
            ],
        )?;
        let id = self
            .query_one(&op, "SELECT last_insert_rowid()", [], |row| row.get(0))?
            .unwrap_or_default();

        Ok(GateDecision {
            id,
            task_id,
            phase,
            gate_type: decision.gate_type,
            outcome: decision.outcome,
            reason: decision.reason,
            decided_by: decision.decided_by,
            decided_at,
        })
    }

    /// Full history of one gate, oldest first.
    pub fn gate_history(&self, task_id: &str, phase: &str) -> Result<Vec<GateDecision>, StoreError> {
        self.query_all(
            &format!("list gate decisions for {task_id}/{phase}"),
            &format!(
                "SELECT {DECISION_COLUMNS} FROM gate_decisions \
                 WHERE task_id=?1 AND phase=?2 ORDER BY id ASC"
            ),
            params![task_id, phase],
            decision_from_row,
        )
    }

    /// Every decision recorded for a task, in insertion order.
    pub fn list_decisions(&self, task_id: &str) -> Result<Vec<GateDecision>, StoreError> {
        self.query_all(
            &format!("list gate decisions for {task_id}"),
            &format!("SELECT {DECISION_COLUMNS} FROM gate_decisions WHERE task_id=?1 ORDER BY id ASC"),
            params![task_id],
            decision_from_row,
        )
    }

    /// Latest decision by time, ties broken by insertion order. Compared on
    /// parsed timestamps so mixed text layouts order correctly.
    pub fn current_decision(&self, task_id: &str, phase: &str) -> Result<Option<GateDecision>, StoreError> {
        let history = self.gate_history(task_id, phase)?;
        Ok(current_decision(&history).cloned())
    }

    pub fn gate_state(&self, task_id: &str, phase: &str) -> Result<GateState, StoreError> {
        let current = self.current_decision(task_id, phase)?;
        Ok(GateState::from_current(current.as_ref()))
    }

    pub fn save_phase_gate(&self, gate: &PhaseGate) -> Result<(), StoreError> {
        let phase_id = normalize_id(&gate.phase_id)?;
        self.execute(
            &format!("save phase gate {phase_id}"),
            "INSERT INTO phase_gates(phase_id, gate_type, enabled, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(phase_id) DO UPDATE SET gate_type=excluded.gate_type, \
             enabled=excluded.enabled, updated_at=excluded.updated_at",
            params![phase_id, gate.gate_type.as_str(), gate.enabled, self.now_text()],
        )?;
        Ok(())
    }

    pub fn phase_gate(&self, phase_id: &str) -> Result<Option<PhaseGate>, StoreError> {
        self.query_one(
            &format!("get phase gate {phase_id}"),
            "SELECT phase_id, gate_type, enabled FROM phase_gates WHERE phase_id=?1",
            params![phase_id],
            |row| {
                Ok(PhaseGate {
                    phase_id: row.get(0)?,
                    gate_type: enum_col(row, 1)?,
                    enabled: row.get(2)?,
                })
            },
        )
    }

    /// Sets (or replaces) the gate type used for one task's phase.
    pub fn set_gate_override(&self, entry: &TaskGateOverride) -> Result<(), StoreError> {
        let task_id = normalize_id(&entry.task_id)?;
        let phase_id = normalize_id(&entry.phase_id)?;
        self.execute(
            &format!("set gate override {task_id}/{phase_id}"),
            "INSERT INTO task_gate_overrides(task_id, phase_id, gate_type, created_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(task_id, phase_id) DO UPDATE SET gate_type=excluded.gate_type",
            params![task_id, phase_id, entry.gate_type.as_str(), self.now_text()],
        )?;
        Ok(())
    }

    /// Installs the override only if none exists. Exactly one concurrent
    /// caller sees `true`.
    pub fn claim_gate_override(&self, entry: &TaskGateOverride) -> Result<bool, StoreError> {
        let task_id = normalize_id(&entry.task_id)?;
        let phase_id = normalize_id(&entry.phase_id)?;
        let sql = self.dialect().insert_ignore(
            "task_gate_overrides",
            &["task_id", "phase_id", "gate_type", "created_at"],
        );
        let inserted = self.execute(
            &format!("claim gate override {task_id}/{phase_id}"),
            &sql,
            params![task_id, phase_id, entry.gate_type.as_str(), self.now_text()],
        )?;
        Ok(inserted > 0)
    }

    pub fn gate_override(&self, task_id: &str, phase_id: &str) -> Result<Option<TaskGateOverride>, StoreError> {
        self.query_one(
            &format!("get gate override {task_id}/{phase_id}"),
            "SELECT task_id, phase_id, gate_type FROM task_gate_overrides \
             WHERE task_id=?1 AND phase_id=?2",
            params![task_id, phase_id],
            override_from_row,
        )
    }

    /// Every override of one task, by phase id.
    pub fn list_gate_overrides(&self, task_id: &str) -> Result<Vec<TaskGateOverride>, StoreError> {
        self.query_all(
            &format!("list gate overrides for {task_id}"),
            "SELECT task_id, phase_id, gate_type FROM task_gate_overrides \
             WHERE task_id=?1 ORDER BY phase_id ASC",
            params![task_id],
            override_from_row,
        )
    }

    /// A task's overrides keyed by phase id, for resolving many phases at once.
    pub fn gate_overrides_by_phase(
        &self,
        task_id: &str,
    ) -> Result<BTreeMap<String, TaskGateOverride>, StoreError> {
        Ok(self
            .list_gate_overrides(task_id)?
            .into_iter()
            .map(|entry| (entry.phase_id.clone(), entry))
            .collect())
    }

    pub fn delete_gate_override(&self, task_id: &str, phase_id: &str) -> Result<bool, StoreError> {
        let removed = self.execute(
            &format!("delete gate override {task_id}/{phase_id}"),
            "DELETE FROM task_gate_overrides WHERE task_id=?1 AND phase_id=?2",
            params![task_id, phase_id],
        )?;
        Ok(removed > 0)
    }

    /// Gate type in force for a task's phase: task override, then the
    /// enabled phase gate, then the workflow phase's override, then the
    /// stored phase template's gate, then `global_default`.
    pub fn effective_gate_type(
        &self,
        task_id: &str,
        phase_id: &str,
        workflow_override: Option<GateType>,
        global_default: GateType,
    ) -> Result<GateType, StoreError> {
        let task_override = self
            .gate_override(task_id, phase_id)?
            .map(|entry| entry.gate_type);
        let phase_gate = self.phase_gate(phase_id)?;
        let template_gate = self
            .get_phase_template(phase_id)?
            .and_then(|template| template.gate_type);
        Ok(resolve_gate_type(
            task_override,
            phase_gate.as_ref(),
            workflow_override,
            template_gate,
            global_default,
        ))
    }
}

impl SqliteStore {
    #[tracing::instrument(level = "debug", skip(self, decision), fields(task_id = %decision.task_id, phase = %decision.phase))]
    pub fn record_decision(&mut self, decision: NewGateDecision) -> Result<GateDecision, StoreError> {
        self.write(|tx| tx.record_decision(decision))
    }

    pub fn gate_history(&self, task_id: &str, phase: &str) -> Result<Vec<GateDecision>, StoreError> {
        self.direct(|tx| tx.gate_history(task_id, phase))
    }

    pub fn list_decisions(&self, task_id: &str) -> Result<Vec<GateDecision>, StoreError> {
        self.direct(|tx| tx.list_decisions(task_id))
    }

    pub fn current_decision(&self, task_id: &str, phase: &str) -> Result<Option<GateDecision>, StoreError> {
        self.direct(|tx| tx.current_decision(task_id, phase))
    }

    pub fn gate_state(&self, task_id: &str, phase: &str) -> Result<GateState, StoreError> {
        self.direct(|tx| tx.gate_state(task_id, phase))
    }

    pub fn save_phase_gate(&mut self, gate: &PhaseGate) -> Result<(), StoreError> {
        self.write(|tx| tx.save_phase_gate(gate))
    }

    pub fn phase_gate(&self, phase_id: &str) -> Result<Option<PhaseGate>, StoreError> {
        self.direct(|tx| tx.phase_gate(phase_id))
    }

    pub fn set_gate_override(&mut self, entry: &TaskGateOverride) -> Result<(), StoreError> {
        self.write(|tx| tx.set_gate_override(entry))
    }

    pub fn claim_gate_override(&mut self, entry: &TaskGateOverride) -> Result<bool, StoreError> {
        self.write(|tx| tx.claim_gate_override(entry))
    }

    pub fn gate_override(&self, task_id: &str, phase_id: &str) -> Result<Option<TaskGateOverride>, StoreError> {
        self.direct(|tx| tx.gate_override(task_id, phase_id))
    }

    pub fn delete_gate_override(&mut self, task_id: &str, phase_id: &str) -> Result<bool, StoreError> {
        self.write(|tx| tx.delete_gate_override(task_id, phase_id))
    }

    pub fn list_gate_overrides(&self, task_id: &str) -> Result<Vec<TaskGateOverride>, StoreError> {
        self.direct(|tx| tx.list_gate_overrides(task_id))
    }

    pub fn gate_overrides_by_phase(
        &self,
        task_id: &str,
    ) -> Result<BTreeMap<String, TaskGateOverride>, StoreError> {
        self.direct(|tx| tx.gate_overrides_by_phase(task_id))
    }

    pub fn effective_gate_type(
        &self,
        task_id: &str,
        phase_id: &str,
        workflow_override: Option<GateType>,
        global_default: GateType,
    ) -> Result<GateType, StoreError> {
        self.direct(|tx| tx.effective_gate_type(task_id, phase_id, workflow_override, global_default))
    }
}
