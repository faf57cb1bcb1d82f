#![forbid(unsafe_code)]

use crate::macros::string_enum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

string_enum! {
    GateType as "gate type" {
        Auto => "auto",
        Ai => "ai",
        Human => "human",
        Skip => "skip",
    }
}

string_enum! {
    GateOutcome as "gate outcome" {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

/// One immutable approval record. Retries append new rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub id: i64,
    pub task_id: String,
    pub phase: String,
    pub gate_type: GateType,
    pub outcome: GateOutcome,
    pub reason: Option<String>,
    pub decided_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub decided_at: OffsetDateTime,
}

impl GateDecision {
    pub fn approved(&self) -> bool {
        self.outcome == GateOutcome::Approved
    }
}

/// Input for recording a decision; the store assigns `id` and `decided_at`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewGateDecision {
    pub task_id: String,
    pub phase: String,
    pub gate_type: GateType,
    pub outcome: GateOutcome,
    pub reason: Option<String>,
    pub decided_by: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseGate {
    pub phase_id: String,
    pub gate_type: GateType,
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGateOverride {
    pub task_id: String,
    pub phase_id: String,
    pub gate_type: GateType,
}
