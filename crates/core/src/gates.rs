#![forbid(unsafe_code)]

use crate::model::{GateDecision, GateOutcome, GateType, NewGateDecision, PhaseGate};

pub const POLICY_DECIDER: &str = "policy";

/// Approval state of one `(task, phase)` gate, derived from its latest
/// decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateState {
    NoDecision,
    PendingReview,
    Approved,
    Rejected,
}

impl GateState {
    pub fn from_current(current: Option<&GateDecision>) -> Self {
        match current.map(|decision| decision.outcome) {
            None => Self::NoDecision,
            Some(GateOutcome::Pending) => Self::PendingReview,
            Some(GateOutcome::Approved) => Self::Approved,
            Some(GateOutcome::Rejected) => Self::Rejected,
        }
    }

    pub fn is_open(self) -> bool {
        self == Self::Approved
    }
}

/// Latest decision by `decided_at`; insertion order (`id`) breaks ties.
pub fn current_decision(decisions: &[GateDecision]) -> Option<&GateDecision> {
    decisions
        .iter()
        .max_by(|a, b| (a.decided_at, a.id).cmp(&(b.decided_at, b.id)))
}

/// Task override, then the phase's enabled gate, then the workflow phase
/// override, then the phase template's gate, then the global default.
pub fn resolve_gate_type(
    task_override: Option<GateType>,
    phase_gate: Option<&PhaseGate>,
    workflow_override: Option<GateType>,
    template_gate: Option<GateType>,
    global_default: GateType,
) -> GateType {
    task_override
        .or_else(|| {
            phase_gate
                .filter(|gate| gate.enabled)
                .map(|gate| gate.gate_type)
        })
        .or(workflow_override)
        .or(template_gate)
        .unwrap_or(global_default)
}

/// A skip gate is approved by policy whatever outcome was requested.
pub fn normalize_decision(mut decision: NewGateDecision) -> NewGateDecision {
    if decision.gate_type == GateType::Skip {
        decision.outcome = GateOutcome::Approved;
        if decision.decided_by.as_deref().is_none_or(str::is_empty) {
            decision.decided_by = Some(POLICY_DECIDER.to_string());
        }
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn decision(id: i64, outcome: GateOutcome, at: time::OffsetDateTime) -> GateDecision {
        GateDecision {
            id,
            task_id: "TASK-001".to_string(),
            phase: "review".to_string(),
            gate_type: GateType::Human,
            outcome,
            reason: None,
            decided_by: None,
            decided_at: at,
        }
    }

    #[test]
    fn current_is_latest_then_highest_id() {
        let early = datetime!(2026-01-01 10:00 UTC);
        let late = datetime!(2026-01-01 11:00 UTC);
        let rows = vec![
            decision(3, GateOutcome::Rejected, early),
            decision(1, GateOutcome::Approved, late),
            decision(2, GateOutcome::Pending, late),
        ];
        let current = current_decision(&rows).unwrap();
        assert_eq!(current.id, 2);
        assert_eq!(GateState::from_current(Some(current)), GateState::PendingReview);
        assert_eq!(GateState::from_current(None), GateState::NoDecision);
    }

    #[test]
    fn precedence_override_then_phase_then_workflow_then_template() {
        let enabled = PhaseGate {
            phase_id: "review".to_string(),
            gate_type: GateType::Ai,
            enabled: true,
        };
        let disabled = PhaseGate {
            enabled: false,
            ..enabled.clone()
        };
        assert_eq!(
            resolve_gate_type(Some(GateType::Human), Some(&enabled), None, None, GateType::Auto),
            GateType::Human
        );
        assert_eq!(
            resolve_gate_type(None, Some(&enabled), Some(GateType::Skip), None, GateType::Auto),
            GateType::Ai
        );
        assert_eq!(
            resolve_gate_type(
                None,
                Some(&disabled),
                Some(GateType::Skip),
                Some(GateType::Human),
                GateType::Auto
            ),
            GateType::Skip
        );
        assert_eq!(
            resolve_gate_type(None, Some(&disabled), None, Some(GateType::Human), GateType::Auto),
            GateType::Human
        );
        assert_eq!(
            resolve_gate_type(None, None, None, None, GateType::Auto),
            GateType::Auto
        );
    }

    #[test]
    fn skip_gates_are_approved_by_policy() {
        let normalized = normalize_decision(NewGateDecision {
            task_id: "TASK-001".to_string(),
            phase: "docs".to_string(),
            gate_type: GateType::Skip,
            outcome: GateOutcome::Rejected,
            reason: None,
            decided_by: None,
        });
        assert_eq!(normalized.outcome, GateOutcome::Approved);
        assert_eq!(normalized.decided_by.as_deref(), Some(POLICY_DECIDER));
    }
}
