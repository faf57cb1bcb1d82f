#![forbid(unsafe_code)]

use crate::model::{GateType, LoopConfig, PhaseTemplate, RunPhaseStatus, WorkflowPhase};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    #[error("workflow has no phases")]
    Empty,
    #[error("phase id must not be empty")]
    EmptyPhaseId,
    #[error("phase {0:?} is listed more than once")]
    DuplicatePhase(String),
    #[error("phase {0:?} depends on itself")]
    SelfDependency(String),
    #[error("phase {phase:?} depends on unknown phase {dependency:?}")]
    UnknownDependency { phase: String, dependency: String },
    #[error("phase dependencies form a cycle through {phases:?}")]
    Cycle { phases: Vec<String> },
    #[error("phase {phase:?} loops to unknown phase {target:?}")]
    UnknownLoopTarget { phase: String, target: String },
    #[error("phase {phase:?} loops to {target:?}, which does not run before it")]
    LoopTargetNotEarlier { phase: String, target: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedPhase {
    pub id: String,
    pub sequence: i32,
    /// Phases that must reach terminal success first, sorted.
    pub predecessors: Vec<String>,
    /// Parallel layer; 0 for roots.
    pub level: usize,
    pub gate_type_override: Option<GateType>,
    /// Gate configured on the phase's template, if one is stored.
    pub template_gate_type: Option<GateType>,
    /// Iteration budget: the workflow override, else the template's.
    pub max_iterations: Option<u32>,
    /// Loop config with the phase's iteration override already applied.
    pub loop_config: Option<LoopConfig>,
}

impl PlannedPhase {
    /// Gate configured for this slot: the workflow override, else the
    /// template's gate.
    pub fn configured_gate(&self) -> Option<GateType> {
        self.gate_type_override.or(self.template_gate_type)
    }
}

/// Topologically ordered, validated view of a workflow's phases.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionPlan {
    phases: Vec<PlannedPhase>,
    positions: BTreeMap<String, usize>,
}

impl ExecutionPlan {
    /// A phase's predecessors are its explicit `depends_on`, or, when that is
    /// empty, every phase in the nearest lower `sequence` cohort. Ties in the
    /// resulting order break by `(sequence, id)`.
    pub fn resolve(phases: &[WorkflowPhase]) -> Result<Self, PlanError> {
        Self::resolve_with_templates(phases, &[])
    }

    /// Like [`ExecutionPlan::resolve`], filling each phase's template gate and
    /// iteration budget from the matching entry of `templates`.
    pub fn resolve_with_templates(
        phases: &[WorkflowPhase],
        templates: &[PhaseTemplate],
    ) -> Result<Self, PlanError> {
        let templates: BTreeMap<&str, &PhaseTemplate> = templates
            .iter()
            .map(|template| (template.id.as_str(), template))
            .collect();
        if phases.is_empty() {
            return Err(PlanError::Empty);
        }

        let mut by_id: BTreeMap<&str, &WorkflowPhase> = BTreeMap::new();
        for phase in phases {
            let id = phase.phase_template_id.as_str();
            if id.trim().is_empty() {
                return Err(PlanError::EmptyPhaseId);
            }
            if by_id.insert(id, phase).is_some() {
                return Err(PlanError::DuplicatePhase(id.to_string()));
            }
        }

        let mut predecessors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for phase in phases {
            let id = phase.phase_template_id.as_str();
            let mut preds = BTreeSet::new();
            if phase.depends_on.is_empty() {
                let previous = phases
                    .iter()
                    .map(|p| p.sequence)
                    .filter(|seq| *seq < phase.sequence)
                    .max();
                if let Some(previous) = previous {
                    preds.extend(
                        phases
                            .iter()
                            .filter(|p| p.sequence == previous)
                            .map(|p| p.phase_template_id.as_str()),
                    );
                }
            } else {
                for dep in &phase.depends_on {
                    let dep = dep.as_str();
                    if dep == id {
                        return Err(PlanError::SelfDependency(id.to_string()));
                    }
                    if !by_id.contains_key(dep) {
                        return Err(PlanError::UnknownDependency {
                            phase: id.to_string(),
                            dependency: dep.to_string(),
                        });
                    }
                    preds.insert(dep);
                }
            }
            predecessors.insert(id, preds);
        }

        let mut successors: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
        for (id, preds) in &predecessors {
            remaining.insert(*id, preds.len());
            for pred in preds {
                successors.entry(*pred).or_default().push(*id);
            }
        }

        let mut ready: BTreeSet<(i32, &str)> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| (by_id[id].sequence, *id))
            .collect();
        let mut levels: BTreeMap<&str, usize> = BTreeMap::new();
        let mut ordered: Vec<PlannedPhase> = Vec::with_capacity(phases.len());

        while let Some(next) = ready.pop_first() {
            let (sequence, id) = next;
            let preds = &predecessors[id];
            let level = preds
                .iter()
                .filter_map(|pred| levels.get(pred))
                .map(|level| level + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id, level);

            let source = by_id[id];
            let template = templates.get(id);
            ordered.push(PlannedPhase {
                id: id.to_string(),
                sequence,
                predecessors: preds.iter().map(|p| p.to_string()).collect(),
                level,
                gate_type_override: source.gate_type_override,
                template_gate_type: template.and_then(|t| t.gate_type),
                max_iterations: source
                    .max_iterations_override
                    .or_else(|| template.and_then(|t| t.max_iterations)),
                loop_config: source.loop_config.clone().map(|config| {
                    match source.max_iterations_override {
                        Some(max) => config.with_max_iterations(max),
                        None => config,
                    }
                }),
            });

            for succ in successors.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(succ) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((by_id[succ].sequence, *succ));
                    }
                }
            }
        }

        if ordered.len() < phases.len() {
            let phases = remaining
                .iter()
                .filter(|(id, _)| !levels.contains_key(*id))
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(PlanError::Cycle { phases });
        }

        let positions: BTreeMap<String, usize> = ordered
            .iter()
            .enumerate()
            .map(|(index, phase)| (phase.id.clone(), index))
            .collect();

        for phase in &ordered {
            let Some(config) = phase.loop_config.as_ref() else {
                continue;
            };
            let Some(target) = positions.get(&config.loop_to_phase) else {
                return Err(PlanError::UnknownLoopTarget {
                    phase: phase.id.clone(),
                    target: config.loop_to_phase.clone(),
                });
            };
            if *target >= positions[&phase.id] {
                return Err(PlanError::LoopTargetNotEarlier {
                    phase: phase.id.clone(),
                    target: config.loop_to_phase.clone(),
                });
            }
        }

        Ok(Self {
            phases: ordered,
            positions,
        })
    }

    pub fn phases(&self) -> &[PlannedPhase] {
        &self.phases
    }

    pub fn order(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn phase(&self, id: &str) -> Option<&PlannedPhase> {
        self.position(id).map(|index| &self.phases[index])
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Phases grouped into layers that may run in parallel.
    pub fn cohorts(&self) -> Vec<Vec<&str>> {
        let mut cohorts: Vec<Vec<&str>> = Vec::new();
        for phase in &self.phases {
            if cohorts.len() <= phase.level {
                cohorts.resize_with(phase.level + 1, Vec::new);
            }
            cohorts[phase.level].push(phase.id.as_str());
        }
        cohorts
    }

    /// Phases that have not started and whose predecessors all reached
    /// terminal success. Missing statuses count as pending.
    pub fn eligible(&self, statuses: &BTreeMap<String, RunPhaseStatus>) -> Vec<&str> {
        let status_of = |id: &str| statuses.get(id).copied().unwrap_or_default();
        self.phases
            .iter()
            .filter(|phase| status_of(&phase.id) == RunPhaseStatus::Pending)
            .filter(|phase| {
                phase
                    .predecessors
                    .iter()
                    .all(|pred| status_of(pred).is_success())
            })
            .map(|phase| phase.id.as_str())
            .collect()
    }

    /// Phases re-run by a loop-back from `phase_id`, in plan order: the loop
    /// target, the phase itself, and every phase on a dependency path between
    /// them. Parallel branches off that path are left alone. Empty when
    /// `phase_id` has no loop config.
    pub fn loop_span(&self, phase_id: &str) -> Vec<&PlannedPhase> {
        let Some(end) = self.position(phase_id) else {
            return Vec::new();
        };
        let Some(start) = self
            .phases[end]
            .loop_config
            .as_ref()
            .and_then(|config| self.position(&config.loop_to_phase))
        else {
            return Vec::new();
        };
        let window = &self.phases[start..=end];

        let mut from_target: BTreeSet<&str> = BTreeSet::new();
        for phase in window {
            if phase.id == window[0].id
                || phase
                    .predecessors
                    .iter()
                    .any(|pred| from_target.contains(pred.as_str()))
            {
                from_target.insert(phase.id.as_str());
            }
        }

        let mut to_end: BTreeSet<&str> = BTreeSet::from([phase_id]);
        for phase in window.iter().rev() {
            if to_end.contains(phase.id.as_str()) {
                to_end.extend(phase.predecessors.iter().map(String::as_str));
            }
        }

        window
            .iter()
            .filter(|phase| {
                let id = phase.id.as_str();
                id == phase_id
                    || id == window[0].id
                    || (from_target.contains(id) && to_end.contains(id))
            })
            .collect()
    }
}
