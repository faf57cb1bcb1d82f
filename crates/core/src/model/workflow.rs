#![forbid(unsafe_code)]

use super::{GateType, Usage};
use crate::macros::string_enum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

pub const DEFAULT_MAX_LOOP_ITERATIONS: u32 = 3;

string_enum! {
    WorkflowType as "workflow type" {
        Task => "task",
        Branch => "branch",
        Standalone => "standalone",
    }
}

string_enum! {
    /// Predicate over a phase's output that requests a loop-back.
    LoopCondition as "loop condition" {
        HasFindings => "has_findings",
        NotEmpty => "not_empty",
        StatusNeedsFix => "status_needs_fix",
    }
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_LOOP_ITERATIONS
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopConfig {
    pub condition: LoopCondition,
    pub loop_to_phase: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl LoopConfig {
    pub fn new(condition: LoopCondition, loop_to_phase: impl Into<String>) -> Self {
        Self {
            condition,
            loop_to_phase: loop_to_phase.into(),
            max_iterations: DEFAULT_MAX_LOOP_ITERATIONS,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Zero means "unset" and falls back to the default bound.
    pub fn effective_max_iterations(&self) -> u32 {
        if self.max_iterations == 0 {
            DEFAULT_MAX_LOOP_ITERATIONS
        } else {
            self.max_iterations
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            workflow_type: WorkflowType::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One phase slot of a workflow. `sequence` is a coarse ordering hint;
/// `depends_on` names other phases of the same workflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPhase {
    pub phase_template_id: String,
    pub sequence: i32,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub gate_type_override: Option<GateType>,
    pub max_iterations_override: Option<u32>,
    pub loop_config: Option<LoopConfig>,
}

impl WorkflowPhase {
    pub fn new(phase_template_id: impl Into<String>, sequence: i32) -> Self {
        Self {
            phase_template_id: phase_template_id.into(),
            sequence,
            depends_on: Vec::new(),
            gate_type_override: None,
            max_iterations_override: None,
            loop_config: None,
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_loop(mut self, config: LoopConfig) -> Self {
        self.loop_config = Some(config);
        self
    }

    pub fn with_gate(mut self, gate_type: GateType) -> Self {
        self.gate_type_override = Some(gate_type);
        self
    }
}

/// Reusable phase definition that workflows link to by id. A workflow phase
/// with no stored template runs with the defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTemplate {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Gate used when neither the task nor the workflow names one.
    pub gate_type: Option<GateType>,
    /// Iteration budget of the phase; a workflow override wins.
    pub max_iterations: Option<u32>,
    pub retry_from_phase: Option<String>,
    #[serde(default)]
    pub checkpoint: bool,
    #[serde(default)]
    pub is_builtin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PhaseTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            gate_type: None,
            max_iterations: None,
            retry_from_phase: None,
            checkpoint: false,
            is_builtin: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_gate(mut self, gate_type: GateType) -> Self {
        self.gate_type = Some(gate_type);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

string_enum! {
    /// Where a workflow variable's value comes from at run start.
    VariableSource as "variable source" {
        Static => "static",
        Env => "env",
        Script => "script",
        Api => "api",
        PhaseOutput => "phase_output",
        PromptFragment => "prompt_fragment",
    }
}

/// Named input of a workflow, keyed `(workflow_id, name)`. Resolved values
/// are frozen into each run's variable snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowVariable {
    pub workflow_id: String,
    pub name: String,
    pub description: Option<String>,
    pub source_type: VariableSource,
    /// Source-specific settings as a JSON document.
    pub source_config: String,
    #[serde(default)]
    pub required: bool,
    pub default_value: Option<String>,
    #[serde(default)]
    pub cache_ttl_seconds: u32,
    pub script_content: Option<String>,
    /// JSON path applied to the raw value.
    pub extract: Option<String>,
}

impl WorkflowVariable {
    pub fn new(
        workflow_id: impl Into<String>,
        name: impl Into<String>,
        source_type: VariableSource,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            name: name.into(),
            description: None,
            source_type,
            source_config: "{}".to_string(),
            required: false,
            default_value: None,
            cache_ttl_seconds: 0,
            script_content: None,
            extract: None,
        }
    }
}

string_enum! {
    RunStatus as "run status" {
        Pending => "pending",
        Running => "running",
        Paused => "paused",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(
                next,
                Self::Paused | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Paused => matches!(next, Self::Running | Self::Cancelled | Self::Failed),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

string_enum! {
    RunContextType as "run context type" {
        Standalone => "standalone",
        Task => "task",
        Branch => "branch",
        Pr => "pr",
        Tag => "tag",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: String,
    pub workflow_id: String,
    pub context_type: RunContextType,
    pub context_data: Option<String>,
    /// Weak reference: survives deletion of the task as `None`.
    pub task_id: Option<String>,
    pub prompt: String,
    pub instructions: Option<String>,
    pub status: RunStatus,
    pub current_phase: Option<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    /// Variables resolved when the run started.
    pub variables: BTreeMap<String, String>,
    /// Sum of completed phase usage; maintained by the store.
    pub totals: Usage,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl WorkflowRun {
    pub fn new(
        id: impl Into<String>,
        workflow_id: impl Into<String>,
        prompt: impl Into<String>,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: id.into(),
            workflow_id: workflow_id.into(),
            context_type: RunContextType::default(),
            context_data: None,
            task_id: None,
            prompt: prompt.into(),
            instructions: None,
            status: RunStatus::default(),
            current_phase: None,
            started_at: None,
            completed_at: None,
            variables: BTreeMap::new(),
            totals: Usage::default(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

string_enum! {
    RunPhaseStatus as "run phase status" {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Skipped => "skipped",
    }
}

impl RunPhaseStatus {
    /// Counts as satisfied for dependents.
    pub fn is_success(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRunPhase {
    pub workflow_run_id: String,
    pub phase_template_id: String,
    pub status: RunPhaseStatus,
    /// Loop-backs taken from this phase so far.
    pub iterations: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub commit_sha: Option<String>,
    pub usage: Usage,
    pub content: Option<String>,
    pub error: Option<String>,
    pub session_id: Option<String>,
}

impl WorkflowRunPhase {
    pub fn new(workflow_run_id: impl Into<String>, phase_template_id: impl Into<String>) -> Self {
        Self {
            workflow_run_id: workflow_run_id.into(),
            phase_template_id: phase_template_id.into(),
            status: RunPhaseStatus::default(),
            iterations: 0,
            started_at: None,
            completed_at: None,
            commit_sha: None,
            usage: Usage::default(),
            content: None,
            error: None,
            session_id: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub workflow_id: Option<String>,
    pub task_id: Option<String>,
    pub status: Option<RunStatus>,
}
