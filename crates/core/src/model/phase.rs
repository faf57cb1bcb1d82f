#![forbid(unsafe_code)]

use super::Usage;
use crate::macros::string_enum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

string_enum! {
    PhaseStatus as "phase status" {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
        Interrupted => "interrupted",
        Skipped => "skipped",
        Blocked => "blocked",
    }
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// Per-task execution record of one phase, keyed by `(task_id, phase_id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub task_id: String,
    pub phase_id: String,
    pub status: PhaseStatus,
    pub iterations: u32,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub interrupted_at: Option<OffsetDateTime>,
    pub commit_sha: Option<String>,
    pub skip_reason: Option<String>,
    pub error: Option<String>,
    pub usage: Usage,
    /// Handle used to resume an agent session. Saving an empty value keeps
    /// the stored one.
    pub session_id: Option<String>,
}

impl Phase {
    pub fn new(task_id: impl Into<String>, phase_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            phase_id: phase_id.into(),
            status: PhaseStatus::default(),
            iterations: 0,
            started_at: None,
            completed_at: None,
            interrupted_at: None,
            commit_sha: None,
            skip_reason: None,
            error: None,
            usage: Usage::default(),
            session_id: None,
        }
    }
}
