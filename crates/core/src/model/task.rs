#![forbid(unsafe_code)]

use super::Usage;
use crate::macros::string_enum;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

string_enum! {
    /// Coarse lifecycle shown to users.
    TaskStatus as "task status" {
        Created => "created",
        Classifying => "classifying",
        Planned => "planned",
        Running => "running",
        Paused => "paused",
        Blocked => "blocked",
        Finalizing => "finalizing",
        Completed => "completed",
        Failed => "failed",
        Resolved => "resolved",
    }
}

impl TaskStatus {
    /// Statuses that unblock dependents.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Resolved)
    }
}

string_enum! {
    /// Executor-facing state. Drives orphan detection.
    TaskState as "task state" {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
        Paused => "paused",
        Interrupted => "interrupted",
        Skipped => "skipped",
    }
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// pending -> running -> {completed, failed, paused, interrupted};
    /// skipped only from pending; paused/interrupted may resume.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Skipped),
            Self::Running => matches!(
                next,
                Self::Completed | Self::Failed | Self::Paused | Self::Interrupted
            ),
            Self::Paused | Self::Interrupted => next == Self::Running,
            Self::Completed | Self::Failed | Self::Skipped => false,
        }
    }
}

string_enum! {
    TaskWeight as "task weight" {
        Medium => "medium",
        Trivial => "trivial",
        Small => "small",
        Large => "large",
    }
}

string_enum! {
    TaskQueue as "task queue" {
        Active => "active",
        Backlog => "backlog",
    }
}

string_enum! {
    TaskPriority as "task priority" {
        Normal => "normal",
        Critical => "critical",
        High => "high",
        Low => "low",
    }
}

impl TaskPriority {
    /// Lower sorts first.
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Normal => 2,
            Self::Low => 3,
        }
    }
}

string_enum! {
    TaskCategory as "task category" {
        Feature => "feature",
        Bug => "bug",
        Refactor => "refactor",
        Chore => "chore",
        Docs => "docs",
        Test => "test",
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub url: Option<String>,
    pub number: Option<i64>,
    pub status: Option<String>,
    pub draft: Option<bool>,
}

/// Identity and liveness of the process currently working a task.
/// A pid of 0 with an empty hostname means unclaimed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorClaim {
    pub pid: u32,
    pub hostname: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_heartbeat: Option<OffsetDateTime>,
}

impl ExecutorClaim {
    pub fn is_claimed(&self) -> bool {
        self.pid != 0 || !self.hostname.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub weight: TaskWeight,
    pub workflow_id: Option<String>,
    pub status: TaskStatus,
    pub state_status: TaskState,
    pub current_phase: Option<String>,
    pub queue: TaskQueue,
    pub priority: TaskPriority,
    pub category: TaskCategory,
    pub initiative_id: Option<String>,
    pub branch: Option<String>,
    pub target_branch: Option<String>,
    pub pr: PullRequestInfo,
    pub metadata: BTreeMap<String, String>,
    pub executor: ExecutorClaim,
    pub usage: Usage,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            weight: TaskWeight::default(),
            workflow_id: None,
            status: TaskStatus::default(),
            state_status: TaskState::default(),
            current_phase: None,
            queue: TaskQueue::default(),
            priority: TaskPriority::default(),
            category: TaskCategory::default(),
            initiative_id: None,
            branch: None,
            target_branch: None,
            pr: PullRequestInfo::default(),
            metadata: BTreeMap::new(),
            executor: ExecutorClaim::default(),
            usage: Usage::default(),
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }
}

/// Filters for task listings; `None` matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub state_status: Option<TaskState>,
    pub queue: Option<TaskQueue>,
    pub priority: Option<TaskPriority>,
    pub category: Option<TaskCategory>,
    pub initiative_id: Option<String>,
}
