#![forbid(unsafe_code)]

use crate::macros::string_enum;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

string_enum! {
    InitiativeStatus as "initiative status" {
        Draft => "draft",
        Active => "active",
        Completed => "completed",
        Archived => "archived",
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeOwner {
    pub initials: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Initiative {
    pub id: String,
    pub title: String,
    pub status: InitiativeStatus,
    pub vision: Option<String>,
    pub owner: InitiativeOwner,
    pub branch_base: Option<String>,
    pub branch_prefix: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Initiative {
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: InitiativeStatus::default(),
            vision: None,
            owner: InitiativeOwner::default(),
            branch_base: None,
            branch_prefix: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Position of a task inside an initiative's ordered list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeTaskRef {
    pub initiative_id: String,
    pub task_id: String,
    pub sequence: i64,
}

/// Append-only decision log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiativeDecision {
    pub id: String,
    pub initiative_id: String,
    pub decision: String,
    pub rationale: Option<String>,
    pub decided_by: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub decided_at: OffsetDateTime,
}
