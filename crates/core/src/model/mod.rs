#![forbid(unsafe_code)]

mod gate;
mod initiative;
mod phase;
mod task;
mod workflow;

pub use gate::*;
pub use initiative::*;
pub use phase::*;
pub use task::*;
pub use workflow::*;

use serde::{Deserialize, Serialize};

/// Returned when a stored or user-supplied string names no known variant.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Token and cost counters shared by tasks, phases and runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
}

impl Usage {
    pub fn is_zero(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0 && self.cost_usd == 0.0
    }

    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// One page of a filtered listing. `total` counts every row matching the
/// filter, independent of limit and offset.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: u32,
}

impl Pagination {
    pub fn all() -> Self {
        Self {
            limit: None,
            offset: 0,
        }
    }

    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::all()
    }
}
