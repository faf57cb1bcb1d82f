#![forbid(unsafe_code)]

use crate::model::{LoopCondition, LoopConfig};
use serde_json::Value;

impl LoopCondition {
    /// Empty output never requests a loop.
    pub fn is_met(self, output: &str) -> bool {
        let output = output.trim();
        if output.is_empty() {
            return false;
        }
        match self {
            Self::NotEmpty => output != "{}" && output != "[]",
            Self::HasFindings => match serde_json::from_str::<Value>(output) {
                Ok(value) => value
                    .get("findings")
                    .and_then(Value::as_array)
                    .is_some_and(|findings| !findings.is_empty()),
                Err(_) => false,
            },
            Self::StatusNeedsFix => match serde_json::from_str::<Value>(output) {
                Ok(value) => matches!(
                    value.get("status").and_then(Value::as_str),
                    Some("needs_fix" | "findings")
                ),
                Err(_) => false,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoopDecision {
    /// Proceed to the next phase.
    Continue,
    /// Re-run from `target`; `iteration` is the loop count after this one.
    LoopBack { target: String, iteration: u32 },
    /// The condition still held but the bound was reached; proceed anyway.
    Exhausted { target: String, iterations: u32 },
}

impl LoopDecision {
    pub fn loops_back(&self) -> bool {
        matches!(self, Self::LoopBack { .. })
    }
}

/// Decides what follows a phase that has `taken` loop-backs so far.
pub fn decide_loop(config: &LoopConfig, output: &str, taken: u32) -> LoopDecision {
    if !config.condition.is_met(output) {
        return LoopDecision::Continue;
    }
    let max = config.effective_max_iterations();
    if taken >= max {
        return LoopDecision::Exhausted {
            target: config.loop_to_phase.clone(),
            iterations: taken,
        };
    }
    LoopDecision::LoopBack {
        target: config.loop_to_phase.clone(),
        iteration: taken + 1,
    }
}
