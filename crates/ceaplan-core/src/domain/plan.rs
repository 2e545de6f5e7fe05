//! ExecutionPlan: what should run, with which inputs.
//!
//! Plans are never executed here. `missing_inputs` is informational; a plan with
//! missing inputs is still a successful answer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::catalog::EntryRef;

/// One resolved step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// 1-indexed position in the plan.
    pub index: usize,
    pub entry: EntryRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default)]
    pub invocation: String,
    /// Resolved invocation parameters (satisfied values, defaults, step overrides).
    pub parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub selected: EntryRef,
    pub score: u32,
    pub steps: Vec<PlanStep>,
    /// Declared-required inputs of the selected entry.
    pub required_inputs: BTreeSet<String>,
    pub satisfied_inputs: BTreeSet<String>,
    /// Required inputs that fall back to a declared default or a step override.
    #[serde(default)]
    pub defaultable_inputs: BTreeSet<String>,
    pub missing_inputs: BTreeSet<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub explanation: String,
}

impl ExecutionPlan {
    pub fn is_complete(&self) -> bool {
        self.missing_inputs.is_empty()
    }
}
