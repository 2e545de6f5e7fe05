//! Workflow flattening and input resolution.
//!
//! Flatten: nested workflows are expanded depth-first in step order. The DFS keeps
//! the current path; reaching a workflow that is already on the path is a cycle.
//! A workflow reached twice along different branches is expanded twice.
//!
//! required  = ∪ step required inputs − outputs produced by an earlier step
//! missing   = required − (satisfied ∪ defaultable)

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::scoring::ScoredCandidate;
use crate::domain::{
    CatalogEntry, EntryKind, EntryRef, ExecutionPlan, FileKind, Intent, PlanStep, ProviderError,
    Scope, Script, Workflow,
};

/// Entries needed to flatten one candidate, keyed by id.
#[derive(Debug, Default)]
pub struct Lookup {
    scripts: BTreeMap<String, Script>,
    workflows: BTreeMap<String, Workflow>,
}

impl Lookup {
    /// Returns false when the id was already present.
    pub fn add(&mut self, entry: CatalogEntry) -> bool {
        if self.contains(entry.id()) {
            return false;
        }
        match entry {
            CatalogEntry::Script(s) => {
                self.scripts.insert(s.id.clone(), s);
            }
            CatalogEntry::Workflow(w) => {
                self.workflows.insert(w.id.clone(), w);
            }
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.scripts.contains_key(id) || self.workflows.contains_key(id)
    }

    /// Step references not yet present.
    pub fn unresolved(&self) -> BTreeSet<String> {
        self.workflows
            .values()
            .flat_map(|w| w.steps.iter())
            .filter(|step| !self.contains(&step.target))
            .map(|step| step.target.clone())
            .collect()
    }
}

/// A script step after flattening.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStep {
    pub script: Script,
    pub action: Option<String>,
    /// Step parameters, inner workflow steps overriding outer ones.
    pub overrides: BTreeMap<String, Value>,
}

pub fn flatten(entry: &CatalogEntry, lookup: &Lookup) -> Result<Vec<ResolvedStep>, ProviderError> {
    match entry {
        CatalogEntry::Script(script) => Ok(vec![ResolvedStep {
            script: script.clone(),
            action: None,
            overrides: BTreeMap::new(),
        }]),
        CatalogEntry::Workflow(workflow) => {
            let mut out = Vec::new();
            let mut path = Vec::new();
            expand(workflow, &BTreeMap::new(), lookup, &mut path, &mut out)?;
            Ok(out)
        }
    }
}

fn expand(
    workflow: &Workflow,
    inherited: &BTreeMap<String, Value>,
    lookup: &Lookup,
    path: &mut Vec<String>,
    out: &mut Vec<ResolvedStep>,
) -> Result<(), ProviderError> {
    path.push(workflow.id.clone());

    for step in &workflow.steps {
        let mut overrides = inherited.clone();
        overrides.extend(step.parameters.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(script) = lookup.scripts.get(&step.target) {
            out.push(ResolvedStep {
                script: script.clone(),
                action: step.action.clone(),
                overrides,
            });
        } else if let Some(inner) = lookup.workflows.get(&step.target) {
            if path.contains(&inner.id) {
                let mut cycle = path.clone();
                cycle.push(inner.id.clone());
                return Err(ProviderError::Malformed(format!(
                    "workflow cycle: {}",
                    cycle.join(" -> ")
                )));
            }
            expand(inner, &overrides, lookup, path, out)?;
        } else {
            return Err(ProviderError::Malformed(format!(
                "workflow {} references unknown entry {}",
                workflow.id, step.target
            )));
        }
    }

    path.pop();
    Ok(())
}

#[derive(Debug)]
struct Need {
    name: String,
    file_type: Option<String>,
    default: Option<Value>,
    required: bool,
}

/// Inputs the steps need from outside, in first-use order.
fn collect_needs(steps: &[ResolvedStep]) -> Vec<Need> {
    let mut produced = BTreeSet::new();
    let mut needs: Vec<Need> = Vec::new();

    for step in steps {
        for input in &step.script.inputs {
            if produced.contains(&input.name) {
                continue;
            }
            let default = step
                .overrides
                .get(&input.name)
                .cloned()
                .or_else(|| input.default.clone());
            match needs.iter_mut().find(|n| n.name == input.name) {
                Some(need) => {
                    need.required |= input.required;
                    if need.default.is_none() {
                        need.default = default;
                    }
                    if need.file_type.is_none() {
                        need.file_type = input.file_type.clone();
                    }
                }
                None => needs.push(Need {
                    name: input.name.clone(),
                    file_type: input.file_type.clone(),
                    default,
                    required: input.required,
                }),
            }
        }
        produced.extend(step.script.outputs.iter().map(|o| o.name.clone()));
    }
    needs
}

/// Values the intent itself supplies, keyed by input name.
fn satisfy(needs: &[Need], intent: &Intent) -> BTreeMap<String, Value> {
    let mut unused: Vec<_> = intent.files.iter().collect();
    let mut satisfied = BTreeMap::new();

    let ordered = needs
        .iter()
        .filter(|n| n.required)
        .chain(needs.iter().filter(|n| !n.required));

    for need in ordered {
        let direct = match need.name.as_str() {
            "algorithm" => intent.algorithm.clone().map(Value::String),
            "objectives" if !intent.objectives.is_empty() => Some(Value::Array(
                intent.objectives.iter().cloned().map(Value::String).collect(),
            )),
            "timestep" => intent.constraints.get("timestep").cloned().map(Value::String),
            _ => None,
        };
        let value = direct.or_else(|| {
            let kind = need.file_type.as_deref().and_then(FileKind::from_extension)?;
            let pos = unused.iter().position(|m| m.kind == kind)?;
            Some(Value::String(unused.remove(pos).name.clone()))
        });
        if let Some(value) = value {
            satisfied.insert(need.name.clone(), value);
        }
    }
    satisfied
}

/// `{name}` placeholders replaced by parameter values; unknown ones are kept.
pub fn render_invocation(template: &str, parameters: &BTreeMap<String, Value>) -> String {
    parameters
        .iter()
        .fold(template.to_string(), |acc, (name, value)| {
            acc.replace(&format!("{{{name}}}"), &display_value(value))
        })
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(display_value).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

pub fn build_plan(candidate: &ScoredCandidate, steps: &[ResolvedStep], intent: &Intent) -> ExecutionPlan {
    let needs = collect_needs(steps);
    let satisfied = satisfy(&needs, intent);

    let required: BTreeSet<String> = needs
        .iter()
        .filter(|n| n.required)
        .map(|n| n.name.clone())
        .collect();
    let defaultable: BTreeSet<String> = needs
        .iter()
        .filter(|n| n.required && n.default.is_some())
        .map(|n| n.name.clone())
        .collect();
    let missing: BTreeSet<String> = required
        .iter()
        .filter(|name| !satisfied.contains_key(*name) && !defaultable.contains(*name))
        .cloned()
        .collect();

    let mut produced: BTreeMap<String, String> = BTreeMap::new();
    let mut plan_steps = Vec::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        let mut parameters = BTreeMap::new();
        for input in &step.script.inputs {
            let value = if let Some(producer) = produced.get(&input.name) {
                Value::String(format!("@{producer}.{}", input.name))
            } else if let Some(value) = satisfied.get(&input.name) {
                value.clone()
            } else if let Some(default) = &input.default {
                default.clone()
            } else {
                continue;
            };
            parameters.insert(input.name.clone(), value);
        }
        parameters.extend(step.overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

        for output in &step.script.outputs {
            produced
                .entry(output.name.clone())
                .or_insert_with(|| step.script.id.clone());
        }

        plan_steps.push(PlanStep {
            index: i + 1,
            entry: EntryRef {
                id: step.script.id.clone(),
                name: step.script.name.clone(),
                kind: EntryKind::Script,
            },
            action: step.action.clone(),
            invocation: render_invocation(&step.script.invocation, &parameters),
            parameters,
        });
    }

    let assumptions = assumptions(&needs, &satisfied, intent);
    let explanation = explain(candidate, plan_steps.len(), &missing);

    ExecutionPlan {
        selected: candidate.entry.to_ref(),
        score: candidate.score,
        steps: plan_steps,
        required_inputs: required,
        satisfied_inputs: satisfied.into_keys().collect(),
        defaultable_inputs: defaultable,
        missing_inputs: missing,
        assumptions,
        explanation,
    }
}

fn assumptions(needs: &[Need], satisfied: &BTreeMap<String, Value>, intent: &Intent) -> Vec<String> {
    let mut notes: Vec<String> = needs
        .iter()
        .filter(|n| n.required && !satisfied.contains_key(&n.name))
        .filter_map(|n| {
            n.default
                .as_ref()
                .map(|d| format!("{} defaults to {}", n.name, display_value(d)))
        })
        .collect();

    match intent.scope {
        Scope::District => notes.push("analysis covers the whole district".to_string()),
        Scope::Building => notes.push("analysis is limited to individual buildings".to_string()),
        Scope::Unspecified => {}
    }
    for (key, value) in &intent.constraints {
        notes.push(match key.as_str() {
            "timestep" => format!("results are reported at {value} resolution"),
            "temperature_c" => format!("setpoint temperature is {value} °C"),
            _ => format!("{key} = {value}"),
        });
    }
    notes
}

fn explain(candidate: &ScoredCandidate, step_count: usize, missing: &BTreeSet<String>) -> String {
    let kind = match candidate.entry.kind() {
        EntryKind::Workflow => "workflow",
        EntryKind::Script => "script",
    };
    let matched = candidate.matched.iter().cloned().collect::<Vec<_>>().join(", ");
    let preference = if candidate.preference_hit {
        " and the stated preference"
    } else {
        ""
    };
    let inputs = if missing.is_empty() {
        "all required inputs are available".to_string()
    } else {
        format!(
            "still needed: {}",
            missing.iter().cloned().collect::<Vec<_>>().join(", ")
        )
    };
    format!(
        "Selected {kind} '{}' (score {}) for {matched}{preference}. {step_count} step(s); {inputs}.",
        candidate.entry.name(),
        candidate.score
    )
}
