//! Catalog model: scripts, workflows and the FAQ glossary.
//!
//! The layout matches the persisted collections (`scripts`, `workflows`, `faq`).
//! Entries are owned by a capability provider; the core only reads them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Declared input of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,

    /// Expected file extension (`"geojson"`, `"epw"`, ...) for file inputs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_required")]
    pub required: bool,

    /// Value used when the request does not supply one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
}

fn default_required() -> bool {
    true
}

impl InputSpec {
    pub fn is_defaultable(&self) -> bool {
        self.default.is_some()
    }
}

/// Declared output of a script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// A single invocable operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub path: String,
    /// Invocation template, e.g. `cea demand --weather {weather_file}`.
    #[serde(default)]
    pub invocation: String,
    #[serde(default)]
    pub doc: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub outputs: Vec<OutputSpec>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Script {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

/// One step of a workflow: a reference to a script or another workflow.
///
/// 永続形式では `"demand-calc-001"` のような id 文字列だけでもよいし、
/// `{ "ref": ..., "action": ..., "parameters": {...} }` でもよい。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "StepRepr")]
pub struct WorkflowStep {
    #[serde(rename = "ref")]
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl WorkflowStep {
    pub fn to(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            action: None,
            parameters: BTreeMap::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StepRepr {
    Id(String),
    Full {
        #[serde(rename = "ref")]
        target: String,
        #[serde(default)]
        action: Option<String>,
        #[serde(default)]
        parameters: BTreeMap<String, serde_json::Value>,
    },
}

impl From<StepRepr> for WorkflowStep {
    fn from(repr: StepRepr) -> Self {
        match repr {
            StepRepr::Id(target) => WorkflowStep::to(target),
            StepRepr::Full {
                target,
                action,
                parameters,
            } => WorkflowStep {
                target,
                action,
                parameters,
            },
        }
    }
}

/// An ordered composition of scripts and workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub description: String,
}

/// FAQ glossary entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Whole catalog as persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub scripts: Vec<Script>,
    #[serde(default)]
    pub workflows: Vec<Workflow>,
    #[serde(default)]
    pub faq: Vec<FaqEntry>,
}

impl Catalog {
    /// Catalog bundled with the crate (CEA scripts, workflows and a small glossary).
    pub fn sample() -> Result<Self, serde_json::Error> {
        serde_json::from_str(SAMPLE_CATALOG)
    }
}

const SAMPLE_CATALOG: &str = include_str!("../../data/catalog.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Workflow,
    Script,
}

/// Script or workflow, as a ranking candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogEntry {
    Script(Script),
    Workflow(Workflow),
}

impl CatalogEntry {
    pub fn id(&self) -> &str {
        match self {
            CatalogEntry::Script(s) => &s.id,
            CatalogEntry::Workflow(w) => &w.id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            CatalogEntry::Script(s) => &s.name,
            CatalogEntry::Workflow(w) => &w.name,
        }
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        match self {
            CatalogEntry::Script(s) => &s.tags,
            CatalogEntry::Workflow(w) => &w.tags,
        }
    }

    pub fn kind(&self) -> EntryKind {
        match self {
            CatalogEntry::Script(_) => EntryKind::Script,
            CatalogEntry::Workflow(_) => EntryKind::Workflow,
        }
    }

    pub fn to_ref(&self) -> EntryRef {
        EntryRef {
            id: self.id().to_string(),
            name: self.name().to_string(),
            kind: self.kind(),
        }
    }
}

/// Lightweight pointer to a catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryRef {
    pub id: String,
    pub name: String,
    pub kind: EntryKind,
}

/// Documentation view returned by `script_help`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptHelp {
    pub id: String,
    pub name: String,
    pub invocation: String,
    pub doc: String,
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
}

impl From<&Script> for ScriptHelp {
    fn from(script: &Script) -> Self {
        Self {
            id: script.id.clone(),
            name: script.name.clone(),
            invocation: script.invocation.clone(),
            doc: script.doc.clone(),
            inputs: script.inputs.clone(),
            outputs: script.outputs.clone(),
        }
    }
}

/// Query filter for `list_scripts` / `list_workflows`.
///
/// - `tags`: 空でなければ、いずれかのタグを持つエントリのみ
/// - `ids`: 空でなければ、その id のみ
/// - `name`: 名前の部分一致（大文字小文字無視）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogFilter {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CatalogFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tags: tags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn matches(&self, id: &str, name: &str, tags: &BTreeSet<String>) -> bool {
        if !self.tags.is_empty()
            && !tags
                .iter()
                .any(|t| self.tags.iter().any(|want| want.eq_ignore_ascii_case(t)))
        {
            return false;
        }
        if !self.ids.is_empty() && !self.ids.contains(id) {
            return false;
        }
        if let Some(needle) = &self.name
            && !name.to_lowercase().contains(&needle.to_lowercase())
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_step_accepts_plain_id_or_object() {
        let json = r#"{
            "id": "wf-1",
            "name": "wf",
            "steps": [
                "demand-calc-001",
                { "ref": "report-generation-001", "action": "report", "parameters": { "format": "pdf" } }
            ]
        }"#;
        let wf: Workflow = serde_json::from_str(json).unwrap();

        assert_eq!(wf.steps[0], WorkflowStep::to("demand-calc-001"));
        assert_eq!(wf.steps[1].target, "report-generation-001");
        assert_eq!(wf.steps[1].action.as_deref(), Some("report"));
        assert_eq!(wf.steps[1].parameters["format"], "pdf");
    }

    #[test]
    fn input_required_defaults_to_true() {
        let input: InputSpec = serde_json::from_str(r#"{ "name": "weather_file" }"#).unwrap();
        assert!(input.required);
        assert!(!input.is_defaultable());
    }

    #[test]
    fn sample_catalog_parses() {
        let catalog = Catalog::sample().unwrap();
        assert_eq!(catalog.scripts.len(), 5);
        assert_eq!(catalog.workflows.len(), 5);
        assert!(!catalog.faq.is_empty());
    }

    #[test]
    fn filter_matches_on_tags_ids_and_name() {
        let tags: BTreeSet<String> = ["cooling", "demand"].into_iter().map(String::from).collect();

        assert!(CatalogFilter::all().matches("a", "Demand", &tags));
        assert!(CatalogFilter::tags(["cooling", "network"]).matches("a", "x", &tags));
        assert!(!CatalogFilter::tags(["network"]).matches("a", "x", &tags));
        assert!(!CatalogFilter::ids(["b"]).matches("a", "x", &tags));
        let capitalised: BTreeSet<String> = BTreeSet::from(["Cooling".to_string()]);
        assert!(CatalogFilter::tags(["cooling"]).matches("a", "x", &capitalised));

        let by_name = CatalogFilter {
            name: Some("DEMAND".into()),
            ..CatalogFilter::default()
        };
        assert!(by_name.matches("a", "demand_calculation", &tags));
        assert!(!by_name.matches("a", "network_layout", &tags));
    }
}
