//! Intent: what the parser understood from one request text.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Action category decided by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionCategory {
    Faq,
    WorkflowRequest,
    Ambiguous,
}

/// Piece of information a clarification asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingPiece {
    Domain,
    Objective,
    ReferencedFile,
}

impl MissingPiece {
    pub fn question(&self) -> &'static str {
        match self {
            MissingPiece::Domain => {
                "Which part of the energy system is this about (e.g. cooling, heating, demand, network, supply)?"
            }
            MissingPiece::Objective => {
                "What should be optimized or evaluated (e.g. cost, emissions, renewable share)?"
            }
            MissingPiece::ReferencedFile => {
                "Which input files should be used (e.g. zone.geojson, weather.epw)?"
            }
        }
    }
}

/// Kind of a filename-like token, decided by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Geometry,
    Weather,
    Data,
    Schedule,
    Config,
    Shapefile,
}

impl FileKind {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "geojson" => Some(FileKind::Geometry),
            "epw" => Some(FileKind::Weather),
            "csv" => Some(FileKind::Data),
            "xlsx" | "xls" => Some(FileKind::Schedule),
            "json" | "yml" | "yaml" => Some(FileKind::Config),
            "shp" | "dbf" => Some(FileKind::Shapefile),
            _ => None,
        }
    }
}

/// A filename-like token found in the request text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileMention {
    pub name: String,
    pub kind: FileKind,
}

impl FileMention {
    pub fn new(name: impl Into<String>, kind: FileKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// District / building scale, when the text says so.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Scope {
    District,
    Building,
    #[default]
    Unspecified,
}

/// Parsed request.
///
/// `domains` / `files` は出現順を保った重複なしリスト（ordered set）。
/// Immutable once handed to the mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub category: ActionCategory,
    pub domains: Vec<String>,
    pub files: Vec<FileMention>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    pub objectives: BTreeSet<String>,
    pub confidence: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub constraints: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<MissingPiece>,

    pub raw_text: String,
    #[serde(default)]
    pub want_json: bool,
}

impl Intent {
    pub fn has_domain(&self) -> bool {
        !self.domains.is_empty()
    }

    /// Domain keywords as a set, for tag matching.
    pub fn domain_set(&self) -> BTreeSet<String> {
        self.domains.iter().cloned().collect()
    }
}
