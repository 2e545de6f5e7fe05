//! Intent parser - 自由文を Intent に分類する
//!
//! # 流れ
//! 1. 正規化（小文字化・空白の畳み込み）。英数字が 1 つもなければ ParseError
//! 2. ルール表で domain / objective / algorithm / action / file を抽出
//! 3. 発火したシグナル群の重みの合計を confidence とする
//! 4. domain なしの疑問文 → FAQ
//! 5. confidence < threshold → AMBIGUOUS（推測はしない）
//! 6. それ以外 → WORKFLOW_REQUEST

mod handler;
mod rules;

pub use self::handler::IntentParserHandler;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use self::rules::{RuleTable, labels_in_order};
use crate::domain::{ActionCategory, CeaplanError, FileKind, FileMention, Intent, MissingPiece, Scope};

/// Weight of each signal group in the confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub domain: f64,
    pub action: f64,
    pub file: f64,
    pub objective: f64,
    pub algorithm: f64,
    pub question: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            domain: 0.45,
            action: 0.15,
            file: 0.15,
            objective: 0.15,
            algorithm: 0.10,
            question: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub confidence_threshold: f64,
    pub weights: SignalWeights,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.4,
            weights: SignalWeights::default(),
        }
    }
}

pub struct IntentParser {
    config: ParserConfig,
    rules: RuleTable,
}

impl IntentParser {
    pub fn new(config: ParserConfig) -> Result<Self, regex::Error> {
        Ok(Self {
            config,
            rules: RuleTable::compile()?,
        })
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn parse(&self, text: &str) -> Result<Intent, CeaplanError> {
        let normalized = normalize(text);
        if !normalized.chars().any(char::is_alphanumeric) {
            return Err(CeaplanError::Parse(format!(
                "no words found in request {text:?}"
            )));
        }

        let domains = labels_in_order(&self.rules.domains, &normalized);
        let objectives: BTreeSet<String> = labels_in_order(&self.rules.objectives, &normalized)
            .into_iter()
            .collect();
        let algorithm = labels_in_order(&self.rules.algorithms, &normalized)
            .into_iter()
            .next();
        let actions = labels_in_order(&self.rules.actions, &normalized);
        let files = self.file_mentions(text);
        let is_question = self.rules.question.is_match(&normalized);

        let w = &self.config.weights;
        let groups = [
            (!domains.is_empty(), w.domain),
            (!actions.is_empty(), w.action),
            (!files.is_empty(), w.file),
            (!objectives.is_empty(), w.objective),
            (algorithm.is_some(), w.algorithm),
            (is_question, w.question),
        ];
        let confidence = round2(
            groups
                .iter()
                .filter(|(fired, _)| *fired)
                .map(|(_, weight)| weight)
                .sum::<f64>()
                .min(1.0),
        );

        let (category, missing) = if is_question && domains.is_empty() {
            (ActionCategory::Faq, None)
        } else if confidence < self.config.confidence_threshold {
            let missing = if domains.is_empty() {
                MissingPiece::Domain
            } else if objectives.is_empty() {
                MissingPiece::Objective
            } else {
                MissingPiece::ReferencedFile
            };
            (ActionCategory::Ambiguous, Some(missing))
        } else {
            (ActionCategory::WorkflowRequest, None)
        };

        let intent = Intent {
            category,
            domains,
            files,
            algorithm,
            objectives,
            confidence,
            actions,
            scope: self.scope(&self.rules.file.replace_all(&normalized, " ")),
            constraints: self.constraints(&normalized),
            missing,
            raw_text: text.to_string(),
            want_json: false,
        };
        debug!(
            category = ?intent.category,
            confidence = intent.confidence,
            domains = ?intent.domains,
            files = intent.files.len(),
            "intent classified"
        );
        Ok(intent)
    }

    /// Filename-like tokens in order of appearance, without duplicates.
    fn file_mentions(&self, text: &str) -> Vec<FileMention> {
        let mut mentions: Vec<FileMention> = Vec::new();
        for caps in self.rules.file.captures_iter(text) {
            let (Some(whole), Some(ext)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(kind) = FileKind::from_extension(ext.as_str()) else {
                continue;
            };
            let name = whole.as_str().trim_start_matches("./");
            if !mentions.iter().any(|m| m.name == name) {
                mentions.push(FileMention::new(name, kind));
            }
        }
        mentions
    }

    /// `normalized` はファイル名を除いた文。`zone.geojson` の zone を district 扱いしないため。
    fn scope(&self, normalized: &str) -> Scope {
        if self.rules.district.first_hit(normalized).is_some() {
            Scope::District
        } else if self.rules.building.first_hit(normalized).is_some() {
            Scope::Building
        } else {
            Scope::Unspecified
        }
    }

    fn constraints(&self, normalized: &str) -> BTreeMap<String, String> {
        let mut constraints = BTreeMap::new();
        if let Some(caps) = self.rules.timestep.captures(normalized)
            && let Some(step) = caps.get(1)
        {
            let step = match step.as_str() {
                "yearly" => "annual",
                other => other,
            };
            constraints.insert("timestep".to_string(), step.to_string());
        }
        if let Some(caps) = self.rules.temperature.captures(normalized)
            && let Some(value) = caps.get(1)
        {
            constraints.insert("temperature_c".to_string(), value.as_str().to_string());
        }
        constraints
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn parser() -> IntentParser {
        IntentParser::new(ParserConfig::default()).unwrap()
    }

    #[rstest]
    #[case("what is CEA?", ActionCategory::Faq)]
    #[case("How do I install it", ActionCategory::Faq)]
    #[case("optimize this", ActionCategory::Ambiguous)]
    #[case("make it cheaper", ActionCategory::Ambiguous)]
    #[case("design a cooling system", ActionCategory::WorkflowRequest)]
    #[case("how do I estimate the cooling demand?", ActionCategory::WorkflowRequest)]
    #[case(
        "I have zone.geojson and zurich.epw, find a cost-optimal cooling setup",
        ActionCategory::WorkflowRequest
    )]
    fn categories(#[case] text: &str, #[case] expected: ActionCategory) {
        assert_eq!(parser().parse(text).unwrap().category, expected);
    }

    #[rstest]
    #[case("")]
    #[case("   \t ")]
    #[case("?!... ---")]
    fn unreadable_text_is_parse_error(#[case] text: &str) {
        let err = parser().parse(text).unwrap_err();
        assert!(matches!(err, CeaplanError::Parse(_)));
    }

    #[test]
    fn ambiguous_names_missing_domain() {
        let intent = parser().parse("optimize this").unwrap();
        assert_eq!(intent.missing, Some(MissingPiece::Domain));
        assert!(intent.confidence < ParserConfig::default().confidence_threshold);
    }

    #[test]
    fn ambiguous_names_missing_objective_when_threshold_is_high() {
        let parser = IntentParser::new(ParserConfig {
            confidence_threshold: 0.9,
            ..ParserConfig::default()
        })
        .unwrap();
        let intent = parser.parse("design a cooling system").unwrap();
        assert_eq!(intent.category, ActionCategory::Ambiguous);
        assert_eq!(intent.missing, Some(MissingPiece::Objective));
    }

    #[test]
    fn extracts_files_objectives_and_algorithm() {
        let intent = parser()
            .parse("Lay out the network for ./zone.geojson with steiner, minimize cost and CO2; weather in zurich.epw")
            .unwrap();

        assert_eq!(
            intent.files,
            vec![
                FileMention::new("zone.geojson", FileKind::Geometry),
                FileMention::new("zurich.epw", FileKind::Weather),
            ]
        );
        assert_eq!(intent.algorithm.as_deref(), Some("steiner"));
        assert_eq!(
            intent.objectives,
            BTreeSet::from(["cost".to_string(), "emissions".to_string()])
        );
        assert_eq!(intent.domains[0], "network");
        assert_eq!(intent.scope, Scope::Unspecified);
    }

    #[rstest]
    #[case("design a cooling system for zone.geojson", Scope::Unspecified)]
    #[case("use ./inputs/building.geojson for the cooling demand", Scope::Unspecified)]
    #[case("cooling demand for the zone in zone.geojson", Scope::District)]
    #[case("district cooling demand with zone.geojson", Scope::District)]
    #[case("cooling demand of one building.geojson building", Scope::Building)]
    fn file_names_do_not_set_scope(#[case] text: &str, #[case] expected: Scope) {
        let intent = parser().parse(text).unwrap();
        assert_eq!(intent.scope, expected, "{text}");
    }

    #[test]
    fn extracts_constraints() {
        let intent = parser()
            .parse("estimate yearly cooling demand for an office at 26 °C")
            .unwrap();
        assert_eq!(intent.constraints["timestep"], "annual");
        assert_eq!(intent.constraints["temperature_c"], "26");
        assert_eq!(intent.scope, Scope::Building);
    }

    #[test]
    fn more_signals_means_more_confidence() {
        let p = parser();
        let low = p.parse("design a cooling system").unwrap().confidence;
        let high = p
            .parse("design a cost-optimal cooling system for zone.geojson")
            .unwrap()
            .confidence;
        assert!(high > low);
        assert!(high <= 1.0);
    }

    #[test]
    fn raw_text_is_kept_verbatim() {
        let text = "  What   is CEA? ";
        assert_eq!(parser().parse(text).unwrap().raw_text, text);
    }
}
