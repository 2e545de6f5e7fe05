//! WorkflowMapper - Intent を ExecutionPlan に変換する
//!
//! 1. ドメインキーワードをタグとして候補（workflow ∪ script）を集める
//! 2. スコアリングして最良を選ぶ（`scoring`）
//! 3. 平坦化して入力を解決する（`planning`）
//! 4. 候補がなければ FAQ にフォールバック

mod handler;
pub mod planning;
pub mod scoring;

pub use self::handler::WorkflowMapperHandler;
pub use self::scoring::{ScoredCandidate, ScoringConfig};

use std::sync::Arc;
use tracing::{debug, info};

use self::planning::Lookup;
use crate::domain::{CatalogEntry, CatalogFilter, CeaplanError, ExecutionPlan, Intent};
use crate::ports::CapabilityProvider;

/// Result of mapping one intent.
#[derive(Debug, Clone, PartialEq)]
pub enum MapOutcome {
    Plan(ExecutionPlan),
    Faq(String),
}

pub struct WorkflowMapper {
    provider: Arc<dyn CapabilityProvider>,
    config: ScoringConfig,
}

impl WorkflowMapper {
    pub fn new(provider: Arc<dyn CapabilityProvider>, config: ScoringConfig) -> Self {
        Self { provider, config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub async fn map(&self, intent: &Intent) -> Result<MapOutcome, CeaplanError> {
        let ranked = self.rank(intent).await?;
        for candidate in &ranked {
            debug!(id = candidate.entry.id(), score = candidate.score, "candidate");
        }

        let best = ranked
            .into_iter()
            .next()
            .filter(|c| c.score > self.config.min_score);

        match best {
            Some(best) => {
                let steps = self.resolve(&best.entry).await?;
                let plan = planning::build_plan(&best, &steps, intent);
                info!(
                    selected = %plan.selected.id,
                    score = plan.score,
                    missing = plan.missing_inputs.len(),
                    "plan built"
                );
                Ok(MapOutcome::Plan(plan))
            }
            None => {
                debug!("no candidate above min_score, trying FAQ");
                match self.provider.answer_faq(&intent.raw_text).await? {
                    Some(answer) => Ok(MapOutcome::Faq(answer)),
                    None => Err(CeaplanError::NoMatchingCapability(format!(
                        "nothing in the catalog matches {:?}",
                        intent.domains
                    ))),
                }
            }
        }
    }

    /// Candidates for the intent, best first.
    pub async fn rank(&self, intent: &Intent) -> Result<Vec<ScoredCandidate>, CeaplanError> {
        if !intent.has_domain() {
            return Ok(Vec::new());
        }
        let filter = CatalogFilter::tags(intent.domains.iter().cloned());
        let workflows = self.provider.list_workflows(&filter).await?;
        let scripts = self.provider.list_scripts(&filter).await?;

        let candidates = workflows
            .into_iter()
            .map(CatalogEntry::Workflow)
            .chain(scripts.into_iter().map(CatalogEntry::Script))
            .collect();
        Ok(scoring::rank(candidates, intent, &self.config))
    }

    /// Fetch every entry the candidate refers to, then flatten it.
    async fn resolve(&self, root: &CatalogEntry) -> Result<Vec<planning::ResolvedStep>, CeaplanError> {
        let mut lookup = Lookup::default();
        lookup.add(root.clone());

        loop {
            let pending = lookup.unresolved();
            if pending.is_empty() {
                break;
            }
            let filter = CatalogFilter::ids(pending);
            let scripts = self.provider.list_scripts(&filter).await?;
            let workflows = self.provider.list_workflows(&filter).await?;

            let mut added = false;
            for entry in scripts
                .into_iter()
                .map(CatalogEntry::Script)
                .chain(workflows.into_iter().map(CatalogEntry::Workflow))
            {
                added |= lookup.add(entry);
            }
            // 残りは unknown reference として flatten が報告する
            if !added {
                break;
            }
        }

        Ok(planning::flatten(root, &lookup)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, ProviderError};
    use crate::impls::LocalCatalogProvider;
    use crate::parser::{IntentParser, ParserConfig};
    use rstest::rstest;

    fn mapper() -> WorkflowMapper {
        let provider = LocalCatalogProvider::sample().unwrap();
        WorkflowMapper::new(Arc::new(provider), ScoringConfig::default())
    }

    fn parse(text: &str) -> Intent {
        IntentParser::new(ParserConfig::default()).unwrap().parse(text).unwrap()
    }

    fn plan(outcome: MapOutcome) -> ExecutionPlan {
        match outcome {
            MapOutcome::Plan(plan) => plan,
            MapOutcome::Faq(answer) => panic!("expected plan, got FAQ {answer:?}"),
        }
    }

    #[tokio::test]
    async fn cost_optimal_cooling_picks_cooling_system() {
        let intent = parse("I have zone.geojson and zurich.epw; design a cost-optimal cooling system");
        let plan = plan(mapper().map(&intent).await.unwrap());

        assert_eq!(plan.selected.id, "workflow-cooling-system-001");
        assert_eq!(plan.score, 18);
        assert!(plan.missing_inputs.is_empty());
        assert_eq!(plan.steps.len(), 3);
    }

    #[tokio::test]
    async fn capitalised_catalog_tags_select_the_same_plan() {
        fn capitalise(tags: &std::collections::BTreeSet<String>) -> std::collections::BTreeSet<String> {
            tags.iter()
                .map(|t| {
                    let mut chars = t.chars();
                    chars
                        .next()
                        .map(|first| first.to_uppercase().chain(chars).collect())
                        .unwrap_or_default()
                })
                .collect()
        }

        let mut catalog = crate::domain::Catalog::sample().unwrap();
        for workflow in catalog.workflows.iter_mut() {
            workflow.tags = capitalise(&workflow.tags);
        }
        for script in catalog.scripts.iter_mut() {
            script.tags = capitalise(&script.tags);
        }
        assert!(catalog.workflows.iter().any(|w| w.tags.contains("Cooling")));
        let provider = LocalCatalogProvider::new(catalog).unwrap();
        let mapper = WorkflowMapper::new(Arc::new(provider), ScoringConfig::default());

        let intent = parse("I have zone.geojson and zurich.epw; design a cost-optimal cooling system");
        let plan = plan(mapper.map(&intent).await.unwrap());
        assert_eq!(plan.selected.id, "workflow-cooling-system-001");
        assert_eq!(plan.score, 18);
    }

    #[tokio::test]
    async fn tie_breaks_on_id() {
        let intent = parse("design a cooling system");
        let plan = plan(mapper().map(&intent).await.unwrap());

        assert_eq!(plan.selected.id, "workflow-cooling-demand-001");
        assert_eq!(plan.score, 13);
        assert_eq!(
            plan.missing_inputs.iter().map(String::as_str).collect::<Vec<_>>(),
            vec!["building_geometry", "weather_file"]
        );
    }

    #[rstest]
    #[case("lay out a network with the steiner algorithm", "network-analysis-001")]
    #[case("validate the demand model against measured data", "workflow-validation-001")]
    #[case("evaluate the emissions of the supply system", "workflow-ghg-evaluation-001")]
    #[tokio::test]
    async fn selects_expected_entry(#[case] text: &str, #[case] expected: &str) {
        let intent = parse(text);
        let plan = plan(mapper().map(&intent).await.unwrap());
        assert_eq!(plan.selected.id, expected, "{}", plan.explanation);
    }

    #[tokio::test]
    async fn ranking_is_deterministic() {
        let mapper = mapper();
        let intent = parse("estimate heating and cooling demand for the district");
        let first = mapper.rank(&intent).await.unwrap();
        for _ in 0..5 {
            assert_eq!(mapper.rank(&intent).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn below_min_score_falls_back_to_faq() {
        let provider = LocalCatalogProvider::sample().unwrap();
        let config = ScoringConfig {
            min_score: 100,
            ..ScoringConfig::default()
        };
        let mapper = WorkflowMapper::new(Arc::new(provider), config);

        let intent = parse("calculate cooling demand in CEA");
        let outcome = mapper.map(&intent).await.unwrap();
        assert!(matches!(outcome, MapOutcome::Faq(answer) if answer.contains("demand calculation")));
    }

    #[tokio::test]
    async fn nothing_matches() {
        let provider = LocalCatalogProvider::sample().unwrap();
        let config = ScoringConfig {
            min_score: 100,
            ..ScoringConfig::default()
        };
        let mapper = WorkflowMapper::new(Arc::new(provider), config);

        let intent = parse("size heat pumps");
        let err = mapper.map(&intent).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoMatchingCapability);
    }

    #[tokio::test]
    async fn broken_reference_is_a_provider_error() {
        let provider = LocalCatalogProvider::sample().unwrap();
        let mut catalog = provider.snapshot().await.to_catalog();
        let mut broken = catalog.workflows.remove(0);
        broken.steps.push(crate::domain::WorkflowStep::to("ghost-001"));
        let mapper = WorkflowMapper::new(Arc::new(provider), ScoringConfig::default());

        let err = mapper
            .resolve(&CatalogEntry::Workflow(broken))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CeaplanError::Provider(ProviderError::Malformed(_))
        ));
    }
}
