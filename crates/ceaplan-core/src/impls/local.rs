//! LocalCatalogProvider - プロセス内のカタログ
//!
//! # 並行性
//! - 読み取りは `RwLock<Arc<CatalogIndex>>` から Arc を clone して即ロック解放。
//!   以降はスナップショットを読むだけなので、書き込み中でも古いが一貫した内容が見える
//! - 書き込み（refresh / upsert）は `writer` Mutex で直列化し、最後に Arc を差し替える
//! - 差し替えのたびに revision を 1 進め、`subscribe()` した側へ `watch` で知らせる

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info};

use super::faq::{self, FaqTerms};
use crate::domain::{
    Catalog, CatalogFilter, FaqEntry, ProviderError, Script, ScriptHelp, Workflow,
};
use crate::ports::CapabilityProvider;

/// Validated, indexed, immutable view of a catalog.
#[derive(Debug)]
pub struct CatalogIndex {
    scripts: BTreeMap<String, Script>,
    workflows: BTreeMap<String, Workflow>,
    faq: Vec<FaqEntry>,
    faq_terms: Vec<FaqTerms>,
    /// lowercased name → id
    names: BTreeMap<String, String>,
    /// tag → ids
    tags: BTreeMap<String, BTreeSet<String>>,
}

impl CatalogIndex {
    /// Validate `catalog` and build the indexes.
    ///
    /// Rejects empty ids, ids used twice (scripts and workflows share one id space)
    /// and workflow steps that reference unknown ids.
    pub fn build(catalog: Catalog) -> Result<Self, ProviderError> {
        let Catalog {
            scripts,
            workflows,
            faq,
        } = catalog;

        let mut index = Self {
            scripts: BTreeMap::new(),
            workflows: BTreeMap::new(),
            faq_terms: faq.iter().map(FaqTerms::of).collect(),
            faq,
            names: BTreeMap::new(),
            tags: BTreeMap::new(),
        };

        for script in scripts {
            index.check_new_id(&script.id)?;
            index.add_to_indexes(&script.id, &script.name, &script.tags);
            index.scripts.insert(script.id.clone(), script);
        }
        for workflow in workflows {
            index.check_new_id(&workflow.id)?;
            index.add_to_indexes(&workflow.id, &workflow.name, &workflow.tags);
            index.workflows.insert(workflow.id.clone(), workflow);
        }

        for workflow in index.workflows.values() {
            for step in &workflow.steps {
                if !index.contains(&step.target) {
                    return Err(ProviderError::Malformed(format!(
                        "workflow {} references unknown entry {}",
                        workflow.id, step.target
                    )));
                }
            }
        }

        Ok(index)
    }

    fn check_new_id(&self, id: &str) -> Result<(), ProviderError> {
        if id.trim().is_empty() {
            return Err(ProviderError::Malformed("catalog entry with empty id".into()));
        }
        if self.contains(id) {
            return Err(ProviderError::Malformed(format!("duplicate catalog id {id}")));
        }
        Ok(())
    }

    fn add_to_indexes(&mut self, id: &str, name: &str, tags: &BTreeSet<String>) {
        self.names.insert(name.to_lowercase(), id.to_string());
        for tag in tags {
            self.tags
                .entry(tag.to_lowercase())
                .or_default()
                .insert(id.to_string());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.scripts.contains_key(id) || self.workflows.contains_key(id)
    }

    /// Id of the entry with exactly this name (case-insensitive).
    pub fn id_by_name(&self, name: &str) -> Option<&str> {
        self.names.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Ids carrying any of `tags`, via the tag index.
    pub fn ids_by_tags(&self, tags: &BTreeSet<String>) -> BTreeSet<String> {
        tags.iter()
            .filter_map(|t| self.tags.get(&t.to_lowercase()))
            .flatten()
            .cloned()
            .collect()
    }

    /// タグ指定があればタグ索引で候補を絞ってからフィルタ
    fn select<'a, T>(
        &self,
        entries: &'a BTreeMap<String, T>,
        filter: &CatalogFilter,
        describe: impl Fn(&T) -> (&str, &str, &BTreeSet<String>),
    ) -> Vec<&'a T> {
        let by_tag = (!filter.tags.is_empty()).then(|| self.ids_by_tags(&filter.tags));
        let rest = CatalogFilter {
            tags: BTreeSet::new(),
            ..filter.clone()
        };
        entries
            .iter()
            .filter(|(id, _)| by_tag.as_ref().is_none_or(|ids| ids.contains(*id)))
            .map(|(_, entry)| entry)
            .filter(|entry| {
                let (id, name, tags) = describe(*entry);
                rest.matches(id, name, tags)
            })
            .collect()
    }

    pub fn scripts(&self, filter: &CatalogFilter) -> Vec<Script> {
        self.select(&self.scripts, filter, |s| (s.id.as_str(), s.name.as_str(), &s.tags))
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn workflows(&self, filter: &CatalogFilter) -> Vec<Workflow> {
        self.select(&self.workflows, filter, |w| (w.id.as_str(), w.name.as_str(), &w.tags))
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn script(&self, id: &str) -> Option<&Script> {
        self.scripts.get(id)
    }

    pub fn faq_answer(&self, query: &str) -> Option<String> {
        faq::best_match(&self.faq_terms, query).map(|idx| self.faq[idx].answer.clone())
    }

    /// Back to the persisted layout.
    pub fn to_catalog(&self) -> Catalog {
        Catalog {
            scripts: self.scripts.values().cloned().collect(),
            workflows: self.workflows.values().cloned().collect(),
            faq: self.faq.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.scripts.len() + self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability provider over an in-process catalog.
pub struct LocalCatalogProvider {
    snapshot: RwLock<Arc<CatalogIndex>>,
    writer: Mutex<()>,
    revision: watch::Sender<u64>,
}

impl LocalCatalogProvider {
    pub fn new(catalog: Catalog) -> Result<Self, ProviderError> {
        let index = CatalogIndex::build(catalog)?;
        Ok(Self {
            snapshot: RwLock::new(Arc::new(index)),
            writer: Mutex::new(()),
            revision: watch::Sender::new(0),
        })
    }

    /// Provider over the bundled sample catalog.
    pub fn sample() -> Result<Self, ProviderError> {
        let catalog = Catalog::sample().map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Self::new(catalog)
    }

    /// Provider over a JSON catalog file.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ProviderError> {
        Self::new(read_catalog(path.as_ref()).await?)
    }

    /// Current snapshot. Stays valid (and unchanged) across later refreshes.
    pub async fn snapshot(&self) -> Arc<CatalogIndex> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Number of successful catalog swaps since construction.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver that changes whenever the catalog is swapped.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Replace the whole catalog.
    pub async fn refresh(&self, catalog: Catalog) -> Result<(), ProviderError> {
        let _guard = self.writer.lock().await;
        self.swap(CatalogIndex::build(catalog)?).await;
        Ok(())
    }

    /// Re-read the catalog from a JSON file.
    pub async fn reload(&self, path: impl AsRef<Path>) -> Result<(), ProviderError> {
        let catalog = read_catalog(path.as_ref()).await?;
        self.refresh(catalog).await
    }

    /// Insert or replace one script.
    pub async fn upsert_script(&self, script: Script) -> Result<(), ProviderError> {
        let _guard = self.writer.lock().await;
        let mut catalog = self.snapshot().await.to_catalog();
        catalog.scripts.retain(|s| s.id != script.id);
        catalog.scripts.push(script);
        self.swap(CatalogIndex::build(catalog)?).await;
        Ok(())
    }

    /// Insert or replace one workflow.
    pub async fn upsert_workflow(&self, workflow: Workflow) -> Result<(), ProviderError> {
        let _guard = self.writer.lock().await;
        let mut catalog = self.snapshot().await.to_catalog();
        catalog.workflows.retain(|w| w.id != workflow.id);
        catalog.workflows.push(workflow);
        self.swap(CatalogIndex::build(catalog)?).await;
        Ok(())
    }

    async fn swap(&self, index: CatalogIndex) {
        let entries = index.len();
        *self.snapshot.write().await = Arc::new(index);
        self.revision.send_modify(|r| *r += 1);
        info!(entries, revision = self.revision(), "catalog refreshed");
    }
}

async fn read_catalog(path: &Path) -> Result<Catalog, ProviderError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ProviderError::Unreachable(format!("{}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| ProviderError::Malformed(format!("{}: {e}", path.display())))
}

#[async_trait]
impl CapabilityProvider for LocalCatalogProvider {
    async fn list_scripts(&self, filter: &CatalogFilter) -> Result<Vec<Script>, ProviderError> {
        Ok(self.snapshot().await.scripts(filter))
    }

    async fn list_workflows(
        &self,
        filter: &CatalogFilter,
    ) -> Result<Vec<Workflow>, ProviderError> {
        Ok(self.snapshot().await.workflows(filter))
    }

    async fn script_help(&self, id: &str) -> Result<ScriptHelp, ProviderError> {
        let snapshot = self.snapshot().await;
        // 名前でも引けるようにしておく
        let script = snapshot
            .script(id)
            .or_else(|| snapshot.id_by_name(id).and_then(|id| snapshot.script(id)))
            .ok_or_else(|| ProviderError::NotFound(format!("script {id}")))?;
        Ok(ScriptHelp::from(script))
    }

    async fn answer_faq(&self, query: &str) -> Result<Option<String>, ProviderError> {
        let answer = self.snapshot().await.faq_answer(query);
        debug!(found = answer.is_some(), "faq lookup");
        Ok(answer)
    }
}
