//! CapabilityProvider port - カタログと FAQ へのアクセス
//!
//! Exactly one implementation is injected when the assistant is built
//! (`LocalCatalogProvider` or `RemoteCatalogProvider`, optionally wrapped in
//! `RetryingProvider`). Nothing in the bus, runtime, parser or mapper knows which.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::{CatalogFilter, ProviderError, Script, ScriptHelp, Workflow};

#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Scripts matching `filter`, sorted by id.
    async fn list_scripts(&self, filter: &CatalogFilter) -> Result<Vec<Script>, ProviderError>;

    /// Workflows matching `filter`, sorted by id.
    async fn list_workflows(&self, filter: &CatalogFilter)
    -> Result<Vec<Workflow>, ProviderError>;

    /// Documentation of one script. Unknown id is `ProviderError::NotFound`.
    async fn script_help(&self, id: &str) -> Result<ScriptHelp, ProviderError>;

    /// Best FAQ answer for a raw query, `None` when nothing matches.
    async fn answer_faq(&self, query: &str) -> Result<Option<String>, ProviderError>;
}

#[async_trait]
impl<P: CapabilityProvider + ?Sized> CapabilityProvider for Arc<P> {
    async fn list_scripts(&self, filter: &CatalogFilter) -> Result<Vec<Script>, ProviderError> {
        (**self).list_scripts(filter).await
    }

    async fn list_workflows(
        &self,
        filter: &CatalogFilter,
    ) -> Result<Vec<Workflow>, ProviderError> {
        (**self).list_workflows(filter).await
    }

    async fn script_help(&self, id: &str) -> Result<ScriptHelp, ProviderError> {
        (**self).script_help(id).await
    }

    async fn answer_faq(&self, query: &str) -> Result<Option<String>, ProviderError> {
        (**self).answer_faq(query).await
    }
}
