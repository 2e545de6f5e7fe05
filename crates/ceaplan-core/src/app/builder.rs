//! AssistantBuilder - 組み立てと起動前検証
//!
//! - プロバイダを RetryingProvider で包む
//! - IntentParserHandler / WorkflowMapperHandler を標準で登録
//! - build() 時に「期待集合 ⊆ 登録済み集合」と id の重複をチェック（Fail-fast）

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::Assistant;
use crate::bus::MessageBus;
use crate::config::{Config, ProviderConfig};
use crate::domain::ProviderError;
use crate::impls::{LocalCatalogProvider, RemoteCatalogProvider, RetryPolicy, RetryingProvider};
use crate::mapper::{WorkflowMapper, WorkflowMapperHandler};
use crate::parser::{IntentParser, IntentParserHandler};
use crate::ports::CapabilityProvider;
use crate::runtime::Handler;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing handlers: {0:?}. These handlers were expected but not registered.")]
    MissingHandlers(Vec<String>),

    #[error("Handler {0} is registered more than once")]
    DuplicateHandler(String),

    #[error("invalid parser rules: {0}")]
    Rules(#[from] regex::Error),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// # 使用例
/// ```ignore
/// let assistant = AssistantBuilder::new(config)
///     .provider(Arc::new(LocalCatalogProvider::sample()?))
///     .expect_handlers(&["intent-parser", "workflow-mapper"])
///     .build()?;
/// assistant.start().await;
/// ```
pub struct AssistantBuilder {
    config: Config,
    provider: Option<Arc<dyn CapabilityProvider>>,
    handlers: Vec<Arc<dyn Handler>>,
    builtin: bool,
    expected_handlers: Option<Vec<String>>,
}

impl AssistantBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            provider: None,
            handlers: Vec::new(),
            builtin: true,
            expected_handlers: None,
        }
    }

    /// 省略時は同梱のサンプルカタログ
    pub fn provider(mut self, provider: Arc<dyn CapabilityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Register an additional handler.
    pub fn register(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Skip the intent parser / workflow mapper handlers.
    pub fn without_builtin_handlers(mut self) -> Self {
        self.builtin = false;
        self
    }

    pub fn expect_handlers(mut self, ids: &[&str]) -> Self {
        self.expected_handlers = Some(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<Assistant, BuildError> {
        let raw: Arc<dyn CapabilityProvider> = match self.provider {
            Some(provider) => provider,
            None => Arc::new(LocalCatalogProvider::sample()?),
        };
        let provider: Arc<dyn CapabilityProvider> = Arc::new(RetryingProvider::new(
            raw,
            RetryPolicy::from(&self.config.retry),
        ));

        let mut handlers: Vec<Arc<dyn Handler>> = Vec::new();
        if self.builtin {
            let parser = IntentParser::new(self.config.parser.clone())?;
            let mapper = WorkflowMapper::new(provider.clone(), self.config.mapper.clone());
            handlers.push(Arc::new(IntentParserHandler::new(parser, provider.clone())));
            handlers.push(Arc::new(WorkflowMapperHandler::new(mapper)));
        }
        handlers.extend(self.handlers);

        let mut registered = BTreeSet::new();
        for handler in &handlers {
            let id = handler.id().to_string();
            if !registered.insert(id.clone()) {
                return Err(BuildError::DuplicateHandler(id));
            }
        }

        if let Some(expected) = &self.expected_handlers {
            let missing: Vec<String> = expected
                .iter()
                .filter(|x| !registered.contains(*x))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingHandlers(missing));
            }
        }

        info!(handlers = ?registered, "assistant built");
        let bus = MessageBus::new(self.config.bus.clone());
        Ok(Assistant::new(self.config, bus, provider, handlers))
    }
}

/// Build the provider a config section describes.
pub async fn provider_from_config(
    config: &ProviderConfig,
) -> Result<Arc<dyn CapabilityProvider>, ProviderError> {
    let provider: Arc<dyn CapabilityProvider> = match config {
        ProviderConfig::Local { catalog_path: None } => Arc::new(LocalCatalogProvider::sample()?),
        ProviderConfig::Local {
            catalog_path: Some(path),
        } => Arc::new(LocalCatalogProvider::load(path).await?),
        ProviderConfig::Remote {
            base_url,
            timeout_ms,
        } => Arc::new(RemoteCatalogProvider::new(
            base_url.clone(),
            Duration::from_millis(*timeout_ms),
        )),
    };
    Ok(provider)
}
