//! RemoteCatalogProvider - HTTP 越しのカタログサーバ
//!
//! JSON endpoints (relative to `base_url`):
//! - `GET /scripts?tags=a,b&ids=x,y&name=n`
//! - `GET /workflows?...`
//! - `GET /scripts/{id}/help`
//! - `GET /faq?q=...` → `{ "answer": "..." }`, 404 when nothing matches
//!
//! 404 を「見つからない」と解釈するのは help と faq だけ。一覧の 404 は `Unreachable`。
//!
//! Connection is owned by the provider (one `reqwest::Client`, pooled per request).

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::{CatalogFilter, ProviderError, Script, ScriptHelp, Workflow};
use crate::ports::CapabilityProvider;

pub struct RemoteCatalogProvider {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct FaqAnswer {
    answer: String,
}

impl RemoteCatalogProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
            warn!(error = %e, "failed to build HTTP client, using default");
            Client::new()
        });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` の後ろにパスセグメントを足す。各セグメントはエンコードされるので
    /// id に `/` や空白が入っていても別のパスにはならない。
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Unreachable(format!("invalid base url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| ProviderError::Unreachable(format!("base url {} cannot take a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn filter_query(filter: &CatalogFilter) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        if !filter.tags.is_empty() {
            query.push(("tags", join(&filter.tags)));
        }
        if !filter.ids.is_empty() {
            query.push(("ids", join(&filter.ids)));
        }
        if let Some(name) = &filter.name {
            query.push(("name", name.clone()));
        }
        query
    }

    async fn get(&self, url: Url, query: &[(&'static str, String)]) -> Result<Response, ProviderError> {
        debug!(%url, "remote catalog request");
        self.client
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(format!("{url}: {e}")))
    }

    /// GET + JSON decode. Any non-2xx, 404 included, is `Unreachable`:
    /// a missing list endpoint means a wrong base url, not an empty catalog.
    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&'static str, String)],
    ) -> Result<T, ProviderError> {
        let response = self.get(url.clone(), query).await?;
        decode(url, response).await
    }

    /// Like `get_json`, but 404 means "no such item" and yields `Ok(None)`.
    async fn find_json<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&'static str, String)],
    ) -> Result<Option<T>, ProviderError> {
        let response = self.get(url.clone(), query).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(url, response).await.map(Some)
    }
}

async fn decode<T: DeserializeOwned>(url: Url, response: Response) -> Result<T, ProviderError> {
    if !response.status().is_success() {
        return Err(ProviderError::Unreachable(format!(
            "{url}: HTTP {}",
            response.status()
        )));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| ProviderError::Malformed(format!("{url}: {e}")))
}

fn join<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    values
        .into_iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[async_trait]
impl CapabilityProvider for RemoteCatalogProvider {
    async fn list_scripts(&self, filter: &CatalogFilter) -> Result<Vec<Script>, ProviderError> {
        let mut scripts: Vec<Script> = self
            .get_json(self.endpoint(&["scripts"])?, &Self::filter_query(filter))
            .await?;
        scripts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(scripts)
    }

    async fn list_workflows(
        &self,
        filter: &CatalogFilter,
    ) -> Result<Vec<Workflow>, ProviderError> {
        let mut workflows: Vec<Workflow> = self
            .get_json(self.endpoint(&["workflows"])?, &Self::filter_query(filter))
            .await?;
        workflows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(workflows)
    }

    async fn script_help(&self, id: &str) -> Result<ScriptHelp, ProviderError> {
        self.find_json(self.endpoint(&["scripts", id, "help"])?, &[])
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("script {id}")))
    }

    async fn answer_faq(&self, query: &str) -> Result<Option<String>, ProviderError> {
        let found: Option<FaqAnswer> = self
            .find_json(self.endpoint(&["faq"])?, &[("q", query.to_string())])
            .await?;
        Ok(found.map(|f| f.answer))
    }
}
