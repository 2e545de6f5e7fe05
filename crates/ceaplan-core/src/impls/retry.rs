//! Retry policy for capability provider calls.
//!
//! `CAPABILITY_PROVIDER` エラーだけを、バックオフ付きで `max_retries` 回まで再試行する。
//! 他のエラー種別はそのまま返す。

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::domain::{CatalogFilter, ProviderError, Script, ScriptHelp, Workflow};
use crate::ports::CapabilityProvider;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Base delay for the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    pub max_retries: u32,
}

impl Default for RetryPolicy {
    /// One retry after 100ms.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_retries: 1,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempts` (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`.
    ///
    /// 設定ミス（負・NaN の multiplier やオーバーフロー）で Duration にならない場合は `base_delay`。
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(delay_secs).unwrap_or(self.base_delay)
    }

    /// Run `op`, retrying retryable provider failures.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut retries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_retryable(&err) && retries < self.max_retries => {
                    retries += 1;
                    let delay = self.next_delay(retries);
                    warn!(operation, error = %err, retry = retries, ?delay, "capability provider call failed; retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

fn is_retryable(err: &ProviderError) -> bool {
    !matches!(err, ProviderError::NotFound(_))
}

/// Wraps any provider and applies a `RetryPolicy` to every call.
pub struct RetryingProvider<P> {
    inner: P,
    policy: RetryPolicy,
}

impl<P: CapabilityProvider> RetryingProvider<P> {
    pub fn new(inner: P, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P: CapabilityProvider> CapabilityProvider for RetryingProvider<P> {
    async fn list_scripts(&self, filter: &CatalogFilter) -> Result<Vec<Script>, ProviderError> {
        self.policy
            .run("list_scripts", move || self.inner.list_scripts(filter))
            .await
    }

    async fn list_workflows(
        &self,
        filter: &CatalogFilter,
    ) -> Result<Vec<Workflow>, ProviderError> {
        self.policy
            .run("list_workflows", move || self.inner.list_workflows(filter))
            .await
    }

    async fn script_help(&self, id: &str) -> Result<ScriptHelp, ProviderError> {
        self.policy
            .run("script_help", move || self.inner.script_help(id))
            .await
    }

    async fn answer_faq(&self, query: &str) -> Result<Option<String>, ProviderError> {
        self.policy
            .run("answer_faq", move || self.inner.answer_faq(query))
            .await
    }
}
