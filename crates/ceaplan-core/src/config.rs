//! Config - 設定ファイル（JSON）と環境変数
//!
//! すべてのセクションに `#[serde(default)]` が付いているので、空の `{}` でも
//! `Config::default()` と同じになる。

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bus::BusConfig;
use crate::impls::RetryPolicy;
use crate::mapper::ScoringConfig;
use crate::parser::ParserConfig;

pub const ENV_CATALOG: &str = "CEAPLAN_CATALOG";
pub const ENV_REMOTE_URL: &str = "CEAPLAN_REMOTE_URL";
pub const ENV_TIMEOUT_MS: &str = "CEAPLAN_TIMEOUT_MS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub parser: ParserConfig,
    pub mapper: ScoringConfig,
    /// End-to-end budget for one ask.
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub provider: ProviderConfig,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            parser: ParserConfig::default(),
            mapper: ScoringConfig::default(),
            request_timeout_ms: 10_000,
            retry: RetryConfig::default(),
            provider: ProviderConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key/value source.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(path) = lookup(ENV_CATALOG) {
            self.provider = ProviderConfig::Local {
                catalog_path: Some(PathBuf::from(path)),
            };
        }
        if let Some(url) = lookup(ENV_REMOTE_URL) {
            let timeout_ms = match &self.provider {
                ProviderConfig::Remote { timeout_ms, .. } => *timeout_ms,
                ProviderConfig::Local { .. } => default_remote_timeout_ms(),
            };
            self.provider = ProviderConfig::Remote {
                base_url: url,
                timeout_ms,
            };
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS).and_then(|v| v.trim().parse().ok()) {
            self.request_timeout_ms = ms;
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            multiplier: 2.0,
            max_retries: 1,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_retries: config.max_retries,
        }
    }
}

/// Where the catalog comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// `None` は同梱のサンプルカタログ
    Local {
        #[serde(default)]
        catalog_path: Option<PathBuf>,
    },
    Remote {
        base_url: String,
        #[serde(default = "default_remote_timeout_ms")]
        timeout_ms: u64,
    },
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::Local { catalog_path: None }
    }
}

fn default_remote_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::OverflowPolicy;
    use std::collections::HashMap;

    #[test]
    fn empty_json_is_default() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.bus.mailbox_capacity, 64);
        assert_eq!(config.mapper.tag_weight, 10);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = serde_json::from_str(
            r#"{
                "bus": { "mailbox_capacity": 8, "request_overflow": "drop_oldest" },
                "mapper": { "min_score": 12 },
                "provider": { "type": "remote", "base_url": "http://catalog:8080" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.bus.mailbox_capacity, 8);
        assert_eq!(config.bus.request_overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.bus.inform_overflow, OverflowPolicy::DropOldest);
        assert_eq!(config.mapper.min_score, 12);
        assert_eq!(config.mapper.tag_weight, 10);
        assert_eq!(
            config.provider,
            ProviderConfig::Remote {
                base_url: "http://catalog:8080".into(),
                timeout_ms: 5_000,
            }
        );
    }

    #[test]
    fn overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_CATALOG, "/tmp/catalog.json"),
            (ENV_TIMEOUT_MS, "250"),
        ]
        .into();
        let config = Config::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(
            config.provider,
            ProviderConfig::Local {
                catalog_path: Some(PathBuf::from("/tmp/catalog.json")),
            }
        );
        assert_eq!(config.request_timeout_ms, 250);
    }

    #[test]
    fn remote_url_wins_over_catalog() {
        let vars: HashMap<&str, &str> = [
            (ENV_CATALOG, "/tmp/catalog.json"),
            (ENV_REMOTE_URL, "http://localhost:9000"),
            (ENV_TIMEOUT_MS, "not a number"),
        ]
        .into();
        let config = Config::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert!(matches!(config.provider, ProviderConfig::Remote { ref base_url, .. } if base_url == "http://localhost:9000"));
        assert_eq!(config.request_timeout_ms, 10_000);
    }

    #[test]
    fn retry_policy_from_config() {
        let policy = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(policy, RetryPolicy::default());
    }

    #[tokio::test]
    async fn load_reports_missing_file() {
        let err = Config::load("/nonexistent/ceaplan.json").await.unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
