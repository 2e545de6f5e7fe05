//! ceaplan-core
//!
//! 自然言語の依頼を CEA（City Energy Analyst）の実行計画に変換するアシスタントの中核。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, envelope, intent, catalog, plan, state, errors）
//! - **ports**: 抽象化レイヤー（CapabilityProvider, Clock, IdGenerator）
//! - **bus**: メッセージバス（mailbox, 相関付き request/response, overflow policy）
//! - **runtime**: ハンドラ実行（Handler trait, HandlerRunner, lifecycle）
//! - **parser**: 意図解析（IntentParser, IntentParserHandler）
//! - **mapper**: ワークフロー選択と実行計画（WorkflowMapper, WorkflowMapperHandler）
//! - **impls**: プロバイダ実装（ローカルカタログ, HTTP, retry）
//! - **app**: 組み立て（AssistantBuilder, Assistant）
//! - **config**: 設定

pub mod app;
pub mod bus;
pub mod config;
pub mod domain;
pub mod impls;
pub mod mapper;
pub mod parser;
pub mod ports;
pub mod runtime;

pub use self::app::{Assistant, AssistantBuilder, BuildError};
pub use self::config::{Config, ConfigError, ProviderConfig};
pub use self::domain::{CeaplanError, ErrorKind, ExecutionPlan, Intent, Reply};
