//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **LocalCatalogProvider**: プロセス内カタログ（JSON ファイル or 同梱サンプル）
//! - **RemoteCatalogProvider**: HTTP カタログサーバ
//! - **RetryingProvider**: どちらにも被せられるリトライ層

pub mod faq;
pub mod local;
pub mod remote;
pub mod retry;

pub use self::local::{CatalogIndex, LocalCatalogProvider};
pub use self::remote::RemoteCatalogProvider;
pub use self::retry::{RetryPolicy, RetryingProvider};
