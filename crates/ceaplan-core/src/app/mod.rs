//! App - 組み立てと実行
//!
//! - **AssistantBuilder**: ワイヤリングと起動前検証
//! - **Assistant**: start / ask / stats / shutdown
//! - **Status**: ハンドラとバスの状態ビュー

pub mod assistant;
pub mod builder;
pub mod status;

pub use self::assistant::Assistant;
pub use self::builder::{AssistantBuilder, BuildError, provider_from_config};
pub use self::status::{HandlerStatus, Status};
