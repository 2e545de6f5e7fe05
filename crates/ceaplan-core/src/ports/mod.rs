//! Ports - 抽象化レイヤー
//!
//! コアが外部に依存する箇所の trait。実装は `impls` に置く。
//! - `CapabilityProvider`: カタログと FAQ（ローカル / リモートを構築時に 1 つ注入）
//! - `Clock`, `IdGenerator`: テスト容易性のため

pub mod capability;
pub mod clock;
pub mod id_generator;

pub use self::capability::CapabilityProvider;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
