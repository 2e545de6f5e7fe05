//! HandlerState - ハンドラのライフサイクル
//!
//! CREATED → RUNNING → STOPPED。STOPPED は終端で、戻る遷移はない。
//! CREATED から直接 STOPPED に行くのは許可（起動前に捨てる場合）。

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerState {
    Created,
    Running,
    Stopped,
}

impl HandlerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandlerState::Stopped)
    }

    pub fn can_transition_to(&self, next: HandlerState) -> bool {
        matches!(
            (self, next),
            (HandlerState::Created, HandlerState::Running)
                | (HandlerState::Created, HandlerState::Stopped)
                | (HandlerState::Running, HandlerState::Stopped)
        )
    }
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandlerState::Created => "CREATED",
            HandlerState::Running => "RUNNING",
            HandlerState::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}
