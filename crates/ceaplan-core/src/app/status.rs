//! Status - 実行中のハンドラとバスの状態をまとめたビュー

use serde::{Deserialize, Serialize};

use crate::bus::BusStats;
use crate::domain::{HandlerId, HandlerState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerStatus {
    pub id: HandlerId,
    pub state: HandlerState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub handlers: Vec<HandlerStatus>,
    pub bus: BusStats,
}

impl Status {
    /// Handlers that have stopped but still have envelopes queued.
    pub fn stuck(&self) -> impl Iterator<Item = &HandlerId> {
        self.bus
            .stopped_targets
            .iter()
            .filter(|t| t.queued > 0)
            .map(|t| &t.handler)
    }
}
