use serde::{Deserialize, Serialize};

use crate::domain::HandlerId;

/// A stopped handler that still has envelopes queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedTarget {
    pub handler: HandlerId,
    pub queued: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub registered: usize,
    pub pending_waiters: usize,
    pub delivered: u64,
    pub dropped: u64,
    pub displaced: u64,
    pub timeouts: u64,
    pub stopped_targets: Vec<StoppedTarget>,
}
