use serde::{Deserialize, Serialize};

use crate::block::BlockId;

/// Snapshot of the L1 view shared across services.
///
/// Outside a reorg recovery window `finalized.number <= safe.number <=
/// head.number`.  A reorg only ever rewinds `head`; `finalized` cannot
/// regress.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct L1State {
    head: BlockId,
    safe: BlockId,
    finalized: BlockId,
}

impl L1State {
    pub fn new(head: BlockId, safe: BlockId, finalized: BlockId) -> Self {
        Self {
            head,
            safe,
            finalized,
        }
    }

    pub fn head(&self) -> BlockId {
        self.head
    }

    pub fn safe(&self) -> BlockId {
        self.safe
    }

    pub fn finalized(&self) -> BlockId {
        self.finalized
    }
}
