use std::fmt;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// Identifies a block on either chain by height and hash.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct BlockId {
    number: u64,
    hash: B256,
}

impl BlockId {
    /// Sentinel for "unset".  Real chains never produce the zero hash.
    pub const EMPTY: BlockId = BlockId {
        number: 0,
        hash: B256::ZERO,
    };

    pub fn new(number: u64, hash: B256) -> Self {
        Self { number, hash }
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn hash(&self) -> B256 {
        self.hash
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::EMPTY
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.number, self.hash)
    }
}

/// A [`BlockId`] together with its parent link and timestamp.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockRef {
    id: BlockId,
    parent_hash: B256,
    timestamp: u64,
}

impl BlockRef {
    pub fn new(id: BlockId, parent_hash: B256, timestamp: u64) -> Self {
        Self {
            id,
            parent_hash,
            timestamp,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn number(&self) -> u64 {
        self.id.number()
    }

    pub fn hash(&self) -> B256 {
        self.id.hash()
    }

    pub fn parent_hash(&self) -> B256 {
        self.parent_hash
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

/// Asserts "L2 block `l2` was derived from L1 block `l1`".
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BlockRelation {
    pub l1: BlockId,
    pub l2: BlockId,
}

impl BlockRelation {
    pub fn new(l1: BlockId, l2: BlockId) -> Self {
        Self { l1, l2 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sentinel() {
        assert!(BlockId::EMPTY.is_empty());
        assert!(BlockId::default().is_empty());
        assert!(!BlockId::new(0, B256::repeat_byte(1)).is_empty());
        assert!(!BlockId::new(1, B256::ZERO).is_empty());
    }
}
