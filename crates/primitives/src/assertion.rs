use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// An on-chain claim about the L2 state root after some inbox prefix.
///
/// The genesis assertion has `parent == id`; every other assertion has a
/// unique `AssertionCreated` event on L1.  `start_block`/`end_block` are
/// derived locally (see the validator's boundary search) and satisfy
/// `end_block >= start_block`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Assertion {
    pub id: U256,
    pub vm_hash: B256,
    pub inbox_size: U256,
    pub parent: U256,
    pub proposal_time: u64,
    pub asserter: Address,
    pub start_block: u64,
    pub end_block: u64,
}

impl Assertion {
    pub fn is_genesis(&self) -> bool {
        self.parent == self.id
    }
}
