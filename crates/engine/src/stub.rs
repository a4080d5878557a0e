//! Stub engine controller used for testing without a full execution
//! client.
//!
//! Maintains a deterministic in-memory chain: a block's hash commits to its
//! parent hash, timestamp and transaction bytes, so replaying the same
//! payloads always reproduces the same block ids.  Fork-choice updates move
//! the head pointer; building on a rewound head overwrites the divergent
//! suffix, which is exactly the behavior the derivation pipeline relies on
//! after an L1 reorg.

use std::collections::BTreeMap;
use std::sync::Mutex;

use alloy_primitives::{keccak256, B256};
use async_trait::async_trait;
use keel_primitives::block::{BlockId, BlockRef};

use crate::errors::{EngineError, EngineResult};
use crate::messages::{ForkchoiceResponse, ForkchoiceState, PayloadAttributes, PayloadStatus};
use crate::traits::{ExecutionEngine, L2Tag};

#[derive(Clone, Debug)]
struct StubBlock {
    id: BlockId,
    parent_hash: B256,
    timestamp: u64,
}

struct State {
    blocks: BTreeMap<u64, StubBlock>,
    head: u64,
    safe: u64,
    finalized: u64,
    /// Height at which the next build reports a mismatch (one-shot), for
    /// tests that exercise the recover path.
    mismatch_at: Option<u64>,
    /// One-shot fork-choice status override.
    next_fcu_status: Option<PayloadStatus>,
}

pub struct StubEngine {
    state: Mutex<State>,
}

impl StubEngine {
    pub fn new(genesis_hash: B256) -> Self {
        let genesis = StubBlock {
            id: BlockId::new(0, genesis_hash),
            parent_hash: B256::ZERO,
            timestamp: 0,
        };
        let mut blocks = BTreeMap::new();
        blocks.insert(0, genesis);
        Self {
            state: Mutex::new(State {
                blocks,
                head: 0,
                safe: 0,
                finalized: 0,
                mismatch_at: None,
                next_fcu_status: None,
            }),
        }
    }

    /// Makes the build at `number` report a mismatched local block.
    pub fn set_mismatch_at(&self, number: u64) {
        self.state.lock().unwrap().mismatch_at = Some(number);
    }

    /// Forces the next fork-choice update to answer with `status`.
    pub fn set_next_forkchoice_status(&self, status: PayloadStatus) {
        self.state.lock().unwrap().next_fcu_status = Some(status);
    }

    pub fn head_ref(&self) -> BlockRef {
        let state = self.state.lock().unwrap();
        ref_of(&state.blocks[&state.head])
    }

    pub fn block_id(&self, number: u64) -> Option<BlockId> {
        self.state.lock().unwrap().blocks.get(&number).map(|b| b.id)
    }

    fn find_number(state: &State, hash: B256) -> Option<u64> {
        state
            .blocks
            .values()
            .find(|b| b.id.hash() == hash)
            .map(|b| b.id.number())
    }
}

fn ref_of(block: &StubBlock) -> BlockRef {
    BlockRef::new(block.id, block.parent_hash, block.timestamp)
}

fn compute_hash(parent: B256, attrs: &PayloadAttributes) -> B256 {
    let mut preimage = Vec::with_capacity(40);
    preimage.extend_from_slice(parent.as_slice());
    preimage.extend_from_slice(&attrs.timestamp.to_be_bytes());
    for tx in &attrs.transactions {
        preimage.extend_from_slice(tx);
    }
    keccak256(&preimage)
}

#[async_trait]
impl ExecutionEngine for StubEngine {
    async fn build_payload(&self, attrs: PayloadAttributes) -> EngineResult<BlockId> {
        let mut state = self.state.lock().unwrap();
        let parent = state.blocks[&state.head].clone();
        let number = parent.id.number() + 1;

        if state.mismatch_at == Some(number) {
            state.mismatch_at = None;
            let local = state
                .blocks
                .get(&number)
                .map(|b| b.id.hash())
                .unwrap_or(B256::ZERO);
            return Err(EngineError::MismatchedBlock { number, local });
        }

        let hash = compute_hash(parent.id.hash(), &attrs);
        let block = StubBlock {
            id: BlockId::new(number, hash),
            parent_hash: parent.id.hash(),
            timestamp: attrs.timestamp,
        };

        // Building on a rewound head replaces the old suffix.
        state.blocks.split_off(&number);
        state.blocks.insert(number, block);
        state.head = number;
        Ok(BlockId::new(number, hash))
    }

    async fn forkchoice_update(&self, fcs: ForkchoiceState) -> EngineResult<ForkchoiceResponse> {
        let mut state = self.state.lock().unwrap();
        if let Some(status) = state.next_fcu_status.take() {
            return Ok(ForkchoiceResponse { status });
        }

        let head = Self::find_number(&state, fcs.head_block_hash)
            .ok_or(EngineError::UnknownBlock(fcs.head_block_hash))?;
        state.head = head;
        if fcs.safe_block_hash != B256::ZERO {
            state.safe = Self::find_number(&state, fcs.safe_block_hash)
                .ok_or(EngineError::UnknownBlock(fcs.safe_block_hash))?;
        }
        if fcs.finalized_block_hash != B256::ZERO {
            state.finalized = Self::find_number(&state, fcs.finalized_block_hash)
                .ok_or(EngineError::UnknownBlock(fcs.finalized_block_hash))?;
        }
        Ok(ForkchoiceResponse {
            status: PayloadStatus::Valid,
        })
    }

    async fn header_by_tag(&self, tag: L2Tag) -> EngineResult<BlockRef> {
        let state = self.state.lock().unwrap();
        let number = match tag {
            L2Tag::Latest => state.head,
            L2Tag::Safe => state.safe,
            L2Tag::Finalized => state.finalized,
        };
        Ok(ref_of(&state.blocks[&number]))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, Bytes};

    use super::*;

    fn attrs(timestamp: u64, txs: &[&[u8]]) -> PayloadAttributes {
        PayloadAttributes {
            timestamp,
            transactions: txs.iter().map(|t| Bytes::copy_from_slice(t)).collect(),
            prev_randao: B256::ZERO,
            suggested_fee_recipient: Address::ZERO,
        }
    }

    #[tokio::test]
    async fn test_build_is_deterministic() {
        let genesis = B256::repeat_byte(9);
        let a = StubEngine::new(genesis);
        let b = StubEngine::new(genesis);

        let id_a = a.build_payload(attrs(100, &[b"tx1"])).await.unwrap();
        let id_b = b.build_payload(attrs(100, &[b"tx1"])).await.unwrap();
        assert_eq!(id_a, id_b);
        assert_eq!(id_a.number(), 1);
    }

    #[tokio::test]
    async fn test_rewind_overwrites_suffix() {
        let engine = StubEngine::new(B256::repeat_byte(9));
        let b1 = engine.build_payload(attrs(100, &[b"a"])).await.unwrap();
        let _b2 = engine.build_payload(attrs(112, &[b"b"])).await.unwrap();

        // Rewind head to block 1 and build a different block 2.
        engine
            .forkchoice_update(ForkchoiceState {
                head_block_hash: b1.hash(),
                safe_block_hash: B256::ZERO,
                finalized_block_hash: B256::ZERO,
            })
            .await
            .unwrap();
        let b2_prime = engine.build_payload(attrs(112, &[b"c"])).await.unwrap();

        assert_eq!(engine.head_ref().id(), b2_prime);
        assert_eq!(engine.block_id(2), Some(b2_prime));
    }
}
