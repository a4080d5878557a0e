//! Accumulates L2 blocks and drains them into bounded-size batches.
//!
//! `build` and `advance` form a two-phase commit: `build` stages a batch
//! without consuming the buffer, and only `advance` (called once the L1
//! submission is confirmed) removes the staged blocks.  An unadvanced batch
//! is returned again, byte for byte, by the next `build`.

use std::collections::VecDeque;

use alloy_primitives::B256;
use keel_bridge::batch::{BatchAttributes, BatchContext};
use keel_primitives::block::{BlockId, BlockRef};
use thiserror::Error;
use tracing::debug;

use crate::block::DerivationBlock;

/// Per-block calldata overhead: one `(num_txs, timestamp)` context pair.
const CONTEXT_BYTES: usize = 64;
/// Per-tx calldata overhead: one length word.
const TX_LENGTH_BYTES: usize = 32;
/// Selector, offsets and length words of the outer encoding.
const BATCH_FIXED_BYTES: usize = 260;

#[derive(Debug, Error)]
pub enum BuilderError {
    /// The appended block does not extend the last appended one.  The
    /// disseminator treats this as a detected L2 reorg.
    #[error("block {number} parent {got} does not extend last appended {expected}")]
    InvalidBlock { number: u64, expected: B256, got: B256 },

    /// Nothing buffered.
    #[error("no blocks to build")]
    Eof,
}

struct PendingBatch {
    attrs: BatchAttributes,
    num_blocks: usize,
}

pub struct BatchBuilder {
    max_batch_bytes: usize,
    last_appended: BlockId,
    blocks: VecDeque<DerivationBlock>,
    pending: Option<PendingBatch>,
}

impl BatchBuilder {
    pub fn new(max_batch_bytes: usize) -> Self {
        Self {
            max_batch_bytes,
            last_appended: BlockId::EMPTY,
            blocks: VecDeque::new(),
            pending: None,
        }
    }

    pub fn last_appended(&self) -> BlockId {
        self.last_appended
    }

    /// Discards all pending state and restarts from `last_appended`.
    pub fn reset(&mut self, last_appended: BlockId) {
        debug!(%last_appended, "resetting batch builder");
        self.blocks.clear();
        self.pending = None;
        self.last_appended = last_appended;
    }

    /// Appends the next L2 block.  `block_ref` must extend the last
    /// appended block unless the builder is fresh.
    pub fn append(
        &mut self,
        block: DerivationBlock,
        block_ref: BlockRef,
    ) -> Result<(), BuilderError> {
        if !self.last_appended.is_empty() && block_ref.parent_hash() != self.last_appended.hash() {
            return Err(BuilderError::InvalidBlock {
                number: block.number,
                expected: self.last_appended.hash(),
                got: block_ref.parent_hash(),
            });
        }
        self.blocks.push_back(block);
        self.last_appended = block_ref.id();
        Ok(())
    }

    /// Stages at most `max_batch_bytes` worth of buffered blocks into one
    /// batch, leaving the remainder buffered.  Idempotent until
    /// [`Self::advance`] commits the staged batch.
    pub fn build(&mut self) -> Result<BatchAttributes, BuilderError> {
        if let Some(pending) = &self.pending {
            return Ok(pending.attrs.clone());
        }
        if self.blocks.is_empty() {
            return Err(BuilderError::Eof);
        }

        let mut size = BATCH_FIXED_BYTES;
        let mut num_blocks = 0;
        for block in &self.blocks {
            let block_size =
                CONTEXT_BYTES + block.txs.len() * TX_LENGTH_BYTES + block.tx_bytes();
            if num_blocks > 0 && size + block_size > self.max_batch_bytes {
                break;
            }
            // An oversized head block still ships alone; holding it back
            // would stall the buffer forever.
            size += block_size;
            num_blocks += 1;
        }

        let selected = self.blocks.iter().take(num_blocks);
        let mut contexts = Vec::with_capacity(num_blocks);
        let mut tx_lengths = Vec::new();
        let mut tx_batch = Vec::new();
        for block in selected {
            contexts.push(BatchContext {
                num_txs: block.txs.len() as u64,
                timestamp: block.timestamp,
            });
            for tx in &block.txs {
                tx_lengths.push(tx.len() as u32);
                tx_batch.extend_from_slice(tx);
            }
        }
        let attrs = BatchAttributes {
            first_l2_block_number: self.blocks[0].number,
            contexts,
            tx_lengths,
            tx_batch: tx_batch.into(),
        };
        self.pending = Some(PendingBatch {
            attrs: attrs.clone(),
            num_blocks,
        });
        Ok(attrs)
    }

    /// Commits the last staged batch.  Must only be called once its L1
    /// transaction has the required confirmations.
    pub fn advance(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.blocks.drain(..pending.num_blocks);
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;

    use super::*;

    fn hash(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    fn block_ref(number: u64, hash_byte: u8, parent_byte: u8) -> BlockRef {
        BlockRef::new(
            BlockId::new(number, hash(hash_byte)),
            hash(parent_byte),
            1_700_000_000 + number,
        )
    }

    fn dblock(number: u64, tx: &[u8]) -> DerivationBlock {
        DerivationBlock::new(
            number,
            1_700_000_000 + number,
            vec![Bytes::copy_from_slice(tx)],
        )
    }

    #[test]
    fn test_append_requires_parent_link() {
        let mut builder = BatchBuilder::new(10_000);
        builder.append(dblock(4, b"a"), block_ref(4, 4, 3)).unwrap();

        // Parent X while last appended hash is Y.
        let err = builder
            .append(dblock(5, b"b"), block_ref(5, 5, 9))
            .unwrap_err();
        assert!(matches!(err, BuilderError::InvalidBlock { number: 5, .. }));

        // After a reset to the finalized block the chain can re-attach.
        builder.reset(BlockId::new(3, hash(0xf)));
        builder
            .append(dblock(4, b"c"), block_ref(4, 0x44, 0xf))
            .unwrap();
        assert_eq!(builder.last_appended(), BlockId::new(4, hash(0x44)));
    }

    #[test]
    fn test_last_appended_tracks_appends() {
        let mut builder = BatchBuilder::new(10_000);
        assert!(builder.last_appended().is_empty());
        builder.append(dblock(1, b"a"), block_ref(1, 1, 0)).unwrap();
        builder.append(dblock(2, b"b"), block_ref(2, 2, 1)).unwrap();
        assert_eq!(builder.last_appended().number(), 2);
    }

    #[test]
    fn test_build_is_two_phase() {
        let mut builder = BatchBuilder::new(10_000);
        builder.append(dblock(1, b"aaa"), block_ref(1, 1, 0)).unwrap();
        builder.append(dblock(2, b"bb"), block_ref(2, 2, 1)).unwrap();

        let first = builder.build().unwrap();
        // The submission failed; without advance, the same batch comes
        // back bit for bit even after more blocks arrive.
        builder.append(dblock(3, b"cc"), block_ref(3, 3, 2)).unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first, second);

        builder.advance();
        let third = builder.build().unwrap();
        assert_eq!(third.first_l2_block_number, 3);
        assert_eq!(third.contexts.len(), 1);
    }

    #[test]
    fn test_build_empty_is_eof() {
        let mut builder = BatchBuilder::new(10_000);
        assert!(matches!(builder.build(), Err(BuilderError::Eof)));

        builder.append(dblock(1, b"a"), block_ref(1, 1, 0)).unwrap();
        builder.build().unwrap();
        builder.advance();
        assert!(matches!(builder.build(), Err(BuilderError::Eof)));
    }

    #[test]
    fn test_build_respects_size_cap() {
        // Cap sized to fit the fixed overhead plus one small block.
        let mut builder = BatchBuilder::new(BATCH_FIXED_BYTES + 200);
        builder
            .append(dblock(1, &[0u8; 80]), block_ref(1, 1, 0))
            .unwrap();
        builder
            .append(dblock(2, &[0u8; 80]), block_ref(2, 2, 1))
            .unwrap();

        let first = builder.build().unwrap();
        assert_eq!(first.contexts.len(), 1, "second block exceeds the cap");
        assert_eq!(first.first_l2_block_number, 1);
        builder.advance();

        let second = builder.build().unwrap();
        assert_eq!(second.first_l2_block_number, 2);
    }

    #[test]
    fn test_oversized_head_block_ships_alone() {
        let mut builder = BatchBuilder::new(64);
        builder
            .append(dblock(1, &[0u8; 500]), block_ref(1, 1, 0))
            .unwrap();
        let attrs = builder.build().unwrap();
        assert_eq!(attrs.contexts.len(), 1);
    }
}
