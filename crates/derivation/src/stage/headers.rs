//! Stage 1: L1 header retrieval.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use keel_ethio::rpc::L1Client;
use keel_primitives::block::BlockId;
use tracing::warn;

use super::{Stage, StageError};

/// Headers we remember for walking back to a common ancestor.  Reorgs are
/// bounded by L1 finality, which is far shallower than this.
const EMITTED_CAPACITY: usize = 1024;

/// Walks the L1 chain header by header from the rollup's genesis L1 block,
/// verifying parent links and flagging divergence.
pub struct HeaderRetrievalStage<C> {
    client: Arc<C>,
    genesis: BlockId,
    next_number: u64,
    /// Hashes of headers already emitted downstream.
    emitted: BTreeMap<u64, B256>,
}

impl<C: L1Client> HeaderRetrievalStage<C> {
    pub fn new(client: Arc<C>, genesis: BlockId) -> Self {
        Self {
            client,
            genesis,
            next_number: genesis.number(),
            emitted: BTreeMap::new(),
        }
    }

    /// Finds the first emitted header that no longer matches the canonical
    /// chain.  Returned as `(number, old_hash)` so the driver can rewind to
    /// just before it.
    async fn find_divergent_block(&self) -> Result<BlockId, StageError> {
        let mut number = self.next_number - 1;
        loop {
            let Some(&old_hash) = self.emitted.get(&number) else {
                return Err(StageError::Unexpected(format!(
                    "reorg deeper than tracked history (below {number})"
                )));
            };
            let canonical = self
                .client
                .header_by_number(number)
                .await
                .map_err(|e| StageError::Retryable(e.to_string()))?
                .ok_or_else(|| {
                    StageError::Retryable(format!("header {number} missing during walk-back"))
                })?;
            if canonical.hash == old_hash {
                // `number` is the common ancestor; the next one diverged.
                let divergent = number + 1;
                let Some(&old) = self.emitted.get(&divergent) else {
                    // The chain moved again mid-walk; try again next pull.
                    return Err(StageError::Retryable(
                        "L1 chain moved during reorg walk-back".into(),
                    ));
                };
                return Ok(BlockId::new(divergent, old));
            }
            if number == self.genesis.number() {
                return Err(StageError::Unexpected(
                    "L1 chain diverged at rollup genesis".into(),
                ));
            }
            number -= 1;
        }
    }
}

#[async_trait]
impl<C: L1Client> Stage for HeaderRetrievalStage<C> {
    type Output = BlockId;

    async fn pull(&mut self) -> Result<BlockId, StageError> {
        let number = self.next_number;
        let header = self
            .client
            .header_by_number(number)
            .await
            .map_err(|e| StageError::Retryable(e.to_string()))?;
        let Some(header) = header else {
            return Err(StageError::Retryable(format!("L1 block {number} not yet available")));
        };

        if number == self.genesis.number() && header.hash != self.genesis.hash() {
            return Err(StageError::Unexpected(format!(
                "genesis L1 block hash mismatch: configured {}, chain has {}",
                self.genesis.hash(),
                header.hash
            )));
        }
        if let Some(&prev_hash) = self.emitted.get(&(number.saturating_sub(1))) {
            if number > self.genesis.number() && header.parent_hash != prev_hash {
                let divergent = self.find_divergent_block().await?;
                warn!(%divergent, "L1 reorg detected in header retrieval");
                return Err(StageError::Recoverable(
                    divergent,
                    "parent hash mismatch".into(),
                ));
            }
        }

        self.emitted.insert(number, header.hash);
        if self.emitted.len() > EMITTED_CAPACITY {
            let oldest = *self.emitted.keys().next().expect("stage: nonempty");
            self.emitted.remove(&oldest);
        }
        self.next_number = number + 1;
        Ok(header.block_id())
    }

    async fn recover(&mut self, l1_block: BlockId) -> Result<(), StageError> {
        self.emitted.split_off(&l1_block.number());
        self.next_number = l1_block.number();
        Ok(())
    }
}
