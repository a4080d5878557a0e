use async_trait::async_trait;
use keel_primitives::block::{BlockId, BlockRef};
use tokio::sync::broadcast;

use crate::errors::EngineResult;
use crate::messages::{ForkchoiceResponse, ForkchoiceState, NewTxsEvent, PayloadAttributes, PoolTx};

/// Block tags understood by the engine's header queries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum L2Tag {
    Latest,
    Safe,
    Finalized,
}

/// Fork-choice and payload-build surface of the local execution client.
///
/// Exactly one component (the terminal derivation stage) issues
/// `forkchoice_update` calls.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Builds and applies the next L2 block from `attrs`, on top of the
    /// engine's current head.  Returns the resulting block's identity.
    async fn build_payload(&self, attrs: PayloadAttributes) -> EngineResult<BlockId>;

    /// Updates the engine's head/safe/finalized pointers.
    async fn forkchoice_update(&self, state: ForkchoiceState) -> EngineResult<ForkchoiceResponse>;

    async fn header_by_tag(&self, tag: L2Tag) -> EngineResult<BlockRef>;
}

/// Pool surface the sequencer's executor drives.  Kept separate from
/// [`ExecutionEngine`] because only the sequencer role needs it.
#[async_trait]
pub trait MempoolBackend: Send + Sync {
    /// Feed of transactions newly admitted to the pool.
    fn subscribe_new_txs(&self) -> broadcast::Receiver<NewTxsEvent>;

    /// Commits an ordered set of transactions to the engine for execution
    /// in the next block.
    async fn commit_transactions(&self, txs: Vec<PoolTx>) -> EngineResult<()>;
}
