//! Stage 2: L1 transaction retrieval and filtering.

use std::sync::Arc;

use async_trait::async_trait;
use keel_bridge::abi::SELECTOR_BYTES;
use keel_ethio::rpc::L1Client;
use keel_primitives::block::BlockId;

use super::{FilteredBlock, FilteredTx, HandlerRegistry, Stage, StageError};

/// Fetches the full block for each header and keeps only the transactions
/// addressed to a registered `(contract, method)` pair.
pub struct TxRetrievalStage<P, C> {
    prev: P,
    client: Arc<C>,
    registry: Arc<HandlerRegistry>,
    /// Header pulled from upstream but not yet turned into output; kept so
    /// a transient fetch failure never skips the block.
    current: Option<BlockId>,
}

impl<P, C> TxRetrievalStage<P, C> {
    pub fn new(prev: P, client: Arc<C>, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            prev,
            client,
            registry,
            current: None,
        }
    }
}

#[async_trait]
impl<P, C> Stage for TxRetrievalStage<P, C>
where
    P: Stage<Output = BlockId> + Send,
    C: L1Client,
{
    type Output = FilteredBlock;

    async fn pull(&mut self) -> Result<FilteredBlock, StageError> {
        let l1 = match self.current {
            Some(l1) => l1,
            None => {
                let l1 = self.prev.pull().await?;
                self.current = Some(l1);
                l1
            }
        };
        let block = self
            .client
            .block_by_number(l1.number())
            .await
            .map_err(|e| StageError::Retryable(e.to_string()))?
            .ok_or_else(|| {
                StageError::Retryable(format!("L1 block {} vanished", l1.number()))
            })?;

        // The chain moved between the header fetch and the body fetch.
        if block.header.hash != l1.hash() {
            return Err(StageError::Recoverable(
                l1,
                "block hash changed between header and body fetch".into(),
            ));
        }

        let txs = block
            .transactions
            .iter()
            .filter_map(|tx| {
                let to = tx.to?;
                let selector: [u8; 4] = tx.input.get(..SELECTOR_BYTES)?.try_into().ok()?;
                self.registry.matches(to, selector).then(|| FilteredTx {
                    hash: tx.hash,
                    to,
                    selector,
                    input: tx.input.clone(),
                })
            })
            .collect();
        self.current = None;
        Ok(FilteredBlock { l1, txs })
    }

    async fn recover(&mut self, l1_block: BlockId) -> Result<(), StageError> {
        self.current = None;
        self.prev.recover(l1_block).await
    }
}
