//! Stage 3: L1 transaction processing.
//!
//! Dispatches filtered transactions by handler kind: inbox batches are
//! decoded and driven through the payload builder, rollup transactions are
//! forwarded to the rollup state observer.  Progress through a block (and
//! through the contexts of a half-derived batch) survives transient engine
//! failures, so no L2 block is ever built twice or skipped.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use keel_bridge::batch::decode_batch;
use keel_engine::{EngineError, ExecutionEngine};
use keel_primitives::block::{BlockId, BlockRelation};
use tracing::{debug, warn};

use super::{
    FilteredBlock, HandlerRegistry, RollupStateObserver, Stage, StageError, TxHandlerKind,
};
use crate::payload::{BatchJob, PayloadBuilder};

/// The block currently being processed and how far we got.
struct InFlight {
    block: FilteredBlock,
    next_tx: usize,
    batch: Option<BatchJob>,
}

pub struct TxProcessingStage<P, E, R> {
    prev: P,
    registry: Arc<HandlerRegistry>,
    payload_builder: PayloadBuilder<E>,
    rollup_observer: R,
    current: Option<InFlight>,
    pending: VecDeque<BlockRelation>,
}

impl<P, E, R> TxProcessingStage<P, E, R> {
    pub fn new(
        prev: P,
        registry: Arc<HandlerRegistry>,
        payload_builder: PayloadBuilder<E>,
        rollup_observer: R,
    ) -> Self {
        Self {
            prev,
            registry,
            payload_builder,
            rollup_observer,
            current: None,
            pending: VecDeque::new(),
        }
    }
}

impl<P, E, R> TxProcessingStage<P, E, R>
where
    P: Stage<Output = FilteredBlock> + Send,
    E: ExecutionEngine,
    R: RollupStateObserver,
{
    /// Processes the in-flight block to completion.
    async fn process_current(&mut self) -> Result<(), StageError> {
        let inflight = self.current.as_mut().expect("stage: in-flight block set");
        let l1 = inflight.block.l1;

        while inflight.next_tx < inflight.block.txs.len() {
            // Drive (or resume) the current batch, one engine call per L2
            // block, recording progress after each.
            if let Some(job) = inflight.batch.as_mut() {
                loop {
                    match self.payload_builder.build_next(job).await {
                        Ok(Some(l2)) => self.pending.push_back(BlockRelation::new(l1, l2)),
                        Ok(None) => break,
                        Err(EngineError::MismatchedBlock { number, local }) => {
                            return Err(StageError::Recoverable(
                                l1,
                                format!("engine block {number} mismatch (local {local})"),
                            ));
                        }
                        Err(err) => return Err(StageError::Retryable(err.to_string())),
                    }
                }
                inflight.batch = None;
                inflight.next_tx += 1;
                continue;
            }

            let tx = &inflight.block.txs[inflight.next_tx];
            let Some(kind) = self.registry.lookup(tx.to, tx.selector) else {
                inflight.next_tx += 1;
                continue;
            };
            match kind {
                TxHandlerKind::AppendTxBatch => match decode_batch(&tx.input) {
                    Ok(attrs) => {
                        debug!(
                            %l1,
                            first_block = attrs.first_l2_block_number,
                            blocks = attrs.num_blocks(),
                            "deriving batch"
                        );
                        inflight.batch = Some(self.payload_builder.start(attrs));
                    }
                    Err(err) => {
                        // Malformed inbox calldata is skipped, not fatal:
                        // every honest node skips the same bytes, so
                        // derivation stays deterministic.
                        warn!(tx = %tx.hash, %err, "undecodable batch calldata");
                        inflight.next_tx += 1;
                    }
                },
                TxHandlerKind::AssertionCreated => {
                    self.rollup_observer.on_assertion_created(l1, tx);
                    inflight.next_tx += 1;
                }
                TxHandlerKind::AssertionConfirmed => {
                    self.rollup_observer.on_assertion_confirmed(l1, tx);
                    inflight.next_tx += 1;
                }
                TxHandlerKind::AssertionRejected => {
                    self.rollup_observer.on_assertion_rejected(l1, tx);
                    inflight.next_tx += 1;
                }
            }
        }
        self.current = None;
        Ok(())
    }
}

#[async_trait]
impl<P, E, R> Stage for TxProcessingStage<P, E, R>
where
    P: Stage<Output = FilteredBlock> + Send,
    E: ExecutionEngine,
    R: RollupStateObserver,
{
    type Output = BlockRelation;

    async fn pull(&mut self) -> Result<BlockRelation, StageError> {
        loop {
            if let Some(relation) = self.pending.pop_front() {
                return Ok(relation);
            }
            if self.current.is_none() {
                let block = self.prev.pull().await?;
                self.current = Some(InFlight {
                    block,
                    next_tx: 0,
                    batch: None,
                });
            }
            self.process_current().await?;
        }
    }

    async fn recover(&mut self, l1_block: BlockId) -> Result<(), StageError> {
        self.current = None;
        self.pending.clear();
        self.prev.recover(l1_block).await
    }
}
