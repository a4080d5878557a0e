//! Stage 4 (terminal): L2 fork-choice updates.
//!
//! Tracks the L2 (unsafe, safe, finalized) pointers as block relations flow
//! out of processing, advancing safe/finalized according to how deep the
//! originating L1 block sits relative to the shared L1 view.

use std::collections::VecDeque;
use std::sync::Arc;

use alloy_primitives::B256;
use async_trait::async_trait;
use keel_engine::{ExecutionEngine, ForkchoiceState, PayloadStatus};
use keel_primitives::block::{BlockId, BlockRelation};
use keel_status::StatusChannel;
use tracing::{debug, warn};

use super::{Stage, StageError};

pub struct ForkchoiceStage<P, E> {
    prev: P,
    engine: Arc<E>,
    status: StatusChannel,
    unsafe_head: BlockId,
    safe: BlockId,
    finalized: BlockId,
    /// Relations not yet buried under L1 finality, newest last.  Needed to
    /// advance safe/finalized later and to rewind on recovery.
    relations: VecDeque<BlockRelation>,
}

impl<P, E> ForkchoiceStage<P, E> {
    pub fn new(prev: P, engine: Arc<E>, status: StatusChannel) -> Self {
        Self {
            prev,
            engine,
            status,
            unsafe_head: BlockId::EMPTY,
            safe: BlockId::EMPTY,
            finalized: BlockId::EMPTY,
            relations: VecDeque::new(),
        }
    }

    pub fn unsafe_head(&self) -> BlockId {
        self.unsafe_head
    }

    pub fn safe(&self) -> BlockId {
        self.safe
    }

    pub fn finalized(&self) -> BlockId {
        self.finalized
    }

    fn forkchoice_state(&self) -> ForkchoiceState {
        ForkchoiceState {
            head_block_hash: self.unsafe_head.hash(),
            safe_block_hash: self.safe.hash(),
            finalized_block_hash: self.finalized.hash(),
        }
    }

    /// Moves safe/finalized forward per the current L1 view and prunes
    /// relations that finality has buried.
    fn advance_pointers(&mut self) {
        let l1_state = self.status.l1_state();
        for relation in &self.relations {
            if relation.l1.number() <= l1_state.safe().number()
                && relation.l2.number() > self.safe.number()
            {
                self.safe = relation.l2;
            }
            if relation.l1.number() <= l1_state.finalized().number()
                && relation.l2.number() > self.finalized.number()
            {
                self.finalized = relation.l2;
            }
        }
        // Finalized relations can never rewind; drop them.
        while let Some(front) = self.relations.front() {
            if front.l1.number() <= l1_state.finalized().number() {
                self.relations.pop_front();
            } else {
                break;
            }
        }
    }
}

#[async_trait]
impl<P, E> Stage for ForkchoiceStage<P, E>
where
    P: Stage<Output = BlockRelation> + Send,
    E: ExecutionEngine,
{
    type Output = BlockRelation;

    async fn pull(&mut self) -> Result<BlockRelation, StageError> {
        let relation = self.prev.pull().await?;

        self.unsafe_head = relation.l2;
        self.relations.push_back(relation);
        self.advance_pointers();

        let response = self
            .engine
            .forkchoice_update(self.forkchoice_state())
            .await
            .map_err(|e| StageError::Retryable(e.to_string()))?;
        match response.status {
            PayloadStatus::Valid => {}
            PayloadStatus::Syncing => {
                debug!(l2 = %relation.l2, "engine still syncing")
            }
            PayloadStatus::Invalid => {
                return Err(StageError::Recoverable(
                    relation.l1,
                    "engine rejected fork choice".into(),
                ));
            }
        }
        Ok(relation)
    }

    async fn recover(&mut self, l1_block: BlockId) -> Result<(), StageError> {
        // Drop every relation derived at or after the divergent L1 block.
        while let Some(back) = self.relations.back() {
            if back.l1.number() >= l1_block.number() {
                self.relations.pop_back();
            } else {
                break;
            }
        }

        let rewound = match self.relations.back() {
            Some(relation) => relation.l2,
            // Everything after finalized was dropped.
            None => self.finalized,
        };
        warn!(from = %self.unsafe_head, to = %rewound, "rewinding L2 fork choice");
        self.unsafe_head = rewound;
        if self.safe.number() > rewound.number() {
            self.safe = rewound;
        }

        // Point the engine back so replay can overwrite the old suffix.
        if self.unsafe_head.hash() != B256::ZERO {
            self.engine
                .forkchoice_update(self.forkchoice_state())
                .await
                .map_err(|e| StageError::Unexpected(format!("engine rewind failed: {e}")))?;
        }

        self.prev.recover(l1_block).await
    }
}
