//! The pull-pipeline contract and the shared stage types.
//!
//! Stages chain by ownership: each stage owns its predecessor and pulls
//! from it on demand.  Recovery runs the other way: the driver asks the
//! terminal stage to recover, each stage resets its own cursor and then
//! delegates to its predecessor, giving last-to-first order.

mod forkchoice;
mod headers;
mod processing;
mod txs;

use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, B256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use keel_bridge::abi::{IRollup, ISequencerInbox};
use keel_primitives::block::BlockId;
use thiserror::Error;

pub use forkchoice::ForkchoiceStage;
pub use headers::HeaderRetrievalStage;
pub use processing::TxProcessingStage;
pub use txs::TxRetrievalStage;

/// Stage failure modes the driver can act on.
///
/// Retryable errors never escape the driver loop; recoverable ones trigger
/// a pipeline-wide rewind; everything else is fatal and takes the process
/// down through the task group.
#[derive(Debug, Error)]
pub enum StageError {
    /// Transient condition (input not yet available, RPC hiccup).
    #[error("retryable: {0}")]
    Retryable(String),

    /// Divergence originating at the given L1 block; rewind to before it.
    #[error("recoverable at {0}: {1}")]
    Recoverable(BlockId, String),

    /// Invariant violation.  Fatal.
    #[error("unexpected system state: {0}")]
    Unexpected(String),
}

#[async_trait]
pub trait Stage: Send {
    type Output;

    /// Returns the next output, pulling from the predecessor as needed.
    async fn pull(&mut self) -> Result<Self::Output, StageError>;

    /// Rewinds the stage's cursor to just before `l1_block` and discards
    /// buffered outputs, then delegates to the predecessor.
    async fn recover(&mut self, l1_block: BlockId) -> Result<(), StageError>;
}

/// A transaction that passed the inbox/rollup filter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilteredTx {
    pub hash: B256,
    pub to: Address,
    pub selector: [u8; 4],
    pub input: Bytes,
}

/// All relevant transactions of one L1 block, in block order.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilteredBlock {
    pub l1: BlockId,
    pub txs: Vec<FilteredTx>,
}

/// What to do with a filtered transaction.  A tagged variant per known
/// method rather than dynamic dispatch, so the registry stays inspectable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TxHandlerKind {
    /// `SequencerInbox.appendTxBatch`: data availability, feeds the payload
    /// builder.
    AppendTxBatch,
    /// `Rollup.createAssertion`.
    AssertionCreated,
    /// `Rollup.confirmFirstUnresolvedAssertion`.
    AssertionConfirmed,
    /// `Rollup.rejectFirstUnresolvedAssertion`.
    AssertionRejected,
}

/// Dispatch table keyed by `(contract address, method selector)`.
#[derive(Clone, Debug)]
pub struct HandlerRegistry {
    handlers: HashMap<(Address, [u8; 4]), TxHandlerKind>,
}

impl HandlerRegistry {
    /// The standard table for one inbox and one rollup contract.
    pub fn standard(inbox_addr: Address, rollup_addr: Address) -> Self {
        let mut handlers = HashMap::new();
        handlers.insert(
            (inbox_addr, ISequencerInbox::appendTxBatchCall::SELECTOR),
            TxHandlerKind::AppendTxBatch,
        );
        handlers.insert(
            (rollup_addr, IRollup::createAssertionCall::SELECTOR),
            TxHandlerKind::AssertionCreated,
        );
        handlers.insert(
            (
                rollup_addr,
                IRollup::confirmFirstUnresolvedAssertionCall::SELECTOR,
            ),
            TxHandlerKind::AssertionConfirmed,
        );
        handlers.insert(
            (
                rollup_addr,
                IRollup::rejectFirstUnresolvedAssertionCall::SELECTOR,
            ),
            TxHandlerKind::AssertionRejected,
        );
        Self { handlers }
    }

    pub fn lookup(&self, to: Address, selector: [u8; 4]) -> Option<TxHandlerKind> {
        self.handlers.get(&(to, selector)).copied()
    }

    pub fn matches(&self, to: Address, selector: [u8; 4]) -> bool {
        self.handlers.contains_key(&(to, selector))
    }
}

/// Observer for rollup transactions the pipeline encounters in L1 order.
pub trait RollupStateObserver: Send + Sync {
    fn on_assertion_created(&self, l1: BlockId, tx: &FilteredTx);

    fn on_assertion_confirmed(&self, l1: BlockId, tx: &FilteredTx);

    fn on_assertion_rejected(&self, l1: BlockId, tx: &FilteredTx);
}

impl<T: RollupStateObserver + ?Sized> RollupStateObserver for std::sync::Arc<T> {
    fn on_assertion_created(&self, l1: BlockId, tx: &FilteredTx) {
        (**self).on_assertion_created(l1, tx)
    }

    fn on_assertion_confirmed(&self, l1: BlockId, tx: &FilteredTx) {
        (**self).on_assertion_confirmed(l1, tx)
    }

    fn on_assertion_rejected(&self, l1: BlockId, tx: &FilteredTx) {
        (**self).on_assertion_rejected(l1, tx)
    }
}

/// Observer for deployments that run derivation without a validator.
pub struct NoopRollupState;

impl RollupStateObserver for NoopRollupState {
    fn on_assertion_created(&self, _l1: BlockId, _tx: &FilteredTx) {}

    fn on_assertion_confirmed(&self, _l1: BlockId, _tx: &FilteredTx) {}

    fn on_assertion_rejected(&self, _l1: BlockId, _tx: &FilteredTx) {}
}
