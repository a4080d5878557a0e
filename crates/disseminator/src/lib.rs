//! Disseminates batches of L2 blocks via L1.
//!
//! On each tick: drain new L2 blocks into the batch builder, then sequence
//! built batches to the inbox contract one at a time, advancing the builder
//! only after the submission has its confirmations.  A detected L2 reorg
//! reverts the builder to the finalized head; the safe head running past
//! the last appended block is an invariant violation and aborts the
//! service.

use std::sync::Arc;

use async_trait::async_trait;
use keel_bridge::batch::BatchAttributes;
use keel_bridge::contracts::{BridgeError, InboxContract};
use keel_config::DisseminatorConfig;
use keel_derivation::block::DerivationBlock;
use keel_derivation::builder::{BatchBuilder, BuilderError};
use keel_ethio::rpc::types::RpcReceipt;
use keel_ethio::rpc::{BlockTag, L1Client, L2Client};
use keel_ethio::txmgr::TxMgrError;
use keel_primitives::block::BlockId;
use keel_tasks::ShutdownGuard;
use thiserror::Error;
use tracing::*;

#[derive(Debug, Error)]
pub enum DisseminatorError {
    /// Invariant violation; the service must abort.
    #[error("service in unexpected state: {0}")]
    UnexpectedSystemState(String),

    /// The local L2 chain no longer extends what we appended.
    #[error("L2 reorg detected: {0}")]
    L2ReorgDetected(String),

    #[error("rpc: {0}")]
    Rpc(String),

    #[error("submit: {0}")]
    Submit(#[from] BridgeError),
}

impl DisseminatorError {
    /// Whether the batch submission merely timed out (the batch stays
    /// staged and is retried next tick).
    pub fn is_submission_timeout(&self) -> bool {
        matches!(
            self,
            DisseminatorError::Submit(BridgeError::Tx(TxMgrError::Timeout))
        )
    }
}

/// Submission seam so tests can script L1 behavior.
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    /// Submits the batch and returns once the tx has the configured number
    /// of confirmations.
    async fn append_tx_batch(&self, attrs: &BatchAttributes) -> Result<RpcReceipt, BridgeError>;
}

#[async_trait]
impl<C: L1Client> BatchSubmitter for InboxContract<C> {
    async fn append_tx_batch(&self, attrs: &BatchAttributes) -> Result<RpcReceipt, BridgeError> {
        InboxContract::append_tx_batch(self, attrs).await
    }
}

pub struct BatchDisseminator<S, L> {
    cfg: DisseminatorConfig,
    builder: BatchBuilder,
    inbox: Arc<S>,
    l2_client: Arc<L>,
}

impl<S, L> BatchDisseminator<S, L>
where
    S: BatchSubmitter,
    L: L2Client,
{
    pub fn new(cfg: DisseminatorConfig, inbox: Arc<S>, l2_client: Arc<L>) -> Self {
        let builder = BatchBuilder::new(cfg.max_batch_bytes);
        Self {
            cfg,
            builder,
            inbox,
            l2_client,
        }
    }

    /// Service entry point.
    pub async fn run(mut self, guard: ShutdownGuard) -> anyhow::Result<()> {
        // Start from the last safe-beyond-doubt state.
        self.revert_to_finalized().await?;

        let mut ticker = tokio::time::interval(self.cfg.sequencing_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.step(&guard).await {
                        if matches!(err, DisseminatorError::UnexpectedSystemState(_)) {
                            return Err(anyhow::Error::new(err));
                        }
                        error!(%err, "sequencing step failed");
                    }
                }
                _ = guard.wait_for_shutdown() => {
                    info!("disseminator stopping");
                    return Ok(());
                }
            }
        }
    }

    /// One tick: fill the builder, then sequence everything buildable.
    pub async fn step(&mut self, guard: &ShutdownGuard) -> Result<(), DisseminatorError> {
        if let Err(err) = self.append_to_builder().await {
            if matches!(err, DisseminatorError::L2ReorgDetected(_)) {
                error!(%err, "reorg detected, reverting to finalized state");
                self.revert_to_finalized().await?;
            }
            return Err(err);
        }
        self.sequence_batches(guard).await
    }

    pub fn last_appended(&self) -> BlockId {
        self.builder.last_appended()
    }

    async fn revert_to_finalized(&mut self) -> Result<(), DisseminatorError> {
        let finalized = self
            .l2_client
            .header_by_tag(BlockTag::Finalized)
            .await
            .map_err(|e| DisseminatorError::Rpc(format!("failed to get finalized header: {e}")))?;
        self.builder.reset(finalized.block_id());
        Ok(())
    }

    /// Appends every L2 block past the last appended one to the builder.
    async fn append_to_builder(&mut self) -> Result<(), DisseminatorError> {
        let (start, end) = self.pending_l2_block_range().await?;
        for number in start..=end {
            let block = self
                .l2_client
                .block_by_number(number)
                .await
                .map_err(|e| DisseminatorError::Rpc(e.to_string()))?
                .ok_or_else(|| DisseminatorError::Rpc(format!("L2 block {number} missing")))?;
            let raw_txs = self
                .l2_client
                .raw_block_transactions(number)
                .await
                .map_err(|e| DisseminatorError::Rpc(e.to_string()))?;

            let derivation_block =
                DerivationBlock::new(number, block.header.timestamp(), raw_txs);
            match self.builder.append(derivation_block, block.header.block_ref()) {
                Ok(()) => {}
                Err(err @ BuilderError::InvalidBlock { .. }) => {
                    return Err(DisseminatorError::L2ReorgDetected(err.to_string()));
                }
                Err(err) => return Err(DisseminatorError::Rpc(err.to_string())),
            }
        }
        Ok(())
    }

    /// First and last unsafe L2 block numbers not yet appended.
    async fn pending_l2_block_range(&self) -> Result<(u64, u64), DisseminatorError> {
        let last_appended = self.builder.last_appended();
        let start = if last_appended.is_empty() {
            self.cfg.genesis_l2_block_number
        } else {
            last_appended.number() + 1
        };
        let safe = self
            .l2_client
            .header_by_tag(BlockTag::Safe)
            .await
            .map_err(|e| DisseminatorError::Rpc(format!("failed to get safe header: {e}")))?;
        if safe.number() > last_appended.number() {
            // Not possible with a single sequencer.  TODO: handle the
            // restart case where the disseminator lags its own batches.
            return Err(DisseminatorError::UnexpectedSystemState(
                "safe header exceeds last appended header".into(),
            ));
        }
        let end = self
            .l2_client
            .block_number()
            .await
            .map_err(|e| DisseminatorError::Rpc(e.to_string()))?;
        Ok((start, end))
    }

    /// Sequences batches until the builder runs dry or shutdown.
    async fn sequence_batches(&mut self, guard: &ShutdownGuard) -> Result<(), DisseminatorError> {
        loop {
            if guard.should_shutdown() {
                return Ok(());
            }
            match self.sequence_batch().await {
                Ok(true) => {}
                Ok(false) => {
                    info!("no more batches to sequence");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Builds and submits one batch, blocking until N confirmations, then
    /// commits it.  The builder keeps the batch staged on failure, so a
    /// timed-out submission is retried bit for bit next tick.
    async fn sequence_batch(&mut self) -> Result<bool, DisseminatorError> {
        let attrs = match self.builder.build() {
            Ok(attrs) => attrs,
            Err(BuilderError::Eof) => return Ok(false),
            Err(err) => return Err(DisseminatorError::Rpc(err.to_string())),
        };
        let receipt = self.inbox.append_tx_batch(&attrs).await?;
        info!(
            first_block = attrs.first_l2_block_number,
            blocks = attrs.num_blocks(),
            tx_hash = %receipt.transaction_hash,
            "sequenced batch to L1"
        );
        self.builder.advance();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_primitives::{Bytes, B256, U64};
    use keel_ethio::rpc::testing::MockChainClient;
    use keel_tasks::test_guard;

    use super::*;

    fn h(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    /// Scripted inbox: optionally fails the first `fail_count` calls with a
    /// timeout, records every submitted batch.
    struct MockInbox {
        submitted: Mutex<Vec<BatchAttributes>>,
        fail_count: Mutex<u32>,
    }

    impl MockInbox {
        fn new(fail_count: u32) -> Self {
            Self {
                submitted: Mutex::new(Vec::new()),
                fail_count: Mutex::new(fail_count),
            }
        }

        fn submitted(&self) -> Vec<BatchAttributes> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BatchSubmitter for MockInbox {
        async fn append_tx_batch(
            &self,
            attrs: &BatchAttributes,
        ) -> Result<RpcReceipt, BridgeError> {
            {
                let mut fails = self.fail_count.lock().unwrap();
                if *fails > 0 {
                    *fails -= 1;
                    return Err(BridgeError::Tx(TxMgrError::Timeout));
                }
            }
            self.submitted.lock().unwrap().push(attrs.clone());
            Ok(RpcReceipt {
                transaction_hash: B256::repeat_byte(0x77),
                block_number: Some(U64::from(100)),
                block_hash: Some(B256::repeat_byte(0x78)),
                status: Some(U64::from(1)),
            })
        }
    }

    fn l2_chain(blocks: u64) -> Arc<MockChainClient> {
        let client = Arc::new(MockChainClient::new());
        let headers: Vec<_> = (0..=blocks).map(|n| (n, h(n as u8 + 1))).collect();
        client.extend_chain(&headers);
        for n in 1..=blocks {
            client.set_raw_block_txs(n, vec![Bytes::from(format!("raw-tx-{n}").into_bytes())]);
        }
        client.set_safe(0);
        client.set_finalized(0);
        client
    }

    fn cfg() -> DisseminatorConfig {
        DisseminatorConfig {
            enabled: true,
            sequencing_interval_ms: 1000,
            max_batch_bytes: 100_000,
            genesis_l2_block_number: 0,
        }
    }

    #[tokio::test]
    async fn test_step_appends_and_sequences() {
        let l2 = l2_chain(3);
        let inbox = Arc::new(MockInbox::new(0));
        let mut d = BatchDisseminator::new(cfg(), inbox.clone(), l2);
        let guard = test_guard();

        d.revert_to_finalized().await.unwrap();
        d.step(&guard).await.unwrap();

        let submitted = inbox.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].first_l2_block_number, 1);
        assert_eq!(submitted[0].contexts.len(), 3);
        assert_eq!(d.last_appended().number(), 3);

        // Nothing new: the next step submits nothing.
        d.step(&guard).await.unwrap();
        assert_eq!(inbox.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_submission_is_retried_bit_for_bit() {
        let l2 = l2_chain(2);
        let inbox = Arc::new(MockInbox::new(1));
        let mut d = BatchDisseminator::new(cfg(), inbox.clone(), l2);
        let guard = test_guard();

        d.revert_to_finalized().await.unwrap();
        let err = d.step(&guard).await.unwrap_err();
        assert!(err.is_submission_timeout());
        assert!(inbox.submitted().is_empty());

        // advance() was never called; the retry ships the same batch.
        d.step(&guard).await.unwrap();
        let submitted = inbox.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].first_l2_block_number, 1);
        assert_eq!(submitted[0].contexts.len(), 2);
    }

    #[tokio::test]
    async fn test_safe_past_last_appended_aborts() {
        let l2 = l2_chain(6);
        l2.set_finalized(5);
        l2.set_safe(6);
        let inbox = Arc::new(MockInbox::new(0));
        let mut d = BatchDisseminator::new(cfg(), inbox, l2);
        let guard = test_guard();

        // Builder starts at the finalized block 5; safe reports 6.
        d.revert_to_finalized().await.unwrap();
        assert_eq!(d.last_appended().number(), 5);

        let err = d.step(&guard).await.unwrap_err();
        assert!(matches!(err, DisseminatorError::UnexpectedSystemState(_)));
    }

    #[tokio::test]
    async fn test_l2_reorg_reverts_to_finalized() {
        let l2 = l2_chain(3);
        l2.set_finalized(1);
        let inbox = Arc::new(MockInbox::new(0));
        let mut d = BatchDisseminator::new(cfg(), inbox.clone(), l2.clone());
        let guard = test_guard();

        d.revert_to_finalized().await.unwrap();
        assert_eq!(d.last_appended().number(), 1);
        d.step(&guard).await.unwrap();
        assert_eq!(d.last_appended().number(), 3);

        // L2 rewrites blocks 2..4; block 4's parent no longer matches.
        l2.reorg_to(&[(2, h(0x22)), (3, h(0x23)), (4, h(0x24))]);
        l2.set_raw_block_txs(4, vec![Bytes::from_static(b"raw-tx-4")]);

        let err = d.step(&guard).await.unwrap_err();
        assert!(matches!(err, DisseminatorError::L2ReorgDetected(_)));
        // Reverted to the finalized block; next step re-appends from there.
        assert_eq!(d.last_appended().number(), 1);

        d.step(&guard).await.unwrap();
        assert_eq!(d.last_appended().number(), 4);
        let last = inbox.submitted().last().cloned().unwrap();
        assert_eq!(last.first_l2_block_number, 2);
        assert_eq!(last.contexts.len(), 3);
    }
}
