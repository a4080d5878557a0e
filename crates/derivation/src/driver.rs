//! Pipeline assembly and the driving task.
//!
//! The driver owns the terminal stage and runs the pull loop: transient
//! errors back off and retry, recoverable errors rewind the whole pipeline,
//! anything else takes the service down through the task group.

use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::Address;
use keel_common::retry::{Backoff, ExponentialBackoff};
use keel_engine::ExecutionEngine;
use keel_ethio::rpc::L1Client;
use keel_primitives::block::{BlockId, BlockRelation};
use keel_status::StatusChannel;
use keel_tasks::ShutdownGuard;
use tracing::*;

use crate::payload::PayloadBuilder;
use crate::stage::{
    ForkchoiceStage, HandlerRegistry, HeaderRetrievalStage, RollupStateObserver, Stage,
    StageError, TxProcessingStage, TxRetrievalStage,
};

/// Static inputs of the pipeline.
#[derive(Clone, Debug)]
pub struct DerivationParams {
    pub genesis_l1: BlockId,
    pub sequencer_inbox_addr: Address,
    pub rollup_addr: Address,
    pub suggested_fee_recipient: Address,
}

pub type Pipeline<C, E, R> = ForkchoiceStage<
    TxProcessingStage<TxRetrievalStage<HeaderRetrievalStage<C>, C>, E, R>,
    E,
>;

/// Chains the four stages:
/// header retrieval -> tx retrieval -> tx processing -> L2 fork choice.
pub fn create_pipeline<C, E, R>(
    params: &DerivationParams,
    l1_client: Arc<C>,
    engine: Arc<E>,
    rollup_observer: R,
    status: StatusChannel,
) -> Pipeline<C, E, R>
where
    C: L1Client,
    E: ExecutionEngine,
    R: RollupStateObserver,
{
    let registry = Arc::new(HandlerRegistry::standard(
        params.sequencer_inbox_addr,
        params.rollup_addr,
    ));
    let headers = HeaderRetrievalStage::new(l1_client.clone(), params.genesis_l1);
    let txs = TxRetrievalStage::new(headers, l1_client, registry.clone());
    let processing = TxProcessingStage::new(
        txs,
        registry,
        PayloadBuilder::new(engine.clone(), params.suggested_fee_recipient),
        rollup_observer,
    );
    ForkchoiceStage::new(processing, engine, status)
}

/// Service entry point: drives the terminal stage until shutdown.
pub async fn pipeline_task<S>(mut pipeline: S, guard: ShutdownGuard) -> anyhow::Result<()>
where
    S: Stage<Output = BlockRelation>,
{
    let backoff = ExponentialBackoff::network();
    let mut delay = backoff.base_delay_ms();

    loop {
        if guard.should_shutdown() {
            info!("derivation pipeline stopping");
            return Ok(());
        }

        match pipeline.pull().await {
            Ok(relation) => {
                trace!(l1 = %relation.l1, l2 = %relation.l2, "derived block");
                delay = backoff.base_delay_ms();
            }
            Err(StageError::Retryable(reason)) => {
                trace!(%reason, "pipeline idle, backing off");
                let wait = Duration::from_millis(delay);
                delay = backoff.next_delay_ms(delay);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = guard.wait_for_shutdown() => {}
                }
            }
            Err(StageError::Recoverable(l1, reason)) => {
                warn!(%l1, %reason, "recovering pipeline");
                recover_with_retry(&mut pipeline, l1, &guard).await?;
                delay = backoff.base_delay_ms();
            }
            Err(err @ StageError::Unexpected(_)) => {
                error!(%err, "pipeline hit unexpected state");
                return Err(anyhow::Error::new(err));
            }
        }
    }
}

async fn recover_with_retry<S>(
    pipeline: &mut S,
    l1: BlockId,
    guard: &ShutdownGuard,
) -> anyhow::Result<()>
where
    S: Stage<Output = BlockRelation>,
{
    let backoff = ExponentialBackoff::network();
    let mut delay = backoff.base_delay_ms();
    loop {
        if guard.should_shutdown() {
            return Ok(());
        }
        match pipeline.recover(l1).await {
            Ok(()) => return Ok(()),
            Err(StageError::Retryable(reason)) => {
                trace!(%reason, "recovery waiting on RPC");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                delay = backoff.next_delay_ms(delay);
            }
            Err(err) => return Err(anyhow::Error::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{keccak256, Bytes, B256};
    use keel_bridge::batch::{encode_batch, BatchAttributes, BatchContext};
    use keel_engine::stub::StubEngine;
    use keel_engine::PayloadStatus;
    use keel_ethio::rpc::testing::MockChainClient;
    use keel_ethio::rpc::types::RpcTransaction;
    use keel_primitives::l1::L1State;
    use keel_status::StatusChannel;

    use super::*;
    use crate::stage::NoopRollupState;

    const INBOX: Address = Address::repeat_byte(0x1a);
    const ROLLUP: Address = Address::repeat_byte(0x2b);
    const L2_GENESIS: B256 = B256::repeat_byte(0x99);

    fn h(b: u8) -> B256 {
        B256::repeat_byte(b)
    }

    fn params(genesis: BlockId) -> DerivationParams {
        DerivationParams {
            genesis_l1: genesis,
            sequencer_inbox_addr: INBOX,
            rollup_addr: ROLLUP,
            suggested_fee_recipient: Address::repeat_byte(0xfe),
        }
    }

    /// One-block batch: `first_l2_block_number` with a single tx.
    fn batch_tx(first_l2_block: u64, tx_payload: &[u8]) -> RpcTransaction {
        let attrs = BatchAttributes {
            first_l2_block_number: first_l2_block,
            contexts: vec![BatchContext {
                num_txs: 1,
                timestamp: 1_700_000_000 + first_l2_block,
            }],
            tx_lengths: vec![tx_payload.len() as u32],
            tx_batch: Bytes::copy_from_slice(tx_payload),
        };
        let calldata = encode_batch(&attrs).unwrap();
        RpcTransaction::new(keccak256(&calldata), Some(INBOX), calldata)
    }

    fn scripted_chain(client: &MockChainClient, blocks: &[(u64, B256, u64)]) {
        // (l1_number, l1_hash, first_l2_block_in_batch)
        client.extend_chain(&blocks.iter().map(|&(n, hash, _)| (n, hash)).collect::<Vec<_>>());
        for &(n, _, l2_first) in blocks {
            client.set_block_txs(n, vec![batch_tx(l2_first, format!("tx-{l2_first}").as_bytes())]);
        }
    }

    #[tokio::test]
    async fn test_happy_path_derives_single_batch() {
        let client = Arc::new(MockChainClient::new());
        client.extend_chain(&[(1, h(1))]);
        let signed_tx = [0x7u8; 97];
        let attrs = BatchAttributes {
            first_l2_block_number: 1,
            contexts: vec![BatchContext {
                num_txs: 1,
                timestamp: 1_700_000_000,
            }],
            tx_lengths: vec![97],
            tx_batch: Bytes::copy_from_slice(&signed_tx),
        };
        let calldata = encode_batch(&attrs).unwrap();
        client.set_block_txs(
            1,
            vec![RpcTransaction::new(keccak256(&calldata), Some(INBOX), calldata)],
        );

        let engine = Arc::new(StubEngine::new(L2_GENESIS));
        let genesis = BlockId::new(1, h(1));
        let mut pipeline = create_pipeline(
            &params(genesis),
            client,
            engine.clone(),
            NoopRollupState,
            StatusChannel::default(),
        );

        let relation = pipeline.pull().await.unwrap();
        assert_eq!(relation.l1, genesis);
        assert_eq!(relation.l2.number(), 1);
        // Exactly one payload was built.
        assert_eq!(engine.head_ref().id(), relation.l2);
        assert_eq!(pipeline.unsafe_head(), relation.l2);

        // Nothing further on L1 yet.
        assert!(matches!(
            pipeline.pull().await,
            Err(StageError::Retryable(_))
        ));
    }

    #[tokio::test]
    async fn test_l1_reorg_rewinds_and_replays() {
        let client = Arc::new(MockChainClient::new());
        scripted_chain(&client, &[(1, h(1), 1), (2, h(2), 2), (3, h(3), 3)]);

        let engine = Arc::new(StubEngine::new(L2_GENESIS));
        let mut pipeline = create_pipeline(
            &params(BlockId::new(1, h(1))),
            client.clone(),
            engine.clone(),
            NoopRollupState,
            StatusChannel::default(),
        );

        for _ in 0..3 {
            pipeline.pull().await.unwrap();
        }
        let before = pipeline.unsafe_head();
        assert_eq!(before.number(), 3);

        // Replace h3 with h3' (different batch payload) and grow the chain
        // so the divergence becomes observable.
        client.reorg_to(&[(3, h(0x33))]);
        client.set_block_txs(3, vec![batch_tx(3, b"tx-3-prime")]);
        client.extend_chain(&[(4, h(4))]);
        client.set_block_txs(4, vec![batch_tx(4, b"tx-4")]);

        let err = pipeline.pull().await.unwrap_err();
        let StageError::Recoverable(divergent, _) = err else {
            panic!("expected recoverable, got {err:?}");
        };
        assert_eq!(divergent, BlockId::new(3, h(3)), "old block 3 diverged");

        pipeline.recover(divergent).await.unwrap();
        assert_eq!(pipeline.unsafe_head().number(), 2, "rewound to cursor 2");

        let r3 = pipeline.pull().await.unwrap();
        assert_eq!(r3.l1, BlockId::new(3, h(0x33)));
        let r4 = pipeline.pull().await.unwrap();
        assert_eq!(r4.l1.number(), 4);

        // Replayed state equals derivation over the new chain alone.
        let fresh_engine = Arc::new(StubEngine::new(L2_GENESIS));
        let fresh_client = Arc::new(MockChainClient::new());
        scripted_chain(&fresh_client, &[(1, h(1), 1), (2, h(2), 2)]);
        fresh_client.extend_chain(&[(3, h(0x33)), (4, h(4))]);
        fresh_client.set_block_txs(3, vec![batch_tx(3, b"tx-3-prime")]);
        fresh_client.set_block_txs(4, vec![batch_tx(4, b"tx-4")]);
        let mut fresh = create_pipeline(
            &params(BlockId::new(1, h(1))),
            fresh_client,
            fresh_engine.clone(),
            NoopRollupState,
            StatusChannel::default(),
        );
        for _ in 0..4 {
            fresh.pull().await.unwrap();
        }
        assert_eq!(pipeline.unsafe_head(), fresh.unsafe_head());
        assert_eq!(engine.head_ref().id(), fresh_engine.head_ref().id());
    }

    #[tokio::test]
    async fn test_safe_and_finalized_follow_l1_view() {
        let client = Arc::new(MockChainClient::new());
        scripted_chain(&client, &[(1, h(1), 1), (2, h(2), 2), (3, h(3), 3)]);

        let status = StatusChannel::default();
        status.update_l1_state(L1State::new(
            BlockId::new(3, h(3)),
            BlockId::new(2, h(2)),
            BlockId::new(1, h(1)),
        ));

        let engine = Arc::new(StubEngine::new(L2_GENESIS));
        let mut pipeline = create_pipeline(
            &params(BlockId::new(1, h(1))),
            client,
            engine,
            NoopRollupState,
            status,
        );

        let r1 = pipeline.pull().await.unwrap();
        let r2 = pipeline.pull().await.unwrap();
        let r3 = pipeline.pull().await.unwrap();

        assert_eq!(pipeline.unsafe_head(), r3.l2);
        assert_eq!(pipeline.safe(), r2.l2, "L1 block 2 is safe");
        assert_eq!(pipeline.finalized(), r1.l2, "L1 block 1 is finalized");
    }

    #[tokio::test]
    async fn test_engine_mismatch_surfaces_recoverable() {
        let client = Arc::new(MockChainClient::new());
        scripted_chain(&client, &[(1, h(1), 1)]);

        let engine = Arc::new(StubEngine::new(L2_GENESIS));
        engine.set_mismatch_at(1);
        let mut pipeline = create_pipeline(
            &params(BlockId::new(1, h(1))),
            client,
            engine,
            NoopRollupState,
            StatusChannel::default(),
        );

        let err = pipeline.pull().await.unwrap_err();
        assert!(matches!(
            err,
            StageError::Recoverable(l1, _) if l1 == BlockId::new(1, h(1))
        ));
    }

    #[tokio::test]
    async fn test_invalid_forkchoice_surfaces_recoverable() {
        let client = Arc::new(MockChainClient::new());
        scripted_chain(&client, &[(1, h(1), 1)]);

        let engine = Arc::new(StubEngine::new(L2_GENESIS));
        engine.set_next_forkchoice_status(PayloadStatus::Invalid);
        let mut pipeline = create_pipeline(
            &params(BlockId::new(1, h(1))),
            client,
            engine,
            NoopRollupState,
            StatusChannel::default(),
        );

        let err = pipeline.pull().await.unwrap_err();
        assert!(matches!(err, StageError::Recoverable(_, _)));
    }
}
