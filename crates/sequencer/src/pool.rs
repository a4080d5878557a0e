//! Pool backend for a sidecar-driven sequencer: polls the engine's pending
//! block for newly admitted transactions and commits ordered sets back
//! through payload building.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use keel_engine::{
    EngineError, EngineResult, ExecutionEngine, MempoolBackend, NewTxsEvent, PayloadAttributes,
    PoolTx,
};
use keel_ethio::rpc::L2Client;
use keel_tasks::ShutdownGuard;
use tokio::sync::broadcast;
use tracing::*;

const EVENT_CAPACITY: usize = 256;

pub struct PendingPoolBackend<L, E> {
    l2_client: Arc<L>,
    engine: Arc<E>,
    events: broadcast::Sender<NewTxsEvent>,
    seen: Mutex<HashSet<B256>>,
}

impl<L, E> PendingPoolBackend<L, E>
where
    L: L2Client,
    E: ExecutionEngine,
{
    pub fn new(l2_client: Arc<L>, engine: Arc<E>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            l2_client,
            engine,
            events,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// One polling round: emit every pending tx not seen before.
    pub async fn poll_once(&self) -> EngineResult<()> {
        let pending = self
            .l2_client
            .pending_transactions()
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;

        let fresh_hashes: Vec<B256> = {
            let mut seen = self.seen.lock().unwrap();
            // Entries that left the pending set are done; forget them.
            seen.retain(|hash| pending.iter().any(|tx| tx.hash == *hash));
            pending
                .iter()
                .filter(|tx| seen.insert(tx.hash))
                .map(|tx| tx.hash)
                .collect()
        };

        let mut fresh = Vec::with_capacity(fresh_hashes.len());
        for tx in pending.iter().filter(|tx| fresh_hashes.contains(&tx.hash)) {
            let raw = self
                .l2_client
                .raw_transaction_by_hash(tx.hash)
                .await
                .map_err(|e| EngineError::Unavailable(e.to_string()))?;
            let Some(raw) = raw else {
                // Evicted between the two queries.
                continue;
            };
            fresh.push(PoolTx {
                hash: tx.hash,
                effective_tip: tx.effective_tip(),
                raw,
            });
        }
        if !fresh.is_empty() {
            trace!(count = fresh.len(), "new pool txs");
            let _ = self.events.send(NewTxsEvent { txs: fresh });
        }
        Ok(())
    }

    /// Polling loop feeding the new-tx event feed.
    pub async fn poll_task(
        self: Arc<Self>,
        poll_interval: Duration,
        guard: ShutdownGuard,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {
                    if let Err(err) = self.poll_once().await {
                        warn!(%err, "pool poll failed");
                    }
                }
                _ = guard.wait_for_shutdown() => {
                    info!("pool poller stopping");
                    return Ok(());
                }
            }
        }
    }
}

#[async_trait]
impl<L, E> MempoolBackend for PendingPoolBackend<L, E>
where
    L: L2Client,
    E: ExecutionEngine,
{
    fn subscribe_new_txs(&self) -> broadcast::Receiver<NewTxsEvent> {
        self.events.subscribe()
    }

    async fn commit_transactions(&self, txs: Vec<PoolTx>) -> EngineResult<()> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("pool: system clock before epoch")
            .as_secs();
        let attrs = PayloadAttributes {
            timestamp,
            transactions: txs.into_iter().map(|tx| tx.raw).collect(),
            prev_randao: B256::ZERO,
            suggested_fee_recipient: Address::ZERO,
        };
        let id = self.engine.build_payload(attrs).await?;
        debug!(block = %id, "committed ordered txs");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Bytes;
    use keel_engine::stub::StubEngine;
    use keel_ethio::rpc::testing::MockChainClient;
    use keel_ethio::rpc::types::RpcTransaction;

    use super::*;

    #[tokio::test]
    async fn test_poll_emits_each_tx_once() {
        let l2 = Arc::new(MockChainClient::new());
        let engine = Arc::new(StubEngine::new(B256::repeat_byte(9)));
        let backend = PendingPoolBackend::new(l2.clone(), engine);
        let mut rx = backend.subscribe_new_txs();

        let hash = B256::repeat_byte(1);
        l2.insert_pool_tx(RpcTransaction::new(hash, None, Bytes::new()));
        l2.set_raw_tx(hash, Bytes::from_static(b"raw-1"));

        backend.poll_once().await.unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.txs.len(), 1);
        assert_eq!(event.txs[0].raw, Bytes::from_static(b"raw-1"));

        // Still pending; no duplicate event.
        backend.poll_once().await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_commit_builds_payload() {
        let l2 = Arc::new(MockChainClient::new());
        let engine = Arc::new(StubEngine::new(B256::repeat_byte(9)));
        let backend = PendingPoolBackend::new(l2, engine.clone());

        backend
            .commit_transactions(vec![PoolTx {
                hash: B256::repeat_byte(1),
                effective_tip: 5,
                raw: Bytes::from_static(b"raw-1"),
            }])
            .await
            .unwrap();
        assert_eq!(engine.head_ref().number(), 1);
    }
}
