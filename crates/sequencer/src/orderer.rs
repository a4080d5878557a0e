//! Transaction ordering for the execution pass.

use std::sync::Arc;

use async_trait::async_trait;
use keel_engine::PoolTx;
use keel_ethio::rpc::L2Client;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum OrdererError {
    #[error("rpc: {0}")]
    Rpc(String),
}

#[async_trait]
pub trait Orderer: Send + Sync {
    async fn order_transactions(&self, txs: Vec<PoolTx>) -> Result<Vec<PoolTx>, OrdererError>;
}

/// Orders by effective tip, highest first, then drops anything already
/// present on chain.
pub struct FeeOrderer<L> {
    l2_client: Arc<L>,
}

impl<L> FeeOrderer<L> {
    pub fn new(l2_client: Arc<L>) -> Self {
        Self { l2_client }
    }
}

#[async_trait]
impl<L: L2Client> Orderer for FeeOrderer<L> {
    async fn order_transactions(&self, mut txs: Vec<PoolTx>) -> Result<Vec<PoolTx>, OrdererError> {
        txs.sort_by(|a, b| b.effective_tip.cmp(&a.effective_tip));

        let mut sanitized = Vec::with_capacity(txs.len());
        for tx in txs {
            let existing = self
                .l2_client
                .transaction_by_hash(tx.hash)
                .await
                .map_err(|e| OrdererError::Rpc(e.to_string()))?;
            if existing.is_some() {
                warn!(tx = %tx.hash, "dropping tx already on chain");
                continue;
            }
            sanitized.push(tx);
        }
        Ok(sanitized)
    }
}
