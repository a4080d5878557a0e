//! L1 transaction submission with stall re-pricing and confirmation
//! tracking.
//!
//! One manager serves one sender account.  `send` holds the nonce slot for
//! its whole duration, so at most one transaction per manager is in flight;
//! the services that share an L1 account share a manager.

pub mod signer;

use std::sync::Arc;
use std::time::Duration;

use alloy_consensus::TxEip1559;
use alloy_eips::eip2930::AccessList;
use alloy_primitives::{keccak256, Address, Bytes, TxKind, B256, U256};
use keel_config::TxMgrConfig;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::*;

use crate::rpc::{BlockTag, CallRequest, L1Client, RpcClientError, RpcReceipt};
use signer::{SignerError, TxSigner};

#[derive(Debug, Error)]
pub enum TxMgrError {
    #[error("insufficient funds")]
    InsufficientFunds,

    #[error("nonce too low")]
    NonceTooLow,

    #[error("replacement underpriced")]
    ReplacementUnderpriced,

    #[error("gave up waiting for inclusion")]
    Timeout,

    #[error("network: {0}")]
    Network(String),

    #[error("rpc: {0}")]
    Rpc(String),

    #[error("signer: {0}")]
    Signer(#[from] SignerError),
}

fn classify(err: RpcClientError) -> TxMgrError {
    match err {
        RpcClientError::Transport(msg) => TxMgrError::Network(msg),
        RpcClientError::Rpc(e) => {
            let msg = e.message.to_lowercase();
            if msg.contains("insufficient funds") {
                TxMgrError::InsufficientFunds
            } else if msg.contains("nonce too low") {
                TxMgrError::NonceTooLow
            } else if msg.contains("underpriced") {
                TxMgrError::ReplacementUnderpriced
            } else {
                TxMgrError::Rpc(e.to_string())
            }
        }
        RpcClientError::Decode(msg) => TxMgrError::Rpc(msg),
    }
}

/// A prepared transaction, before fees/nonce are filled in.
#[derive(Clone, Debug)]
pub struct TxCandidate {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
}

impl TxCandidate {
    pub fn new(to: Address, data: Bytes) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            gas_limit: None,
        }
    }
}

pub struct TxManager<C> {
    client: Arc<C>,
    signer: Arc<dyn TxSigner>,
    cfg: TxMgrConfig,
    chain_id: u64,
    next_nonce: tokio::sync::Mutex<Option<u64>>,
}

impl<C: L1Client> TxManager<C> {
    pub fn new(client: Arc<C>, signer: Arc<dyn TxSigner>, cfg: TxMgrConfig, chain_id: u64) -> Self {
        Self {
            client,
            signer,
            cfg,
            chain_id,
            next_nonce: tokio::sync::Mutex::new(None),
        }
    }

    pub fn sender(&self) -> Address {
        self.signer.address()
    }

    /// Submits the candidate and blocks until its receipt has the
    /// configured number of confirmations on top.
    pub async fn send(&self, candidate: TxCandidate) -> Result<RpcReceipt, TxMgrError> {
        let mut nonce_slot = self.next_nonce.lock().await;
        let nonce = match *nonce_slot {
            Some(n) => n,
            None => self
                .client
                .transaction_count(self.signer.address(), BlockTag::Pending)
                .await
                .map_err(classify)?,
        };

        let result = self.send_with_nonce(&candidate, nonce).await;
        match &result {
            Ok(_) => *nonce_slot = Some(nonce + 1),
            // Our view of the account went stale; re-query next time.
            Err(TxMgrError::NonceTooLow) => *nonce_slot = None,
            Err(_) => {}
        }
        result
    }

    async fn send_with_nonce(
        &self,
        candidate: &TxCandidate,
        nonce: u64,
    ) -> Result<RpcReceipt, TxMgrError> {
        let gas_limit = match candidate.gas_limit {
            Some(g) => g as u128,
            None => {
                let estimate = self
                    .client
                    .estimate_gas(&CallRequest {
                        from: Some(self.signer.address()),
                        to: candidate.to,
                        data: candidate.data.clone(),
                        value: Some(candidate.value),
                    })
                    .await
                    .map_err(classify)?;
                estimate * self.cfg.gas_safety_factor_percent as u128 / 100
            }
        };

        let mut tip = self.cfg.priority_fee_wei;
        // Replacements invalidate earlier submissions, but an earlier one
        // can still land; poll every hash we have broadcast.
        let mut pending_hashes: Vec<B256> = Vec::new();

        for attempt in 1..=self.cfg.max_submission_attempts {
            let base_fee = self.base_fee().await?;
            let tx = TxEip1559 {
                chain_id: self.chain_id,
                nonce,
                gas_limit: gas_limit as u64,
                max_fee_per_gas: base_fee.saturating_mul(2).saturating_add(tip),
                max_priority_fee_per_gas: tip,
                to: TxKind::Call(candidate.to),
                value: candidate.value,
                access_list: AccessList::default(),
                input: candidate.data.clone(),
            };
            let raw = self.signer.sign_transaction(tx).await?;
            let tx_hash = keccak256(&raw);

            match self.client.send_raw_transaction(raw).await {
                Ok(_) => pending_hashes.push(tx_hash),
                Err(RpcClientError::Rpc(e))
                    if e.message.to_lowercase().contains("already known") =>
                {
                    // The pool still holds this exact tx; keep waiting on it.
                    if !pending_hashes.contains(&tx_hash) {
                        pending_hashes.push(tx_hash);
                    }
                }
                Err(err) => {
                    let err = classify(err);
                    match err {
                        // A replacement race; the prior submission is still
                        // pending, keep polling it.
                        TxMgrError::ReplacementUnderpriced if !pending_hashes.is_empty() => {
                            warn!(%nonce, "replacement underpriced, keeping prior submission")
                        }
                        _ => return Err(err),
                    }
                }
            }

            debug!(%nonce, %attempt, %tx_hash, "submitted, polling for inclusion");
            if let Some(receipt) = self.poll_for_inclusion(&pending_hashes).await? {
                return self.wait_confirmations(receipt).await;
            }

            tip = tip * (100 + self.cfg.fee_bump_percent as u128) / 100;
            info!(%nonce, next_tip = %tip, "stalled, re-pricing");
        }
        Err(TxMgrError::Timeout)
    }

    /// Polls until a receipt shows up or the stall timeout passes.
    async fn poll_for_inclusion(
        &self,
        hashes: &[B256],
    ) -> Result<Option<RpcReceipt>, TxMgrError> {
        let deadline = Instant::now() + self.cfg.stall_timeout();
        loop {
            for &hash in hashes {
                if let Some(receipt) = self
                    .client
                    .transaction_receipt(hash)
                    .await
                    .map_err(classify)?
                {
                    if receipt.block_number().is_some() {
                        return Ok(Some(receipt));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.cfg.poll_interval()).await;
        }
    }

    /// Waits until `confirmations` blocks sit on top of the inclusion
    /// block, re-validating that the receipt is still canonical.
    async fn wait_confirmations(&self, receipt: RpcReceipt) -> Result<RpcReceipt, TxMgrError> {
        let tx_hash = receipt.transaction_hash;
        let mut current = receipt;
        loop {
            let included_at = match current.block_number() {
                Some(n) => n,
                None => return Err(TxMgrError::Timeout),
            };
            let tip = self.client.block_number().await.map_err(classify)?;
            if tip >= included_at + self.cfg.confirmations {
                // The inclusion block may have been reorged while we waited.
                match self
                    .client
                    .transaction_receipt(tx_hash)
                    .await
                    .map_err(classify)?
                {
                    Some(fresh) if fresh.block_number().is_some() => {
                        if fresh.block_number() == current.block_number() {
                            return Ok(fresh);
                        }
                        current = fresh;
                    }
                    _ => return Err(TxMgrError::Timeout),
                }
            } else {
                sleep(self.cfg.poll_interval()).await;
            }
        }
    }

    async fn base_fee(&self) -> Result<u128, TxMgrError> {
        let header = self
            .client
            .header_by_tag(BlockTag::Latest)
            .await
            .map_err(classify)?;
        Ok(header
            .base_fee_per_gas
            .map(|f| f.to::<u128>())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{B256, U64};
    use async_trait::async_trait;

    use super::*;
    use crate::rpc::testing::MockChainClient;
    use crate::rpc::types::RpcReceipt;

    /// Deterministic signer: "raw bytes" encode the nonce and tip so tests
    /// can tell submissions apart.
    struct StaticSigner;

    #[async_trait]
    impl TxSigner for StaticSigner {
        fn address(&self) -> Address {
            Address::repeat_byte(0xaa)
        }

        async fn sign_transaction(&self, tx: TxEip1559) -> Result<Bytes, SignerError> {
            Ok(format!("signed:nonce={},tip={}", tx.nonce, tx.max_priority_fee_per_gas)
                .into_bytes()
                .into())
        }
    }

    fn mgr_config() -> TxMgrConfig {
        TxMgrConfig {
            confirmations: 2,
            poll_interval_ms: 100,
            stall_timeout_ms: 1_000,
            fee_bump_percent: 25,
            gas_safety_factor_percent: 120,
            priority_fee_wei: 100,
            max_submission_attempts: 3,
        }
    }

    fn receipt(tx_hash: B256, block: u64) -> RpcReceipt {
        RpcReceipt {
            transaction_hash: tx_hash,
            block_number: Some(U64::from(block)),
            block_hash: Some(B256::repeat_byte(0xbb)),
            status: Some(U64::from(1)),
        }
    }

    fn chain(blocks: u64) -> Arc<MockChainClient> {
        let client = Arc::new(MockChainClient::new());
        let headers: Vec<_> = (0..=blocks).map(|n| (n, B256::repeat_byte(n as u8 + 1))).collect();
        client.extend_chain(&headers);
        client
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_confirms_first_submission() {
        let client = chain(10);
        let mgr = TxManager::new(client.clone(), Arc::new(StaticSigner), mgr_config(), 1);

        // The first submission's raw bytes are deterministic, so the
        // receipt can be scripted up front.
        let raw: Bytes = b"signed:nonce=0,tip=100".to_vec().into();
        client.insert_receipt(receipt(MockChainClient::raw_tx_hash(&raw), 5));

        let candidate = TxCandidate::new(Address::repeat_byte(1), Bytes::from_static(b"cd"));
        let got = mgr.send(candidate).await.unwrap();
        assert_eq!(got.block_number(), Some(5));
        assert_eq!(client.sent_raw_transactions().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_reprices_with_same_nonce() {
        let client = chain(10);
        let mgr = TxManager::new(client.clone(), Arc::new(StaticSigner), mgr_config(), 1);

        // Only the bumped replacement ever gets a receipt.
        let bumped: Bytes = b"signed:nonce=0,tip=125".to_vec().into();
        client.insert_receipt(receipt(MockChainClient::raw_tx_hash(&bumped), 7));

        let candidate = TxCandidate::new(Address::repeat_byte(1), Bytes::from_static(b"cd"));
        let got = mgr.send(candidate).await.unwrap();
        assert_eq!(got.block_number(), Some(7));

        let sent = client.sent_raw_transactions();
        assert_eq!(sent.len(), 2, "one original, one replacement");
        assert_eq!(sent[0], Bytes::from(b"signed:nonce=0,tip=100".to_vec()));
        assert_eq!(sent[1], bumped, "same nonce, bumped tip");
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_with_timeout() {
        let client = chain(10);
        let mgr = TxManager::new(client.clone(), Arc::new(StaticSigner), mgr_config(), 1);

        let candidate = TxCandidate::new(Address::repeat_byte(1), Bytes::from_static(b"cd"));
        let err = mgr.send(candidate).await.unwrap_err();
        assert!(matches!(err, TxMgrError::Timeout));
        assert_eq!(client.sent_raw_transactions().len(), 3, "max attempts");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonce_advances_across_sends() {
        let client = chain(10);
        client.set_nonce(4);
        let mgr = TxManager::new(client.clone(), Arc::new(StaticSigner), mgr_config(), 1);

        let raw4: Bytes = b"signed:nonce=4,tip=100".to_vec().into();
        let raw5: Bytes = b"signed:nonce=5,tip=100".to_vec().into();
        client.insert_receipt(receipt(MockChainClient::raw_tx_hash(&raw4), 5));
        client.insert_receipt(receipt(MockChainClient::raw_tx_hash(&raw5), 6));

        let candidate = TxCandidate::new(Address::repeat_byte(1), Bytes::from_static(b"cd"));
        mgr.send(candidate.clone()).await.unwrap();
        mgr.send(candidate).await.unwrap();

        let sent = client.sent_raw_transactions();
        assert_eq!(sent, vec![raw4, raw5], "nonce managed monotonically");
    }
}
