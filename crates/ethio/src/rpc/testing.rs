//! Scripted in-memory chain client for tests across the workspace.
//!
//! Plays the role of both the L1 and the L2 node: tests append headers and
//! blocks, move the safe/finalized tags, inject receipts and reorgs, and the
//! client answers queries the way a real node would.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use alloy_primitives::{keccak256, Address, Bytes, B256, U64};
use async_trait::async_trait;

use super::error::{RpcClientError, RpcError};
use super::traits::{L1Client, L2Client, RpcResult};
use super::types::{BlockTag, CallRequest, LogFilter, RpcBlock, RpcHeader, RpcLog, RpcReceipt, RpcTransaction};

const MOCK_GENESIS_TIMESTAMP: u64 = 1_700_000_000;

#[derive(Default)]
struct MockState {
    headers: BTreeMap<u64, RpcHeader>,
    txs_by_block: BTreeMap<u64, Vec<RpcTransaction>>,
    raw_txs_by_block: BTreeMap<u64, Vec<Bytes>>,
    raw_by_hash: HashMap<B256, Bytes>,
    safe: u64,
    finalized: u64,
    chain_id: u64,
    nonce: u64,
    gas_estimate: u128,
    receipts: HashMap<B256, RpcReceipt>,
    pool_txs: HashMap<B256, RpcTransaction>,
    logs: Vec<RpcLog>,
    sent_raw: Vec<Bytes>,
    call_responses: VecDeque<Bytes>,
    fail_next: u32,
}

pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChainClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                chain_id: 1,
                gas_estimate: 90_000,
                ..Default::default()
            }),
        }
    }

    fn make_header(state: &MockState, number: u64, hash: B256) -> RpcHeader {
        let parent_hash = if number == 0 {
            B256::ZERO
        } else {
            state
                .headers
                .get(&(number - 1))
                .map(|h| h.hash)
                .unwrap_or(B256::ZERO)
        };
        RpcHeader {
            hash,
            parent_hash,
            number: U64::from(number),
            timestamp: U64::from(MOCK_GENESIS_TIMESTAMP + 12 * number),
            state_root: B256::ZERO,
            base_fee_per_gas: Some(alloy_primitives::U256::from(1_000_000_000u64)),
        }
    }

    /// Appends headers at the given heights, linking parent hashes.
    pub fn extend_chain(&self, blocks: &[(u64, B256)]) {
        let mut state = self.state.lock().unwrap();
        for &(number, hash) in blocks {
            let header = Self::make_header(&state, number, hash);
            state.headers.insert(number, header);
        }
    }

    /// Drops everything at or above the first given height and appends the
    /// replacement headers.
    pub fn reorg_to(&self, blocks: &[(u64, B256)]) {
        if let Some(&(first, _)) = blocks.first() {
            let mut state = self.state.lock().unwrap();
            state.headers.split_off(&first);
            state.txs_by_block.split_off(&first);
            state.raw_txs_by_block.split_off(&first);
        }
        self.extend_chain(blocks);
    }

    pub fn set_safe(&self, number: u64) {
        self.state.lock().unwrap().safe = number;
    }

    pub fn set_finalized(&self, number: u64) {
        self.state.lock().unwrap().finalized = number;
    }

    pub fn set_state_root(&self, number: u64, root: B256) {
        let mut state = self.state.lock().unwrap();
        if let Some(header) = state.headers.get_mut(&number) {
            header.state_root = root;
        }
    }

    pub fn set_block_txs(&self, number: u64, txs: Vec<RpcTransaction>) {
        self.state.lock().unwrap().txs_by_block.insert(number, txs);
    }

    pub fn set_raw_block_txs(&self, number: u64, raw: Vec<Bytes>) {
        self.state
            .lock()
            .unwrap()
            .raw_txs_by_block
            .insert(number, raw);
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.state.lock().unwrap().nonce = nonce;
    }

    pub fn insert_receipt(&self, receipt: RpcReceipt) {
        let mut state = self.state.lock().unwrap();
        state.receipts.insert(receipt.transaction_hash, receipt);
    }

    pub fn insert_pool_tx(&self, tx: RpcTransaction) {
        self.state.lock().unwrap().pool_txs.insert(tx.hash, tx);
    }

    pub fn set_raw_tx(&self, tx_hash: B256, raw: Bytes) {
        self.state.lock().unwrap().raw_by_hash.insert(tx_hash, raw);
    }

    pub fn push_log(&self, log: RpcLog) {
        self.state.lock().unwrap().logs.push(log);
    }

    pub fn push_call_response(&self, data: Bytes) {
        self.state.lock().unwrap().call_responses.push_back(data);
    }

    /// Makes the next `n` requests fail with a transport error.
    pub fn fail_next(&self, n: u32) {
        self.state.lock().unwrap().fail_next = n;
    }

    pub fn sent_raw_transactions(&self) -> Vec<Bytes> {
        self.state.lock().unwrap().sent_raw.clone()
    }

    /// The hash a submitted raw tx is answered with.
    pub fn raw_tx_hash(raw: &[u8]) -> B256 {
        keccak256(raw)
    }

    fn check_fail(state: &mut MockState) -> RpcResult<()> {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(RpcClientError::Transport("injected failure".into()));
        }
        Ok(())
    }

    fn tip_number(state: &MockState) -> u64 {
        state.headers.keys().next_back().copied().unwrap_or(0)
    }

    fn header_at(state: &MockState, number: u64) -> Option<RpcHeader> {
        state.headers.get(&number).cloned()
    }

    fn block_at(state: &MockState, number: u64) -> Option<RpcBlock> {
        let header = state.headers.get(&number)?.clone();
        let transactions = state.txs_by_block.get(&number).cloned().unwrap_or_default();
        Some(RpcBlock {
            header,
            transactions,
        })
    }

    fn resolve_tag(state: &MockState, tag: BlockTag) -> u64 {
        match tag {
            BlockTag::Latest | BlockTag::Pending => Self::tip_number(state),
            BlockTag::Safe => state.safe,
            BlockTag::Finalized => state.finalized,
            BlockTag::Number(n) => n,
        }
    }
}

#[async_trait]
impl L1Client for MockChainClient {
    async fn chain_id(&self) -> RpcResult<u64> {
        Ok(self.state.lock().unwrap().chain_id)
    }

    async fn block_number(&self) -> RpcResult<u64> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(Self::tip_number(&state))
    }

    async fn header_by_number(&self, number: u64) -> RpcResult<Option<RpcHeader>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(Self::header_at(&state, number))
    }

    async fn header_by_tag(&self, tag: BlockTag) -> RpcResult<RpcHeader> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        let number = Self::resolve_tag(&state, tag);
        Self::header_at(&state, number).ok_or(RpcClientError::Rpc(RpcError {
            code: -32000,
            message: format!("header not found for {tag:?}"),
        }))
    }

    async fn block_by_number(&self, number: u64) -> RpcResult<Option<RpcBlock>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(Self::block_at(&state, number))
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> RpcResult<Option<RpcReceipt>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(state.receipts.get(&tx_hash).cloned())
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<B256> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        let hash = Self::raw_tx_hash(&raw);
        state.sent_raw.push(raw);
        Ok(hash)
    }

    async fn estimate_gas(&self, _req: &CallRequest) -> RpcResult<u128> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(state.gas_estimate)
    }

    async fn transaction_count(&self, _address: Address, _tag: BlockTag) -> RpcResult<u64> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(state.nonce)
    }

    async fn logs(&self, filter: &LogFilter) -> RpcResult<Vec<RpcLog>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        let from = filter
            .from_block
            .as_str()
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(0);
        let to = filter
            .to_block
            .as_str()
            .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
            .unwrap_or(u64::MAX);
        Ok(state
            .logs
            .iter()
            .filter(|log| {
                log.address == filter.address
                    && log.topics.first() == filter.topics.first()
                    && log
                        .block_number
                        .map(|n| {
                            let n = n.to::<u64>();
                            n >= from && n <= to
                        })
                        .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn call(&self, _req: &CallRequest, _tag: BlockTag) -> RpcResult<Bytes> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        state
            .call_responses
            .pop_front()
            .ok_or(RpcClientError::Rpc(RpcError {
                code: -32000,
                message: "no scripted call response".into(),
            }))
    }
}

#[async_trait]
impl L2Client for MockChainClient {
    async fn block_number(&self) -> RpcResult<u64> {
        <Self as L1Client>::block_number(self).await
    }

    async fn header_by_number(&self, number: u64) -> RpcResult<Option<RpcHeader>> {
        <Self as L1Client>::header_by_number(self, number).await
    }

    async fn header_by_tag(&self, tag: BlockTag) -> RpcResult<RpcHeader> {
        <Self as L1Client>::header_by_tag(self, tag).await
    }

    async fn block_by_number(&self, number: u64) -> RpcResult<Option<RpcBlock>> {
        <Self as L1Client>::block_by_number(self, number).await
    }

    async fn transaction_by_hash(&self, tx_hash: B256) -> RpcResult<Option<RpcTransaction>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(state.pool_txs.get(&tx_hash).cloned())
    }

    async fn raw_block_transactions(&self, number: u64) -> RpcResult<Vec<Bytes>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(state.raw_txs_by_block.get(&number).cloned().unwrap_or_default())
    }

    async fn pending_transactions(&self) -> RpcResult<Vec<RpcTransaction>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        let mut txs: Vec<_> = state.pool_txs.values().cloned().collect();
        txs.sort_by_key(|tx| tx.hash);
        Ok(txs)
    }

    async fn raw_transaction_by_hash(&self, tx_hash: B256) -> RpcResult<Option<Bytes>> {
        let mut state = self.state.lock().unwrap();
        Self::check_fail(&mut state)?;
        Ok(state.raw_by_hash.get(&tx_hash).cloned())
    }
}
