use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;

use super::error::RpcClientError;
use super::types::{BlockTag, CallRequest, LogFilter, RpcBlock, RpcHeader, RpcLog, RpcReceipt, RpcTransaction};

pub type RpcResult<T> = Result<T, RpcClientError>;

/// Read/submit surface of an L1 node.
///
/// Queries for not-yet-existing blocks return `Ok(None)` rather than an
/// error so callers can distinguish "not there yet" from failure.
#[async_trait]
pub trait L1Client: Send + Sync + 'static {
    async fn chain_id(&self) -> RpcResult<u64>;

    async fn block_number(&self) -> RpcResult<u64>;

    async fn header_by_number(&self, number: u64) -> RpcResult<Option<RpcHeader>>;

    async fn header_by_tag(&self, tag: BlockTag) -> RpcResult<RpcHeader>;

    /// Full block with transaction objects.
    async fn block_by_number(&self, number: u64) -> RpcResult<Option<RpcBlock>>;

    async fn transaction_receipt(&self, tx_hash: B256) -> RpcResult<Option<RpcReceipt>>;

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<B256>;

    async fn estimate_gas(&self, req: &CallRequest) -> RpcResult<u128>;

    /// Account nonce at the given tag (`Pending` for the next usable one).
    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RpcResult<u64>;

    async fn logs(&self, filter: &LogFilter) -> RpcResult<Vec<RpcLog>>;

    async fn call(&self, req: &CallRequest, tag: BlockTag) -> RpcResult<Bytes>;
}

/// Read surface of the local L2 client.
#[async_trait]
pub trait L2Client: Send + Sync + 'static {
    async fn block_number(&self) -> RpcResult<u64>;

    async fn header_by_number(&self, number: u64) -> RpcResult<Option<RpcHeader>>;

    async fn header_by_tag(&self, tag: BlockTag) -> RpcResult<RpcHeader>;

    async fn block_by_number(&self, number: u64) -> RpcResult<Option<RpcBlock>>;

    async fn transaction_by_hash(&self, tx_hash: B256) -> RpcResult<Option<RpcTransaction>>;

    /// Raw (consensus-encoded) transactions of a block, in block order.
    /// These are the bytes the disseminator publishes to L1.
    async fn raw_block_transactions(&self, number: u64) -> RpcResult<Vec<Bytes>>;

    /// Transactions waiting in the pending block.
    async fn pending_transactions(&self) -> RpcResult<Vec<RpcTransaction>>;

    async fn raw_transaction_by_hash(&self, tx_hash: B256) -> RpcResult<Option<Bytes>>;
}
