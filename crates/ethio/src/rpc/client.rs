use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U64};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::*;

use super::error::{RpcClientError, RpcError};
use super::traits::{L1Client, L2Client, RpcResult};
use super::types::{BlockTag, CallRequest, LogFilter, RpcBlock, RpcHeader, RpcLog, RpcReceipt, RpcTransaction};

const MAX_TRANSPORT_RETRIES: u32 = 3;
const TRANSPORT_RETRY_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
struct Response<R> {
    result: Option<R>,
    error: Option<RpcError>,
}

/// JSON-RPC 2.0 client over HTTP.  Serves as both the L1 and the L2
/// client; the two traits only differ in which methods they expose.
#[derive(Debug)]
pub struct HttpClient {
    url: String,
    client: reqwest::Client,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(url: String) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            "application/json".parse().expect("rpc: content type header"),
        );
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("rpc: build http client");
        Self {
            url,
            client,
            next_id: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::AcqRel)
    }

    /// Issues one JSON-RPC request.  Connect/timeout failures are retried a
    /// few times inline; everything else surfaces immediately.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> RpcResult<T> {
        let mut retries = 0;
        loop {
            let id = self.next_id();
            let response = self
                .client
                .post(&self.url)
                .json(&json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": method,
                    "params": params,
                }))
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let data = resp
                        .json::<Response<T>>()
                        .await
                        .map_err(|err| RpcClientError::Decode(err.to_string()))?;
                    if let Some(err) = data.error {
                        return Err(RpcClientError::Rpc(err));
                    }
                    return match data.result {
                        Some(result) => Ok(result),
                        // `null` results decode to None; methods that can
                        // legitimately return null go through request_opt.
                        None => Err(RpcClientError::Decode(format!(
                            "null result for {method}"
                        ))),
                    };
                }
                Err(err) if err.is_connect() || err.is_timeout() || err.is_request() => {
                    retries += 1;
                    if retries >= MAX_TRANSPORT_RETRIES {
                        return Err(RpcClientError::Transport(err.to_string()));
                    }
                    warn!(%err, %method, "transport error, retrying");
                    tokio::time::sleep(Duration::from_millis(TRANSPORT_RETRY_DELAY_MS)).await;
                }
                Err(err) => return Err(RpcClientError::Transport(err.to_string())),
            }
        }
    }

    /// Like [`Self::request`] but treats a `null` result as `None`.
    pub async fn request_opt<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> RpcResult<Option<T>> {
        match self.request::<Option<T>>(method, params).await {
            Ok(v) => Ok(v),
            Err(RpcClientError::Decode(msg)) if msg.starts_with("null result") => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn quantity(&self, method: &str, params: Vec<serde_json::Value>) -> RpcResult<u64> {
        let n: U64 = self.request(method, params).await?;
        Ok(n.to::<u64>())
    }
}

#[async_trait]
impl L1Client for HttpClient {
    async fn chain_id(&self) -> RpcResult<u64> {
        self.quantity("eth_chainId", vec![]).await
    }

    async fn block_number(&self) -> RpcResult<u64> {
        self.quantity("eth_blockNumber", vec![]).await
    }

    async fn header_by_number(&self, number: u64) -> RpcResult<Option<RpcHeader>> {
        self.request_opt(
            "eth_getBlockByNumber",
            vec![BlockTag::Number(number).to_param(), false.into()],
        )
        .await
    }

    async fn header_by_tag(&self, tag: BlockTag) -> RpcResult<RpcHeader> {
        self.request("eth_getBlockByNumber", vec![tag.to_param(), false.into()])
            .await
    }

    async fn block_by_number(&self, number: u64) -> RpcResult<Option<RpcBlock>> {
        self.request_opt(
            "eth_getBlockByNumber",
            vec![BlockTag::Number(number).to_param(), true.into()],
        )
        .await
    }

    async fn transaction_receipt(&self, tx_hash: B256) -> RpcResult<Option<RpcReceipt>> {
        self.request_opt(
            "eth_getTransactionReceipt",
            vec![format!("{tx_hash}").into()],
        )
        .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> RpcResult<B256> {
        self.request("eth_sendRawTransaction", vec![format!("{raw}").into()])
            .await
    }

    async fn estimate_gas(&self, req: &CallRequest) -> RpcResult<u128> {
        let n: alloy_primitives::U256 = self
            .request(
                "eth_estimateGas",
                vec![serde_json::to_value(req).expect("rpc: serialize call request")],
            )
            .await?;
        Ok(n.to::<u128>())
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> RpcResult<u64> {
        self.quantity(
            "eth_getTransactionCount",
            vec![format!("{address}").into(), tag.to_param()],
        )
        .await
    }

    async fn logs(&self, filter: &LogFilter) -> RpcResult<Vec<RpcLog>> {
        self.request(
            "eth_getLogs",
            vec![serde_json::to_value(filter).expect("rpc: serialize log filter")],
        )
        .await
    }

    async fn call(&self, req: &CallRequest, tag: BlockTag) -> RpcResult<Bytes> {
        self.request(
            "eth_call",
            vec![
                serde_json::to_value(req).expect("rpc: serialize call request"),
                tag.to_param(),
            ],
        )
        .await
    }
}

#[async_trait]
impl L2Client for HttpClient {
    async fn block_number(&self) -> RpcResult<u64> {
        self.quantity("eth_blockNumber", vec![]).await
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
        self.request_opt(
            "eth_getTransactionByHash",
            vec![format!("{tx_hash}").into()],
        )
        .await
    }

    async fn raw_block_transactions(&self, number: u64) -> RpcResult<Vec<Bytes>> {
        let Some(block) = <Self as L2Client>::block_by_number(self, number).await? else {
            return Ok(Vec::new());
        };
        let mut raw = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            let bytes = <Self as L2Client>::raw_transaction_by_hash(self, tx.hash)
                .await?
                .ok_or_else(|| {
                    RpcClientError::Decode(format!("raw tx {} unavailable", tx.hash))
                })?;
            raw.push(bytes);
        }
        Ok(raw)
    }

    async fn pending_transactions(&self) -> RpcResult<Vec<RpcTransaction>> {
        // The pending block has no hash yet, so only its tx list decodes.
        #[derive(serde::Deserialize)]
        struct PendingBlock {
            transactions: Vec<RpcTransaction>,
        }
        let block: Option<PendingBlock> = self
            .request_opt(
                "eth_getBlockByNumber",
                vec![BlockTag::Pending.to_param(), true.into()],
            )
            .await?;
        Ok(block.map(|b| b.transactions).unwrap_or_default())
    }

    async fn raw_transaction_by_hash(&self, tx_hash: B256) -> RpcResult<Option<Bytes>> {
        self.request_opt(
            "eth_getRawTransactionByHash",
            vec![format!("{tx_hash}").into()],
        )
        .await
    }
}
