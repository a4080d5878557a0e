use alloy_primitives::{Address, Bytes, B256, U256, U64};
use keel_primitives::block::{BlockId, BlockRef};
use serde::{Deserialize, Serialize};

/// Block selector for header/block queries.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BlockTag {
    Latest,
    Safe,
    Finalized,
    Pending,
    Number(u64),
}

impl BlockTag {
    pub fn to_param(self) -> serde_json::Value {
        match self {
            BlockTag::Latest => "latest".into(),
            BlockTag::Safe => "safe".into(),
            BlockTag::Finalized => "finalized".into(),
            BlockTag::Pending => "pending".into(),
            BlockTag::Number(n) => format!("0x{n:x}").into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcHeader {
    pub hash: B256,
    pub parent_hash: B256,
    pub number: U64,
    pub timestamp: U64,
    pub state_root: B256,
    #[serde(default)]
    pub base_fee_per_gas: Option<U256>,
}

impl RpcHeader {
    pub fn number(&self) -> u64 {
        self.number.to::<u64>()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.to::<u64>()
    }

    pub fn block_id(&self) -> BlockId {
        BlockId::new(self.number(), self.hash)
    }

    pub fn block_ref(&self) -> BlockRef {
        BlockRef::new(self.block_id(), self.parent_hash, self.timestamp())
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: B256,
    #[serde(default)]
    pub to: Option<Address>,
    pub input: Bytes,
    #[serde(default)]
    pub gas_price: Option<U256>,
    #[serde(default)]
    pub max_priority_fee_per_gas: Option<U256>,
}

impl RpcTransaction {
    pub fn new(hash: B256, to: Option<Address>, input: Bytes) -> Self {
        Self {
            hash,
            to,
            input,
            gas_price: None,
            max_priority_fee_per_gas: None,
        }
    }

    /// Best-effort tip for fee ordering: the declared priority fee, or the
    /// legacy gas price.
    pub fn effective_tip(&self) -> u128 {
        self.max_priority_fee_per_gas
            .or(self.gas_price)
            .map(|f| f.to::<u128>())
            .unwrap_or(0)
    }
}

/// A block with full transaction objects, as returned by
/// `eth_getBlockByNumber(.., true)`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(flatten)]
    pub header: RpcHeader,
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: B256,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub status: Option<U64>,
}

impl RpcReceipt {
    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }

    pub fn succeeded(&self) -> bool {
        self.status.map(|s| s == U64::from(1)).unwrap_or(false)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
}

/// Parameters for `eth_call` / `eth_estimateGas`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<U256>,
}

/// Parameters for `eth_getLogs`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    pub address: Address,
    pub topics: Vec<B256>,
    pub from_block: serde_json::Value,
    pub to_block: serde_json::Value,
}

impl LogFilter {
    pub fn new(address: Address, topic0: B256, from: u64, to: u64) -> Self {
        Self {
            address,
            topics: vec![topic0],
            from_block: BlockTag::Number(from).to_param(),
            to_block: BlockTag::Number(to).to_param(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parses_hex_quantities() {
        let raw = r#"{
            "hash": "0x0101010101010101010101010101010101010101010101010101010101010101",
            "parentHash": "0x0202020202020202020202020202020202020202020202020202020202020202",
            "number": "0x1a",
            "timestamp": "0x6553f100",
            "stateRoot": "0x0303030303030303030303030303030303030303030303030303030303030303",
            "baseFeePerGas": "0x3b9aca00",
            "gasLimit": "0x1c9c380"
        }"#;
        let header: RpcHeader = serde_json::from_str(raw).unwrap();
        assert_eq!(header.number(), 26);
        assert_eq!(header.block_id().number(), 26);
        assert_eq!(header.base_fee_per_gas, Some(U256::from(1_000_000_000u64)));
    }

    #[test]
    fn test_block_tag_params() {
        assert_eq!(BlockTag::Safe.to_param(), "safe");
        assert_eq!(BlockTag::Number(255).to_param(), "0xff");
    }
}
