//! Engine-API client for a real execution node.
//!
//! Drives payload building through the standard three-step dance:
//! `forkchoiceUpdated` with attributes to start a build job, `getPayload`
//! to collect it, `newPayload` to apply it, then a final fork-choice update
//! so the next payload builds on top.

use alloy_primitives::{Address, Bytes, B256, U64};
use async_trait::async_trait;
use keel_ethio::rpc::{BlockTag, HttpClient, L2Client};
use keel_primitives::block::{BlockId, BlockRef};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::errors::{EngineError, EngineResult};
use crate::messages::{ForkchoiceResponse, ForkchoiceState, PayloadAttributes, PayloadStatus};
use crate::traits::{ExecutionEngine, L2Tag};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ForkchoiceStateV1 {
    head_block_hash: B256,
    safe_block_hash: B256,
    finalized_block_hash: B256,
}

impl From<ForkchoiceState> for ForkchoiceStateV1 {
    fn from(state: ForkchoiceState) -> Self {
        Self {
            head_block_hash: state.head_block_hash,
            safe_block_hash: state.safe_block_hash,
            finalized_block_hash: state.finalized_block_hash,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayloadAttributesV1 {
    timestamp: U64,
    prev_randao: B256,
    suggested_fee_recipient: Address,
    transactions: Vec<Bytes>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayloadStatusV1 {
    status: String,
    #[serde(default)]
    latest_valid_hash: Option<B256>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkchoiceUpdatedResult {
    payload_status: PayloadStatusV1,
    #[serde(default)]
    payload_id: Option<Bytes>,
}

pub struct EngineRpcClient {
    client: HttpClient,
}

impl EngineRpcClient {
    pub fn from_url(url: String) -> Self {
        Self {
            client: HttpClient::new(url),
        }
    }

    fn unavailable(err: impl std::fmt::Display) -> EngineError {
        EngineError::Unavailable(err.to_string())
    }

    async fn current_forkchoice(&self) -> EngineResult<ForkchoiceStateV1> {
        let head = self.tag_hash(BlockTag::Latest).await?;
        let safe = self.tag_hash(BlockTag::Safe).await?;
        let finalized = self.tag_hash(BlockTag::Finalized).await?;
        Ok(ForkchoiceStateV1 {
            head_block_hash: head,
            safe_block_hash: safe,
            finalized_block_hash: finalized,
        })
    }

    async fn tag_hash(&self, tag: BlockTag) -> EngineResult<B256> {
        Ok(self
            .client
            .header_by_tag(tag)
            .await
            .map_err(Self::unavailable)?
            .hash)
    }

    async fn forkchoice_updated(
        &self,
        fcs: &ForkchoiceStateV1,
        attrs: Option<&PayloadAttributesV1>,
    ) -> EngineResult<ForkchoiceUpdatedResult> {
        let params = vec![
            serde_json::to_value(fcs).expect("engine: serialize fcs"),
            attrs
                .map(|a| serde_json::to_value(a).expect("engine: serialize attrs"))
                .unwrap_or(serde_json::Value::Null),
        ];
        self.client
            .request("engine_forkchoiceUpdatedV1", params)
            .await
            .map_err(Self::unavailable)
    }
}

fn parse_status(status: &PayloadStatusV1) -> PayloadStatus {
    match status.status.as_str() {
        "VALID" => PayloadStatus::Valid,
        "SYNCING" | "ACCEPTED" => PayloadStatus::Syncing,
        _ => PayloadStatus::Invalid,
    }
}

fn payload_field_b256(payload: &serde_json::Value, field: &str) -> EngineResult<B256> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::InvalidPayload(format!("payload missing {field}")))
}

fn payload_field_u64(payload: &serde_json::Value, field: &str) -> EngineResult<u64> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .and_then(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .ok_or_else(|| EngineError::InvalidPayload(format!("payload missing {field}")))
}

#[async_trait]
impl ExecutionEngine for EngineRpcClient {
    async fn build_payload(&self, attrs: PayloadAttributes) -> EngineResult<BlockId> {
        let fcs = self.current_forkchoice().await?;
        let attrs_v1 = PayloadAttributesV1 {
            timestamp: U64::from(attrs.timestamp),
            prev_randao: attrs.prev_randao,
            suggested_fee_recipient: attrs.suggested_fee_recipient,
            transactions: attrs.transactions,
        };

        let started = self.forkchoice_updated(&fcs, Some(&attrs_v1)).await?;
        match parse_status(&started.payload_status) {
            PayloadStatus::Valid => {}
            PayloadStatus::Syncing => {
                return Err(EngineError::Unavailable("engine is syncing".into()))
            }
            PayloadStatus::Invalid => {
                return Err(EngineError::InvalidPayload(
                    "engine rejected payload attributes".into(),
                ))
            }
        }
        let payload_id = started
            .payload_id
            .ok_or_else(|| EngineError::InvalidPayload("no payload id returned".into()))?;

        let payload: serde_json::Value = self
            .client
            .request("engine_getPayloadV1", vec![json!(format!("{payload_id}"))])
            .await
            .map_err(Self::unavailable)?;
        let block_hash = payload_field_b256(&payload, "blockHash")?;
        let block_number = payload_field_u64(&payload, "blockNumber")?;

        let applied: PayloadStatusV1 = self
            .client
            .request("engine_newPayloadV1", vec![payload])
            .await
            .map_err(Self::unavailable)?;
        match parse_status(&applied) {
            PayloadStatus::Valid => {}
            PayloadStatus::Syncing => {
                return Err(EngineError::Unavailable("engine is syncing".into()))
            }
            PayloadStatus::Invalid => {
                // The node already holds a conflicting block at this height.
                return Err(EngineError::MismatchedBlock {
                    number: block_number,
                    local: applied.latest_valid_hash.unwrap_or(B256::ZERO),
                });
            }
        }

        // Advance the head so the next payload builds on this one.
        let next = ForkchoiceStateV1 {
            head_block_hash: block_hash,
            safe_block_hash: fcs.safe_block_hash,
            finalized_block_hash: fcs.finalized_block_hash,
        };
        self.forkchoice_updated(&next, None).await?;

        debug!(number = block_number, hash = %block_hash, "built payload");
        Ok(BlockId::new(block_number, block_hash))
    }

    async fn forkchoice_update(&self, state: ForkchoiceState) -> EngineResult<ForkchoiceResponse> {
        let result = self.forkchoice_updated(&state.into(), None).await?;
        Ok(ForkchoiceResponse {
            status: parse_status(&result.payload_status),
        })
    }

    async fn header_by_tag(&self, tag: L2Tag) -> EngineResult<BlockRef> {
        let tag = match tag {
            L2Tag::Latest => BlockTag::Latest,
            L2Tag::Safe => BlockTag::Safe,
            L2Tag::Finalized => BlockTag::Finalized,
        };
        Ok(self
            .client
            .header_by_tag(tag)
            .await
            .map_err(Self::unavailable)?
            .block_ref())
    }
}
