use alloy_primitives::{Address, Bytes, B256};

/// The three fork-choice pointers handed to the engine.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ForkchoiceState {
    pub head_block_hash: B256,
    pub safe_block_hash: B256,
    pub finalized_block_hash: B256,
}

/// Everything the engine needs to build one L2 block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PayloadAttributes {
    pub timestamp: u64,
    pub transactions: Vec<Bytes>,
    pub prev_randao: B256,
    pub suggested_fee_recipient: Address,
}

/// Engine verdict on a fork-choice update or payload.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PayloadStatus {
    Valid,
    Invalid,
    Syncing,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ForkchoiceResponse {
    pub status: PayloadStatus,
}

/// One transaction sitting in the engine's pool, as exposed to the
/// sequencer's ordering pass.  Raw bytes plus just enough metadata to
/// fee-order without decoding.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PoolTx {
    pub hash: B256,
    pub effective_tip: u128,
    pub raw: Bytes,
}

/// Batch of transactions newly admitted to the engine's pool.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewTxsEvent {
    pub txs: Vec<PoolTx>,
}
