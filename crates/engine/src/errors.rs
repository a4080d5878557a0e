use alloy_primitives::B256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The derived block conflicts with a block already present on the
    /// local chain at the same height.
    #[error("derived block at height {number} mismatches local block {local}")]
    MismatchedBlock { number: u64, local: B256 },

    #[error("unknown block hash {0}")]
    UnknownBlock(B256),

    #[error("engine rejected payload: {0}")]
    InvalidPayload(String),

    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
