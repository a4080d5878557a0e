use std::fmt::Display;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A JSON-RPC error object returned by the node.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "RPC error code {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RpcError {}

#[derive(Debug, Error)]
pub enum RpcClientError {
    /// Transport-level failure (connect, timeout, ...).
    #[error("transport: {0}")]
    Transport(String),

    /// The node answered with an error object.
    #[error(transparent)]
    Rpc(RpcError),

    /// The node answered but the payload did not parse.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcClientError {
    /// Whether retrying the identical request can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcClientError::Transport(_))
    }
}
