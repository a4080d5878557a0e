//! Interface to the local L2 execution client.
//!
//! The sidecar never executes transactions itself; it drives the engine
//! through fork-choice updates and payload building and reads back block
//! identity.  [`stub::StubEngine`] is a deterministic in-memory stand-in
//! used by tests across the workspace.

pub mod errors;
pub mod messages;
pub mod rpc;
pub mod stub;
pub mod traits;

pub use errors::{EngineError, EngineResult};
pub use messages::{
    ForkchoiceResponse, ForkchoiceState, NewTxsEvent, PayloadAttributes, PayloadStatus, PoolTx,
};
pub use traits::{ExecutionEngine, MempoolBackend};
