//! L1 bridge contract surface: ABI bindings, the batch calldata codec and
//! typed clients for the sequencer inbox and the rollup contract.

pub mod abi;
pub mod batch;
pub mod contracts;

pub use batch::{decode_batch, encode_batch, BatchAttributes, BatchContext, CodecError};
pub use contracts::{BridgeError, InboxContract, RollupContract, Staker};
