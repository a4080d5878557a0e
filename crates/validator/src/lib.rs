//! The validator: stakes on the rollup contract, creates and resolves
//! assertions, validates foreign assertions against the local L2 chain and
//! hands provably-wrong ones to the proof backend.

pub mod boundaries;
pub mod interface;
pub mod manager;
pub mod validator;

pub use boundaries::{set_l2_block_boundaries, BoundaryError};
pub use interface::{DisabledProofBackend, InboxReader, ProofBackend, ProofError, RollupClient};
pub use manager::AssertionManager;
pub use validator::Validator;
