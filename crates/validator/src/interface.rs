//! Seams the validator depends on: the rollup contract surface, the inbox
//! view and the proof backend collaborator.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use keel_bridge::contracts::{BridgeError, InboxContract, RollupContract, Staker};
use keel_ethio::rpc::types::RpcReceipt;
use keel_ethio::rpc::L1Client;
use keel_primitives::assertion::Assertion;
use thiserror::Error;
use tracing::error;

#[async_trait]
pub trait RollupClient: Send + Sync {
    fn sender(&self) -> Address;

    async fn stake(&self, amount: U256) -> Result<RpcReceipt, BridgeError>;

    async fn advance_stake(&self, assertion_id: U256) -> Result<RpcReceipt, BridgeError>;

    async fn create_assertion(
        &self,
        vm_hash: B256,
        inbox_size: U256,
    ) -> Result<RpcReceipt, BridgeError>;

    async fn confirm_first_unresolved(&self) -> Result<RpcReceipt, BridgeError>;

    async fn reject_first_unresolved(&self, staker: Address) -> Result<RpcReceipt, BridgeError>;

    async fn get_staker(&self, addr: Address) -> Result<Staker, BridgeError>;

    async fn get_assertion(&self, id: U256) -> Result<Assertion, BridgeError>;

    async fn require_first_unresolved_confirmable(&self) -> Result<(), BridgeError>;

    async fn require_first_unresolved_rejectable(&self, staker: Address)
        -> Result<(), BridgeError>;

    async fn assertion_created_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(Assertion, u64)>, BridgeError>;
}

#[async_trait]
impl<C: L1Client> RollupClient for RollupContract<C> {
    fn sender(&self) -> Address {
        RollupContract::sender(self)
    }

    async fn stake(&self, amount: U256) -> Result<RpcReceipt, BridgeError> {
        RollupContract::stake(self, amount).await
    }

    async fn advance_stake(&self, assertion_id: U256) -> Result<RpcReceipt, BridgeError> {
        RollupContract::advance_stake(self, assertion_id).await
    }

    async fn create_assertion(
        &self,
        vm_hash: B256,
        inbox_size: U256,
    ) -> Result<RpcReceipt, BridgeError> {
        RollupContract::create_assertion(self, vm_hash, inbox_size).await
    }

    async fn confirm_first_unresolved(&self) -> Result<RpcReceipt, BridgeError> {
        RollupContract::confirm_first_unresolved(self).await
    }

    async fn reject_first_unresolved(&self, staker: Address) -> Result<RpcReceipt, BridgeError> {
        RollupContract::reject_first_unresolved(self, staker).await
    }

    async fn get_staker(&self, addr: Address) -> Result<Staker, BridgeError> {
        RollupContract::get_staker(self, addr).await
    }

    async fn get_assertion(&self, id: U256) -> Result<Assertion, BridgeError> {
        RollupContract::get_assertion(self, id).await
    }

    async fn require_first_unresolved_confirmable(&self) -> Result<(), BridgeError> {
        RollupContract::require_first_unresolved_confirmable(self).await
    }

    async fn require_first_unresolved_rejectable(
        &self,
        staker: Address,
    ) -> Result<(), BridgeError> {
        RollupContract::require_first_unresolved_rejectable(self, staker).await
    }

    async fn assertion_created_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(Assertion, u64)>, BridgeError> {
        RollupContract::assertion_created_events(self, from_block, to_block).await
    }
}

#[async_trait]
pub trait InboxReader: Send + Sync {
    /// Total number of txs the inbox has accepted.
    async fn inbox_size(&self) -> Result<U256, BridgeError>;
}

#[async_trait]
impl<C: L1Client> InboxReader for InboxContract<C> {
    async fn inbox_size(&self) -> Result<U256, BridgeError> {
        InboxContract::inbox_size(self).await
    }
}

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("proof backend unavailable: {0}")]
    Unavailable(String),

    #[error("proof generation failed: {0}")]
    Generation(String),
}

/// Collaborator that runs the interactive bisection protocol and produces
/// one-step proofs.  The protocol internals live behind this seam.
#[async_trait]
pub trait ProofBackend: Send + Sync {
    /// Opens a challenge against a mismatched assertion and drives it to
    /// resolution.
    async fn open_challenge(&self, assertion: &Assertion) -> Result<(), ProofError>;
}

/// Placeholder backend for deployments that never challenge.
pub struct DisabledProofBackend;

#[async_trait]
impl ProofBackend for DisabledProofBackend {
    async fn open_challenge(&self, assertion: &Assertion) -> Result<(), ProofError> {
        error!(id = %assertion.id, "challenge required but no proof backend configured");
        Err(ProofError::Unavailable("proof backend disabled".into()))
    }
}
