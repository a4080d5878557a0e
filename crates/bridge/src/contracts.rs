//! Typed clients for the bridge contracts.  Transactions go through the
//! [`TxManager`]; views go through `eth_call`; event history through
//! `eth_getLogs`.

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{SolCall, SolEvent};
use keel_ethio::rpc::{BlockTag, CallRequest, L1Client, LogFilter, RpcClientError, RpcReceipt};
use keel_ethio::txmgr::{TxCandidate, TxManager, TxMgrError};
use keel_primitives::assertion::Assertion;
use thiserror::Error;
use tracing::debug;

use crate::abi::{IRollup, ISequencerInbox};
use crate::batch::{encode_batch, BatchAttributes, CodecError};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("tx: {0}")]
    Tx(#[from] TxMgrError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    /// A view call reverted; for the `require*` checks this means "not
    /// yet", not a failure.
    #[error("reverted: {0}")]
    Reverted(String),

    #[error("rpc: {0}")]
    Rpc(String),

    #[error("malformed return data: {0}")]
    Decode(String),
}

impl BridgeError {
    pub fn is_revert(&self) -> bool {
        matches!(self, BridgeError::Reverted(_))
    }
}

fn view_error(err: RpcClientError) -> BridgeError {
    match err {
        RpcClientError::Rpc(e) => BridgeError::Reverted(e.message),
        other => BridgeError::Rpc(other.to_string()),
    }
}

/// Client for the sequencer inbox contract.
pub struct InboxContract<C> {
    client: Arc<C>,
    txmgr: Arc<TxManager<C>>,
    address: Address,
}

impl<C: L1Client> InboxContract<C> {
    pub fn new(client: Arc<C>, txmgr: Arc<TxManager<C>>, address: Address) -> Self {
        Self {
            client,
            txmgr,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Submits a batch and waits for the configured confirmations.
    pub async fn append_tx_batch(&self, attrs: &BatchAttributes) -> Result<RpcReceipt, BridgeError> {
        let calldata = encode_batch(attrs)?;
        debug!(first_block = attrs.first_l2_block_number, bytes = calldata.len(), "submitting batch");
        let receipt = self.txmgr.send(TxCandidate::new(self.address, calldata)).await?;
        Ok(receipt)
    }

    /// Total number of txs the inbox has accepted.
    pub async fn inbox_size(&self) -> Result<U256, BridgeError> {
        let out = self
            .view(ISequencerInbox::getInboxSizeCall {}.abi_encode())
            .await?;
        let ret = ISequencerInbox::getInboxSizeCall::abi_decode_returns(&out, true)
            .map_err(|e| BridgeError::Decode(e.to_string()))?;
        Ok(ret._0)
    }

    async fn view(&self, data: Vec<u8>) -> Result<Bytes, BridgeError> {
        self.client
            .call(
                &CallRequest {
                    from: None,
                    to: self.address,
                    data: data.into(),
                    value: None,
                },
                BlockTag::Latest,
            )
            .await
            .map_err(view_error)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Staker {
    pub is_staked: bool,
    pub staked_amount: U256,
    pub assertion_id: U256,
}

/// Client for the rollup (assertion) contract.
pub struct RollupContract<C> {
    client: Arc<C>,
    txmgr: Arc<TxManager<C>>,
    address: Address,
}

impl<C: L1Client> RollupContract<C> {
    pub fn new(client: Arc<C>, txmgr: Arc<TxManager<C>>, address: Address) -> Self {
        Self {
            client,
            txmgr,
            address,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn sender(&self) -> Address {
        self.txmgr.sender()
    }

    pub async fn stake(&self, amount: U256) -> Result<RpcReceipt, BridgeError> {
        let data = IRollup::stakeCall { stakeAmount: amount }.abi_encode();
        let mut candidate = TxCandidate::new(self.address, data.into());
        candidate.value = amount;
        Ok(self.txmgr.send(candidate).await?)
    }

    pub async fn advance_stake(&self, assertion_id: U256) -> Result<RpcReceipt, BridgeError> {
        let data = IRollup::advanceStakeCall {
            assertionID: assertion_id,
        }
        .abi_encode();
        Ok(self.txmgr.send(TxCandidate::new(self.address, data.into())).await?)
    }

    pub async fn create_assertion(
        &self,
        vm_hash: B256,
        inbox_size: U256,
    ) -> Result<RpcReceipt, BridgeError> {
        let data = IRollup::createAssertionCall {
            vmHash: vm_hash,
            inboxSize: inbox_size,
        }
        .abi_encode();
        Ok(self.txmgr.send(TxCandidate::new(self.address, data.into())).await?)
    }

    pub async fn confirm_first_unresolved(&self) -> Result<RpcReceipt, BridgeError> {
        let data = IRollup::confirmFirstUnresolvedAssertionCall {}.abi_encode();
        Ok(self.txmgr.send(TxCandidate::new(self.address, data.into())).await?)
    }

    pub async fn reject_first_unresolved(&self, staker: Address) -> Result<RpcReceipt, BridgeError> {
        let data = IRollup::rejectFirstUnresolvedAssertionCall {
            stakerAddress: staker,
        }
        .abi_encode();
        Ok(self.txmgr.send(TxCandidate::new(self.address, data.into())).await?)
    }

    pub async fn get_staker(&self, addr: Address) -> Result<Staker, BridgeError> {
        let out = self.view(IRollup::getStakerCall { addr }.abi_encode()).await?;
        let ret = IRollup::getStakerCall::abi_decode_returns(&out, true)
            .map_err(|e| BridgeError::Decode(e.to_string()))?;
        Ok(Staker {
            is_staked: ret.isStaked,
            staked_amount: ret.stakedAmount,
            assertion_id: ret.assertionID,
        })
    }

    /// Reads assertion data from the contract.  Block boundaries are not
    /// on-chain; the caller derives them locally.
    pub async fn get_assertion(&self, id: U256) -> Result<Assertion, BridgeError> {
        let out = self
            .view(IRollup::getAssertionCall { assertionID: id }.abi_encode())
            .await?;
        let ret = IRollup::getAssertionCall::abi_decode_returns(&out, true)
            .map_err(|e| BridgeError::Decode(e.to_string()))?;
        Ok(Assertion {
            id,
            vm_hash: ret.vmHash,
            inbox_size: ret.inboxSize,
            parent: ret.parentID,
            proposal_time: ret.proposalTime.to::<u64>(),
            asserter: ret.asserter,
            start_block: 0,
            end_block: 0,
        })
    }

    /// Passes iff the first unresolved assertion can be confirmed right
    /// now; a revert is reported as [`BridgeError::Reverted`].
    pub async fn require_first_unresolved_confirmable(&self) -> Result<(), BridgeError> {
        self.view(IRollup::requireFirstUnresolvedAssertionIsConfirmableCall {}.abi_encode())
            .await
            .map(|_| ())
    }

    pub async fn require_first_unresolved_rejectable(
        &self,
        staker: Address,
    ) -> Result<(), BridgeError> {
        self.view(
            IRollup::requireFirstUnresolvedAssertionIsRejectableCall {
                stakerAddress: staker,
            }
            .abi_encode(),
        )
        .await
        .map(|_| ())
    }

    /// `AssertionCreated` events in the given L1 block range, oldest first.
    pub async fn assertion_created_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<(Assertion, u64)>, BridgeError> {
        let filter = LogFilter::new(
            self.address,
            IRollup::AssertionCreated::SIGNATURE_HASH,
            from_block,
            to_block,
        );
        let logs = self
            .client
            .logs(&filter)
            .await
            .map_err(|e| BridgeError::Rpc(e.to_string()))?;

        let mut events = Vec::with_capacity(logs.len());
        for log in logs {
            let ev = IRollup::AssertionCreated::decode_raw_log(
                log.topics.iter().copied(),
                &log.data,
                true,
            )
            .map_err(|e| BridgeError::Decode(e.to_string()))?;
            let l1_block = log
                .block_number
                .map(|n| n.to::<u64>())
                .ok_or_else(|| BridgeError::Decode("log without block number".into()))?;
            events.push((
                Assertion {
                    id: ev.assertionID,
                    vm_hash: ev.vmHash,
                    inbox_size: ev.inboxSize,
                    parent: ev.parentID,
                    proposal_time: 0,
                    asserter: ev.asserterAddr,
                    start_block: 0,
                    end_block: 0,
                },
                l1_block,
            ));
        }
        Ok(events)
    }

    async fn view(&self, data: Vec<u8>) -> Result<Bytes, BridgeError> {
        self.client
            .call(
                &CallRequest {
                    from: None,
                    to: self.address,
                    data: data.into(),
                    value: None,
                },
                BlockTag::Latest,
            )
            .await
            .map_err(view_error)
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::U64;
    use keel_ethio::rpc::testing::MockChainClient;
    use keel_ethio::rpc::types::RpcLog;
    use alloy_sol_types::SolValue;

    use super::*;

    #[tokio::test]
    async fn test_assertion_created_event_decoding() {
        let client = Arc::new(MockChainClient::new());
        let rollup_addr = Address::repeat_byte(0x22);

        let ev = IRollup::AssertionCreated {
            assertionID: U256::from(3),
            asserterAddr: Address::repeat_byte(0xaa),
            vmHash: B256::repeat_byte(0x11),
            inboxSize: U256::from(42),
            parentID: U256::from(2),
        };
        client.push_log(RpcLog {
            address: rollup_addr,
            topics: vec![IRollup::AssertionCreated::SIGNATURE_HASH],
            data: ev.encode_data().into(),
            block_number: Some(U64::from(90)),
            transaction_hash: Some(B256::repeat_byte(0x77)),
        });

        let txmgr = Arc::new(TxManager::new(
            client.clone(),
            Arc::new(NoSigner),
            Default::default(),
            1,
        ));
        let rollup = RollupContract::new(client, txmgr, rollup_addr);

        let events = rollup.assertion_created_events(0, 100).await.unwrap();
        assert_eq!(events.len(), 1);
        let (assertion, l1_block) = &events[0];
        assert_eq!(assertion.id, U256::from(3));
        assert_eq!(assertion.parent, U256::from(2));
        assert_eq!(assertion.inbox_size, U256::from(42));
        assert_eq!(*l1_block, 90);
    }

    #[tokio::test]
    async fn test_get_staker_decodes_tuple() {
        let client = Arc::new(MockChainClient::new());
        let ret = (true, U256::from(1000), U256::from(7)).abi_encode();
        client.push_call_response(ret.into());

        let txmgr = Arc::new(TxManager::new(
            client.clone(),
            Arc::new(NoSigner),
            Default::default(),
            1,
        ));
        let rollup = RollupContract::new(client, txmgr, Address::repeat_byte(0x22));

        let staker = rollup.get_staker(Address::repeat_byte(0xaa)).await.unwrap();
        assert!(staker.is_staked);
        assert_eq!(staker.staked_amount, U256::from(1000));
        assert_eq!(staker.assertion_id, U256::from(7));
    }

    struct NoSigner;

    #[async_trait::async_trait]
    impl keel_ethio::txmgr::signer::TxSigner for NoSigner {
        fn address(&self) -> Address {
            Address::ZERO
        }

        async fn sign_transaction(
            &self,
            _tx: alloy_consensus::TxEip1559,
        ) -> Result<Bytes, keel_ethio::txmgr::signer::SignerError> {
            unimplemented!("view-only tests")
        }
    }
}
