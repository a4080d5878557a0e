//! The long-running validator service loop.

use std::collections::HashSet;
use std::sync::Arc;

use alloy_primitives::U256;
use keel_bridge::contracts::BridgeError;
use keel_config::ValidatorConfig;
use keel_ethio::rpc::{BlockTag, L2Client};
use keel_ethio::txmgr::TxMgrError;
use keel_primitives::assertion::Assertion;
use keel_status::{HeadEvent, StatusChannel};
use keel_tasks::ShutdownGuard;
use tracing::*;

use crate::boundaries::{set_l2_block_boundaries, BoundaryError};
use crate::interface::{InboxReader, ProofBackend, RollupClient};

fn is_fatal(err: &BridgeError) -> bool {
    matches!(err, BridgeError::Tx(TxMgrError::InsufficientFunds))
}

pub struct Validator<R, I, L> {
    cfg: ValidatorConfig,
    rollup: Arc<R>,
    inbox: Arc<I>,
    l2_client: Arc<L>,
    status: StatusChannel,
    proof_backend: Arc<dyn ProofBackend>,
    /// Next L1 block to scan for `AssertionCreated` events.
    next_scan_block: u64,
    /// Assertion ids already handled; evicted state is rebuilt from chain.
    seen: HashSet<U256>,
}

impl<R, I, L> Validator<R, I, L>
where
    R: RollupClient,
    I: InboxReader,
    L: L2Client,
{
    pub fn new(
        cfg: ValidatorConfig,
        genesis_l1_number: u64,
        rollup: Arc<R>,
        inbox: Arc<I>,
        l2_client: Arc<L>,
        status: StatusChannel,
        proof_backend: Arc<dyn ProofBackend>,
    ) -> Self {
        Self {
            cfg,
            rollup,
            inbox,
            l2_client,
            status,
            proof_backend,
            next_scan_block: genesis_l1_number,
            seen: HashSet::new(),
        }
    }

    /// Service entry point.
    pub async fn run(mut self, guard: ShutdownGuard) -> anyhow::Result<()> {
        self.ensure_staked().await?;

        let mut heads = self.status.subscribe_heads();
        let mut ticker = tokio::time::interval(self.cfg.validation_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.cfg.is_resolver {
                        if let Err(err) = self.try_resolve().await {
                            if is_fatal(&err) {
                                return Err(anyhow::Error::new(err));
                            }
                            error!(%err, "failed while resolving assertions");
                        }
                    }
                    if self.cfg.is_creator {
                        if let Err(err) = self.create_assertion().await {
                            if is_fatal(&err) {
                                return Err(anyhow::Error::new(err));
                            }
                            error!(%err, "failed to create assertion");
                        }
                    }
                }
                event = heads.recv() => {
                    match event {
                        Ok(HeadEvent::New(head)) => {
                            if let Err(err) = self.scan_created_events(head.number()).await {
                                if is_fatal(&err) {
                                    return Err(anyhow::Error::new(err));
                                }
                                warn!(%err, "assertion event scan failed");
                            }
                        }
                        Ok(HeadEvent::Reorg { ancestor, .. }) => {
                            // Rescan from the ancestor; `seen` dedupes.
                            self.next_scan_block =
                                self.next_scan_block.min(ancestor.number() + 1);
                        }
                        Err(err) => {
                            warn!(%err, "head feed interrupted");
                        }
                    }
                }
                _ = guard.wait_for_shutdown() => {
                    info!("validator stopping");
                    return Ok(());
                }
            }
        }
    }

    /// Stakes the configured amount if this account is not yet staked.
    async fn ensure_staked(&self) -> anyhow::Result<()> {
        let staker = self
            .rollup
            .get_staker(self.rollup.sender())
            .await
            .map_err(anyhow::Error::new)?;
        if staker.is_staked {
            return Ok(());
        }
        info!(amount = self.cfg.stake_amount, "staking on rollup contract");
        self.rollup
            .stake(U256::from(self.cfg.stake_amount))
            .await
            .map_err(anyhow::Error::new)?;
        Ok(())
    }

    /// Confirms or rejects unresolved assertions until the contract reports
    /// nothing resolvable right now.
    async fn try_resolve(&self) -> Result<(), BridgeError> {
        loop {
            match self.rollup.require_first_unresolved_confirmable().await {
                Ok(()) => {
                    let receipt = self.rollup.confirm_first_unresolved().await?;
                    info!(tx_hash = %receipt.transaction_hash, "confirmed assertion");
                }
                Err(err) if err.is_revert() => {
                    match self
                        .rollup
                        .require_first_unresolved_rejectable(self.rollup.sender())
                        .await
                    {
                        Ok(()) => {
                            let receipt = self
                                .rollup
                                .reject_first_unresolved(self.rollup.sender())
                                .await?;
                            info!(tx_hash = %receipt.transaction_hash, "rejected assertion");
                        }
                        // Neither confirmable nor rejectable yet.
                        Err(err) if err.is_revert() => return Ok(()),
                        Err(err) => return Err(err),
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Creates an assertion over the current safe L2 state when the inbox
    /// has grown past the last asserted point.
    async fn create_assertion(&self) -> Result<(), BridgeError> {
        let inbox_size = self.inbox.inbox_size().await?;
        if inbox_size == U256::ZERO {
            return Ok(());
        }
        let staker = self.rollup.get_staker(self.rollup.sender()).await?;
        if staker.assertion_id != U256::ZERO {
            let current = self.rollup.get_assertion(staker.assertion_id).await?;
            if current.inbox_size >= inbox_size {
                debug!("inbox unchanged since last assertion");
                return Ok(());
            }
        }

        let safe = self
            .l2_client
            .header_by_tag(BlockTag::Safe)
            .await
            .map_err(|e| BridgeError::Rpc(e.to_string()))?;
        let vm_hash = safe.state_root;
        let receipt = self.rollup.create_assertion(vm_hash, inbox_size).await?;
        info!(
            %vm_hash,
            %inbox_size,
            tx_hash = %receipt.transaction_hash,
            "created assertion"
        );
        Ok(())
    }

    /// Scans `AssertionCreated` events up to `to_block` and validates every
    /// foreign assertion.
    async fn scan_created_events(&mut self, to_block: u64) -> Result<(), BridgeError> {
        if to_block < self.next_scan_block {
            return Ok(());
        }
        let events = self
            .rollup
            .assertion_created_events(self.next_scan_block, to_block)
            .await?;
        self.next_scan_block = to_block + 1;
        for (assertion, l1_block) in events {
            self.handle_created(assertion, l1_block).await?;
        }
        Ok(())
    }

    async fn handle_created(
        &mut self,
        assertion: Assertion,
        l1_block: u64,
    ) -> Result<(), BridgeError> {
        if !self.seen.insert(assertion.id) {
            return Ok(());
        }
        info!(id = %assertion.id, %l1_block, "observed AssertionCreated");

        if assertion.asserter == self.rollup.sender() {
            // Our own; stake already advanced on creation.
            return Ok(());
        }

        if assertion.is_genesis() {
            return self.check_genesis_assertion(&assertion).await;
        }

        let parent = self.rollup.get_assertion(assertion.parent).await?;
        let mut located = assertion.clone();
        match set_l2_block_boundaries(self.l2_client.as_ref(), &mut located, &parent).await {
            Ok(()) => {
                let receipt = self.rollup.advance_stake(located.id).await?;
                info!(
                    id = %located.id,
                    start = located.start_block,
                    end = located.end_block,
                    tx_hash = %receipt.transaction_hash,
                    "assertion matches local chain, stake advanced"
                );
            }
            Err(BoundaryError::Rpc(msg)) => {
                // Transient; allow a rescan to retry this assertion.
                self.seen.remove(&assertion.id);
                return Err(BridgeError::Rpc(msg));
            }
            Err(err) => {
                warn!(id = %assertion.id, %err, "assertion does not match local chain");
                if self.cfg.is_challenger {
                    if let Err(err) = self.proof_backend.open_challenge(&located).await {
                        error!(id = %located.id, %err, "failed to open challenge");
                    }
                }
            }
        }
        Ok(())
    }

    /// The genesis assertion must commit to our genesis state root; a
    /// mismatch means we are validating the wrong chain.
    async fn check_genesis_assertion(&self, assertion: &Assertion) -> Result<(), BridgeError> {
        let genesis = self
            .l2_client
            .header_by_number(0)
            .await
            .map_err(|e| BridgeError::Rpc(e.to_string()))?
            .ok_or_else(|| BridgeError::Rpc("L2 genesis block missing".into()))?;
        if assertion.vm_hash != genesis.state_root {
            return Err(BridgeError::Rpc(format!(
                "genesis assertion root {} does not match local genesis {}",
                assertion.vm_hash, genesis.state_root
            )));
        }
        Ok(())
    }
}
