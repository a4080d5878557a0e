//! Assertion block-boundary search.
//!
//! Assertions commit to a state root, not to block numbers; the L2 block
//! range an assertion covers is recovered by scanning the local chain for
//! the parent's and the assertion's roots.  Linear in chain length; runs at
//! startup and on foreign assertions only.

use alloy_primitives::B256;
use keel_ethio::rpc::L2Client;
use keel_primitives::assertion::Assertion;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("no block with root {0} on the local chain")]
    NotFound(B256),

    #[error("found end block {0} before start block")]
    EndBeforeStart(u64),

    #[error("rpc: {0}")]
    Rpc(String),
}

/// Fills `assertion.start_block` / `assertion.end_block` by scanning the
/// local L2 chain from block 0.  The block after the one carrying the
/// parent's vm hash starts the range; the block carrying the assertion's
/// own vm hash ends it.
pub async fn set_l2_block_boundaries<L: L2Client>(
    l2_client: &L,
    assertion: &mut Assertion,
    parent: &Assertion,
) -> Result<(), BoundaryError> {
    let num_blocks = l2_client
        .block_number()
        .await
        .map_err(|e| BoundaryError::Rpc(e.to_string()))?;
    if num_blocks == 0 {
        info!("zero-initializing assertion block boundaries");
        assertion.start_block = 0;
        assertion.end_block = 0;
        return Ok(());
    }

    // By contract convention the parent vm hash equals the child's only for
    // the genesis assertion; zero it out so it cannot match a real root.
    let mut parent_vm_hash = parent.vm_hash;
    let mut start_found = false;
    if assertion.id == parent.id {
        parent_vm_hash = B256::ZERO;
        start_found = true;
    }

    for number in 0..=num_blocks {
        let header = l2_client
            .header_by_number(number)
            .await
            .map_err(|e| BoundaryError::Rpc(e.to_string()))?
            .ok_or_else(|| BoundaryError::Rpc(format!("L2 block {number} missing")))?;
        let root = header.state_root;
        if root == parent_vm_hash {
            assertion.start_block = number + 1;
            start_found = true;
        } else if root == assertion.vm_hash {
            assertion.end_block = number;
            if !start_found {
                return Err(BoundaryError::EndBeforeStart(number));
            }
            info!(
                id = %assertion.id,
                start = assertion.start_block,
                end = assertion.end_block,
                "found assertion boundaries"
            );
            return Ok(());
        }
    }
    Err(BoundaryError::NotFound(assertion.vm_hash))
}
