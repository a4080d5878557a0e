//! Local cache of rollup transactions observed by the derivation pipeline.
//!
//! The pipeline forwards every inbox-adjacent rollup tx here in L1 order.
//! The cache is advisory: it is rebuilt from chain data after a restart and
//! may be evicted freely.

use std::collections::VecDeque;
use std::sync::Mutex;

use alloy_primitives::{B256, U256};
use alloy_sol_types::SolCall;
use keel_bridge::abi::IRollup;
use keel_derivation::stage::{FilteredTx, RollupStateObserver};
use keel_primitives::block::BlockId;
use tracing::{debug, warn};

/// Bound on retained entries; older sightings are evicted.
const CACHE_CAPACITY: usize = 1024;

/// One observed `createAssertion` call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreatedAssertionTx {
    pub l1: BlockId,
    pub tx_hash: B256,
    pub vm_hash: B256,
    pub inbox_size: U256,
}

#[derive(Default)]
struct Cache {
    created: VecDeque<CreatedAssertionTx>,
    confirmed_count: u64,
    rejected_count: u64,
}

#[derive(Default)]
pub struct AssertionManager {
    cache: Mutex<Cache>,
}

impl AssertionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Created-assertion txs seen so far, oldest first.
    pub fn created(&self) -> Vec<CreatedAssertionTx> {
        self.cache.lock().unwrap().created.iter().cloned().collect()
    }

    pub fn confirmed_count(&self) -> u64 {
        self.cache.lock().unwrap().confirmed_count
    }

    pub fn rejected_count(&self) -> u64 {
        self.cache.lock().unwrap().rejected_count
    }
}

impl RollupStateObserver for AssertionManager {
    fn on_assertion_created(&self, l1: BlockId, tx: &FilteredTx) {
        let call = match IRollup::createAssertionCall::abi_decode(&tx.input, true) {
            Ok(call) => call,
            Err(err) => {
                warn!(tx = %tx.hash, %err, "undecodable createAssertion calldata");
                return;
            }
        };
        debug!(%l1, vm_hash = %call.vmHash, "observed assertion creation");
        let mut cache = self.cache.lock().unwrap();
        cache.created.push_back(CreatedAssertionTx {
            l1,
            tx_hash: tx.hash,
            vm_hash: call.vmHash,
            inbox_size: call.inboxSize,
        });
        if cache.created.len() > CACHE_CAPACITY {
            cache.created.pop_front();
        }
    }

    fn on_assertion_confirmed(&self, l1: BlockId, tx: &FilteredTx) {
        debug!(%l1, tx = %tx.hash, "observed assertion confirmation");
        self.cache.lock().unwrap().confirmed_count += 1;
    }

    fn on_assertion_rejected(&self, l1: BlockId, tx: &FilteredTx) {
        debug!(%l1, tx = %tx.hash, "observed assertion rejection");
        self.cache.lock().unwrap().rejected_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::Address;

    use super::*;

    #[test]
    fn test_caches_created_assertions_in_order() {
        let manager = AssertionManager::new();
        for i in 1..=3u64 {
            let input = IRollup::createAssertionCall {
                vmHash: B256::repeat_byte(i as u8),
                inboxSize: U256::from(10 * i),
            }
            .abi_encode();
            manager.on_assertion_created(
                BlockId::new(i, B256::repeat_byte(0x10 + i as u8)),
                &FilteredTx {
                    hash: B256::repeat_byte(0x20 + i as u8),
                    to: Address::repeat_byte(0x2b),
                    selector: IRollup::createAssertionCall::SELECTOR,
                    input: input.into(),
                },
            );
        }

        let created = manager.created();
        assert_eq!(created.len(), 3);
        assert_eq!(created[0].inbox_size, U256::from(10));
        assert_eq!(created[2].vm_hash, B256::repeat_byte(3));
    }

    #[test]
    fn test_garbage_calldata_is_skipped() {
        let manager = AssertionManager::new();
        manager.on_assertion_created(
            BlockId::new(1, B256::repeat_byte(1)),
            &FilteredTx {
                hash: B256::repeat_byte(2),
                to: Address::repeat_byte(0x2b),
                selector: IRollup::createAssertionCall::SELECTOR,
                input: vec![0xde, 0xad].into(),
            },
        );
        assert!(manager.created().is_empty());
    }
}
