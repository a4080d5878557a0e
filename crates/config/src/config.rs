use alloy_primitives::{Address, B256};
use keel_primitives::block::BlockId;
use serde::{Deserialize, Serialize};

use crate::services::{DisseminatorConfig, SequencerConfig, ValidatorConfig};
use crate::txmgr::TxMgrConfig;

const DEFAULT_L1_POLL_INTERVAL_MS: u64 = 3_000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct L1Config {
    pub endpoint: String,

    pub chain_id: u64,

    /// Address of the sequencer inbox contract.
    pub sequencer_inbox_addr: Address,

    /// Address of the rollup (assertion) contract.
    pub rollup_addr: Address,

    /// L1 block the rollup was deployed at.  Derivation starts here.
    pub genesis_block_number: u64,
    pub genesis_block_hash: B256,

    #[serde(default = "default_l1_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl L1Config {
    pub fn genesis_block_id(&self) -> BlockId {
        BlockId::new(self.genesis_block_number, self.genesis_block_hash)
    }
}

fn default_l1_poll_interval_ms() -> u64 {
    DEFAULT_L1_POLL_INTERVAL_MS
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct L2Config {
    pub endpoint: String,

    pub chain_id: u64,
}

/// How L1 transactions get signed: an in-process key or an external
/// clef-style endpoint (which also needs the account address).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SignerConfig {
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub clef_endpoint: Option<String>,
    #[serde(default)]
    pub address: Option<Address>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub l1: L1Config,
    pub l2: L2Config,
    #[serde(default)]
    pub disseminator: DisseminatorConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
    #[serde(default)]
    pub sequencer: SequencerConfig,
    #[serde(default)]
    pub txmgr: TxMgrConfig,
    #[serde(default)]
    pub signer: SignerConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_load() {
        let config_string = r#"
            [l1]
            endpoint = "http://localhost:8545"
            chain_id = 1
            sequencer_inbox_addr = "0x1111111111111111111111111111111111111111"
            rollup_addr = "0x2222222222222222222222222222222222222222"
            genesis_block_number = 14
            genesis_block_hash = "0x0303030303030303030303030303030303030303030303030303030303030303"

            [l2]
            endpoint = "http://localhost:4011"
            chain_id = 13527

            [disseminator]
            enabled = true
            sequencing_interval_ms = 8000
            max_batch_bytes = 120000

            [validator]
            enabled = true
            is_resolver = true
            stake_amount = 1000000000

            [txmgr]
            confirmations = 6
        "#;

        let config: Config = toml::from_str(config_string).expect("config: parse toml");
        assert_eq!(config.l1.chain_id, 1);
        assert_eq!(config.l1.poll_interval_ms, 3_000, "default applies");
        assert_eq!(config.l1.genesis_block_id().number(), 14);
        assert!(config.disseminator.enabled);
        assert_eq!(config.disseminator.max_batch_bytes, 120_000);
        assert!(config.validator.is_resolver);
        assert!(!config.validator.is_challenger, "default applies");
        assert_eq!(config.txmgr.confirmations, 6);
        assert!(!config.sequencer.enabled);
    }
}
