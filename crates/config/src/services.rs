use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisseminatorConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Interval between sequencing steps.
    #[serde(default = "default_sequencing_interval_ms")]
    pub sequencing_interval_ms: u64,

    /// Upper bound on the encoded size of one batch.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// L2 block number the chain starts at.
    #[serde(default)]
    pub genesis_l2_block_number: u64,
}

impl DisseminatorConfig {
    pub fn sequencing_interval(&self) -> Duration {
        Duration::from_millis(self.sequencing_interval_ms)
    }
}

impl Default for DisseminatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            sequencing_interval_ms: default_sequencing_interval_ms(),
            max_batch_bytes: default_max_batch_bytes(),
            genesis_l2_block_number: 0,
        }
    }
}

fn default_sequencing_interval_ms() -> u64 {
    12_000
}

fn default_max_batch_bytes() -> usize {
    // Comfortably under the 128kB tx size cap most L1 nodes enforce.
    100_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_validation_interval_ms")]
    pub validation_interval_ms: u64,

    /// Amount staked on the rollup contract at startup if not yet staked.
    #[serde(default)]
    pub stake_amount: u64,

    /// Whether this validator creates new assertions.
    #[serde(default)]
    pub is_creator: bool,

    /// Whether this validator confirms/rejects unresolved assertions.
    #[serde(default)]
    pub is_resolver: bool,

    /// Whether this validator opens challenges against bad assertions.
    #[serde(default)]
    pub is_challenger: bool,
}

impl ValidatorConfig {
    pub fn validation_interval(&self) -> Duration {
        Duration::from_millis(self.validation_interval_ms)
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            validation_interval_ms: default_validation_interval_ms(),
            stake_amount: 0,
            is_creator: false,
            is_resolver: false,
            is_challenger: false,
        }
    }
}

fn default_validation_interval_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SequencerConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Shortest window over which incoming txs are batched for execution.
    #[serde(default = "default_min_execution_interval_ms")]
    pub min_execution_interval_ms: u64,

    /// Longest window before a non-empty batch is force-committed.
    #[serde(default = "default_max_execution_interval_ms")]
    pub max_execution_interval_ms: u64,
}

impl SequencerConfig {
    pub fn min_execution_interval(&self) -> Duration {
        Duration::from_millis(self.min_execution_interval_ms)
    }

    pub fn max_execution_interval(&self) -> Duration {
        Duration::from_millis(self.max_execution_interval_ms)
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_execution_interval_ms: default_min_execution_interval_ms(),
            max_execution_interval_ms: default_max_execution_interval_ms(),
        }
    }
}

fn default_min_execution_interval_ms() -> u64 {
    500
}

fn default_max_execution_interval_ms() -> u64 {
    2_000
}
