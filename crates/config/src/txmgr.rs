use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TxMgrConfig {
    /// L1 blocks that must land on top of the inclusion block before a
    /// receipt is considered settled.
    #[serde(default = "default_confirmations")]
    pub confirmations: u64,

    /// How often inclusion is polled for.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a submission may sit unincluded before it is re-priced and
    /// re-submitted with the same nonce.
    #[serde(default = "default_stall_timeout_ms")]
    pub stall_timeout_ms: u64,

    /// Tip bump applied on each republish, in percent.  Must be at least 10
    /// to satisfy typical replacement rules; we default to 25.
    #[serde(default = "default_fee_bump_percent")]
    pub fee_bump_percent: u64,

    /// Headroom applied to gas estimates, in percent of the estimate.
    #[serde(default = "default_gas_safety_factor_percent")]
    pub gas_safety_factor_percent: u64,

    /// Priority fee (tip) for the first submission, in wei.
    #[serde(default = "default_priority_fee_wei")]
    pub priority_fee_wei: u128,

    /// Total attempts (initial + republishes) before giving up with
    /// a timeout error.
    #[serde(default = "default_max_submission_attempts")]
    pub max_submission_attempts: u32,
}

impl TxMgrConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl Default for TxMgrConfig {
    fn default() -> Self {
        Self {
            confirmations: default_confirmations(),
            poll_interval_ms: default_poll_interval_ms(),
            stall_timeout_ms: default_stall_timeout_ms(),
            fee_bump_percent: default_fee_bump_percent(),
            gas_safety_factor_percent: default_gas_safety_factor_percent(),
            priority_fee_wei: default_priority_fee_wei(),
            max_submission_attempts: default_max_submission_attempts(),
        }
    }
}

fn default_confirmations() -> u64 {
    3
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_stall_timeout_ms() -> u64 {
    60_000
}

fn default_fee_bump_percent() -> u64 {
    25
}

fn default_gas_safety_factor_percent() -> u64 {
    120
}

fn default_priority_fee_wei() -> u128 {
    1_500_000_000 // 1.5 gwei
}

fn default_max_submission_attempts() -> u32 {
    5
}
