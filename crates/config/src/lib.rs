pub mod config;
pub mod services;
pub mod txmgr;

pub use config::{Config, L1Config, L2Config, SignerConfig};
pub use services::{DisseminatorConfig, SequencerConfig, ValidatorConfig};
pub use txmgr::TxMgrConfig;
