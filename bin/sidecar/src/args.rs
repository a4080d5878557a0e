use std::path::PathBuf;

use argh::FromArgs;

#[derive(Debug, Clone, FromArgs)]
#[argh(description = "keel sidecar: launch a disseminator and/or validator beside a local L2 client")]
pub struct Args {
    #[argh(option, short = 'c', description = "path to configuration")]
    pub config: PathBuf,

    #[argh(option, short = 'v', description = "log verbosity (0=warn .. 3=trace)")]
    pub verbosity: Option<u8>,

    #[argh(switch, description = "enable the batch disseminator")]
    pub disseminator_enabled: bool,

    #[argh(switch, description = "enable the validator")]
    pub validator_enabled: bool,

    #[argh(switch, description = "enable the sequencer executor")]
    pub sequencer_enabled: bool,

    #[argh(option, description = "L1 RPC endpoint")]
    pub l1_endpoint: Option<String>,

    #[argh(option, description = "L2 RPC endpoint")]
    pub l2_endpoint: Option<String>,

    #[argh(option, description = "hex private key for L1 transactions")]
    pub private_key: Option<String>,

    #[argh(option, description = "external (clef-style) signer endpoint")]
    pub clef: Option<String>,
}
