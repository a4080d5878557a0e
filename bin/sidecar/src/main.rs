use std::fs;
use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use format_serde_error::SerdeError;
use keel_bridge::contracts::{InboxContract, RollupContract};
use keel_common::logging;
use keel_common::retry::{retry_with_backoff, ExponentialBackoff};
use keel_config::Config;
use keel_derivation::driver::{create_pipeline, pipeline_task, DerivationParams};
use keel_disseminator::BatchDisseminator;
use keel_engine::rpc::EngineRpcClient;
use keel_ethio::rpc::{HttpClient, L1Client};
use keel_ethio::state::state_tracker_task;
use keel_ethio::txmgr::signer::{ClefSigner, LocalSigner, TxSigner};
use keel_ethio::txmgr::TxManager;
use keel_primitives::l1::L1State;
use keel_sequencer::{executor_task, Executor, FeeOrderer, PendingPoolBackend};
use keel_status::StatusChannel;
use keel_tasks::TaskManager;
use keel_validator::{AssertionManager, DisabledProofBackend, Validator};
use thiserror::Error;
use tracing::*;

use crate::args::Args;

mod args;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
enum SidecarError {
    #[error("configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("runtime: {0}")]
    Runtime(#[source] anyhow::Error),
}

fn main() {
    let args: Args = argh::from_env();
    match run(args) {
        Ok(()) => {}
        Err(err @ SidecarError::Config(_)) => {
            eprintln!("{err}");
            process::exit(1);
        }
        Err(err @ SidecarError::Runtime(_)) => {
            eprintln!("{err}");
            process::exit(2);
        }
    }
}

fn load_configuration(path: &Path) -> anyhow::Result<Config> {
    let config_str = fs::read_to_string(path)?;
    let config = toml::from_str::<Config>(&config_str)
        .map_err(|err| SerdeError::new(config_str.clone(), (Box::new(err) as Box<dyn std::error::Error>, None, None)))?;
    Ok(config)
}

/// Values passed over arguments take precedence over the config file.
fn apply_overrides(config: &mut Config, args: &Args) {
    if args.disseminator_enabled {
        config.disseminator.enabled = true;
    }
    if args.validator_enabled {
        config.validator.enabled = true;
    }
    if args.sequencer_enabled {
        config.sequencer.enabled = true;
    }
    if let Some(endpoint) = &args.l1_endpoint {
        config.l1.endpoint = endpoint.clone();
    }
    if let Some(endpoint) = &args.l2_endpoint {
        config.l2.endpoint = endpoint.clone();
    }
    if let Some(key) = &args.private_key {
        config.signer.private_key = Some(key.clone());
    }
    if let Some(clef) = &args.clef {
        config.signer.clef_endpoint = Some(clef.clone());
    }
}

/// External signing (clef) is preferred over an in-process key.
fn create_signer(config: &Config) -> anyhow::Result<Arc<dyn TxSigner>> {
    if let Some(endpoint) = &config.signer.clef_endpoint {
        let address = config
            .signer
            .address
            .ok_or_else(|| anyhow::anyhow!("signer.address is required with a clef endpoint"))?;
        return Ok(Arc::new(ClefSigner::new(endpoint.clone(), address)));
    }
    if let Some(key) = &config.signer.private_key {
        warn!("no external signer specified, using in-process key");
        let signer = LocalSigner::from_hex(key)?;
        return Ok(Arc::new(signer));
    }
    Err(anyhow::anyhow!(
        "either signer.private_key or signer.clef_endpoint must be set"
    ))
}

fn run(args: Args) -> Result<(), SidecarError> {
    logging::init(args.verbosity.unwrap_or(1));

    info!("parsing configuration");
    let mut config = load_configuration(&args.config).map_err(SidecarError::Config)?;
    apply_overrides(&mut config, &args);
    if !config.disseminator.enabled && !config.validator.enabled && !config.sequencer.enabled {
        info!("no services enabled; running derivation only");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("keel-rt")
        .build()
        .map_err(|e| SidecarError::Runtime(e.into()))?;

    let manager = TaskManager::new(runtime.handle().clone());
    manager.start_signal_listeners();
    let executor = manager.executor();

    let status = StatusChannel::new(L1State::default());
    let l1_client = Arc::new(HttpClient::new(config.l1.endpoint.clone()));
    let l2_client = Arc::new(HttpClient::new(config.l2.endpoint.clone()));
    // The local L2 node serves both the eth and the engine namespaces.
    let engine = Arc::new(EngineRpcClient::from_url(config.l2.endpoint.clone()));
    let assertion_manager = Arc::new(AssertionManager::new());

    // Fail fast on a mis-pointed L1 endpoint.
    let chain_id = runtime
        .block_on(retry_with_backoff(
            "l1 chain id",
            5,
            &ExponentialBackoff::network(),
            || {
                let client = l1_client.clone();
                async move { client.chain_id().await }
            },
        ))
        .map_err(|err| SidecarError::Runtime(anyhow::anyhow!("failed to reach L1: {err}")))?;
    if chain_id != config.l1.chain_id {
        return Err(SidecarError::Config(anyhow::anyhow!(
            "L1 chain id mismatch: endpoint reports {chain_id}, config says {}",
            config.l1.chain_id
        )));
    }

    info!("starting L1 state sync");
    {
        let client = l1_client.clone();
        let status = status.clone();
        let poll = Duration::from_millis(config.l1.poll_interval_ms);
        executor.spawn_critical("ethio::state_tracker", move |guard| {
            state_tracker_task(client, status, poll, guard)
        });
    }

    info!("starting derivation pipeline");
    {
        let params = DerivationParams {
            genesis_l1: config.l1.genesis_block_id(),
            sequencer_inbox_addr: config.l1.sequencer_inbox_addr,
            rollup_addr: config.l1.rollup_addr,
            suggested_fee_recipient: config.signer.address.unwrap_or_default(),
        };
        let pipeline = create_pipeline(
            &params,
            l1_client.clone(),
            engine.clone(),
            assertion_manager.clone(),
            status.clone(),
        );
        executor.spawn_critical("derivation::pipeline", move |guard| {
            pipeline_task(pipeline, guard)
        });
    }

    let needs_l1_txs = config.disseminator.enabled || config.validator.enabled;
    let txmgr = if needs_l1_txs {
        let signer = create_signer(&config).map_err(SidecarError::Config)?;
        Some(Arc::new(TxManager::new(
            l1_client.clone(),
            signer,
            config.txmgr.clone(),
            config.l1.chain_id,
        )))
    } else {
        None
    };

    if config.disseminator.enabled {
        info!("starting disseminator");
        let txmgr = txmgr.clone().expect("sidecar: txmgr present");
        let inbox = Arc::new(InboxContract::new(
            l1_client.clone(),
            txmgr,
            config.l1.sequencer_inbox_addr,
        ));
        let disseminator =
            BatchDisseminator::new(config.disseminator.clone(), inbox, l2_client.clone());
        executor.spawn_critical("disseminator", move |guard| disseminator.run(guard));
    }

    if config.validator.enabled {
        info!("starting validator");
        let txmgr = txmgr.clone().expect("sidecar: txmgr present");
        let rollup = Arc::new(RollupContract::new(
            l1_client.clone(),
            txmgr.clone(),
            config.l1.rollup_addr,
        ));
        let inbox = Arc::new(InboxContract::new(
            l1_client.clone(),
            txmgr,
            config.l1.sequencer_inbox_addr,
        ));
        let validator = Validator::new(
            config.validator.clone(),
            config.l1.genesis_block_number,
            rollup,
            inbox,
            l2_client.clone(),
            status.clone(),
            Arc::new(DisabledProofBackend),
        );
        executor.spawn_critical("validator", move |guard| validator.run(guard));
    }

    if config.sequencer.enabled {
        info!("starting sequencer executor");
        let backend = Arc::new(PendingPoolBackend::new(l2_client.clone(), engine.clone()));
        {
            let backend = backend.clone();
            let poll = config.sequencer.min_execution_interval();
            executor.spawn_critical("sequencer::pool", move |guard| {
                backend.poll_task(poll, guard)
            });
        }
        let exec = Executor::new(
            config.sequencer.clone(),
            backend,
            FeeOrderer::new(l2_client.clone()),
        );
        executor.spawn_critical("sequencer::executor", move |guard| {
            executor_task(exec, guard)
        });
    }

    info!("services running");
    manager
        .monitor(Some(SHUTDOWN_TIMEOUT))
        .map_err(|err| SidecarError::Runtime(err.into()))?;
    info!("services stopped");
    Ok(())
}
