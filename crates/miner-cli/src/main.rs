//! Command-line entry point: loads configuration, wires the RPC client,
//! template manager, and search coordinator together, and reports outcomes.

mod config;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use miner_core::{bytes_to_hex, validate_address, Target};
use miner_engine::{
    header_skeleton, Accelerator, CoordinatorEvent, CpuAccelerator, EngineTemplate,
    SearchCoordinator, SweepStrategy, TemplateManager,
};
use miner_rpc::{RpcClient, RpcConfig};
use tracing::{error, info, warn};

use config::{MiningMode, MinerConfig};

#[derive(Parser)]
#[command(name = "miner", about = "Bitcoin proof-of-work mining engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run with the mode selected by MINING_MODE (defaults to genesis).
    Start,
    /// Force live mode regardless of MINING_MODE.
    StartLive,
    /// Fixed-count hash rate benchmark; no node connection required.
    Benchmark {
        #[arg(long, default_value_t = 5_000_000)]
        nonces: u64,
        #[arg(long)]
        out: Option<String>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => MinerConfig::from_env(None).map_err(anyhow::Error::from).and_then(run),
        Command::StartLive => MinerConfig::from_env(Some(MiningMode::Live))
            .map_err(anyhow::Error::from)
            .and_then(run),
        Command::Benchmark { nonces, out } => run_benchmark(nonces, out),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "fatal error");
            ExitCode::FAILURE
        }
    }
}

fn run(config: MinerConfig) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        match config.mining_mode {
            MiningMode::Genesis => run_genesis(&config).await,
            MiningMode::Live => run_live(&config).await,
        }
    })
}

/// Self-contained demonstration: mines a synthetic, low-difficulty template
/// with no node connection, to exercise the full C6-C9 pipeline end to end.
async fn run_genesis(config: &MinerConfig) -> anyhow::Result<()> {
    info!("starting in genesis mode (no node connection)");

    let demo_address = validate_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", config.network)
        .expect("fixed demo address is always valid");

    let template = Arc::new(EngineTemplate {
        generation: 1,
        network: config.network,
        height: 0,
        prev_block_hash: [0u8; 32],
        bits: 0x207f_ffff,
        target: Target::from_bits(0x207f_ffff),
        curtime: 1_231_006_505,
        mintime: 1_231_006_505,
        reward: 5_000_000_000,
        reward_address: demo_address,
        other_txs: Vec::new(),
        other_txids: Vec::new(),
        default_witness_commitment: None,
    });

    let coordinator = build_coordinator(config);
    coordinator.start(template);

    let found = poll_until_terminal(&coordinator, config.progress_report_interval).await;
    coordinator.stop();

    match found {
        Some(event) => {
            info!(?event, "genesis demo search found a candidate block");
            Ok(())
        }
        None => anyhow::bail!("genesis demo search exhausted without finding a block"),
    }
}

/// Polls a real node, restarts the search on every significant template
/// change, and submits any found block.
async fn run_live(config: &MinerConfig) -> anyhow::Result<()> {
    info!(host = %config.rpc_host, port = config.rpc_port, "starting in live mode");

    let reward_address = config
        .reward_address
        .clone()
        .ok_or_else(|| anyhow::anyhow!("REWARD_ADDRESS is required in live mode"))?;

    let rpc = Arc::new(RpcClient::new(RpcConfig {
        host: config.rpc_host.clone(),
        port: config.rpc_port,
        username: config.rpc_username.clone(),
        password: config.rpc_password.clone(),
        timeout: Duration::from_secs(30),
        max_sockets: 64,
        max_idle_per_host: 32,
    })?);

    let manager = Arc::new(TemplateManager::new(
        rpc.clone(),
        config.network,
        reward_address,
        Duration::from_secs(5),
    ));
    let (_phase_rx, mut update_rx, _manager_handle, _stop_tx) = manager.spawn();

    let coordinator = build_coordinator(config);
    let mut started = false;

    loop {
        tokio::select! {
            changed = update_rx.changed() => {
                if changed.is_err() {
                    anyhow::bail!("template manager shut down unexpectedly");
                }
                let update = update_rx.borrow().clone();
                let Some(update) = update else { continue };

                if !started {
                    coordinator.start(update.new.clone());
                    started = true;
                } else if update.restart_required {
                    coordinator.update_template(update.new.clone(), true);
                }
            }
            _ = tokio::time::sleep(config.progress_report_interval) => {
                for event in coordinator.drain_events() {
                    if let CoordinatorEvent::BlockFound { generation, nonce, extra_nonce, hash, merkle_root } = event {
                        info!(generation, nonce, hash = %bytes_to_hex(&hash), "block found, submitting");
                        let current = update_rx.borrow().clone();
                        if let Some(update) = current {
                            submit_found_block(&rpc, &update.new, nonce, extra_nonce, merkle_root).await?;
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

async fn submit_found_block(
    rpc: &RpcClient,
    template: &EngineTemplate,
    nonce: u32,
    extra_nonce: [u8; 4],
    merkle_root: [u8; 32],
) -> anyhow::Result<()> {
    let coinbase = template
        .coinbase_builder()
        .with_extra_nonce(extra_nonce)
        .build(template.reward);

    let mut header = header_skeleton(template, merkle_root);
    header.nonce = nonce;

    let mut block = Vec::with_capacity(4096);
    block.extend_from_slice(&header.serialize());
    encode_varint(1 + template.other_txs.len() as u64, &mut block);
    block.extend_from_slice(&coinbase.raw_tx_with_witness);
    for tx in &template.other_txs {
        block.extend_from_slice(&tx.serialize());
    }

    let hex = bytes_to_hex(&block);
    match rpc.submit_block(&hex).await? {
        None => {
            info!("node accepted submitted block");
            Ok(())
        }
        Some(reason) => {
            warn!(reason = %reason, "node rejected submitted block");
            anyhow::bail!("block submission rejected: {reason}")
        }
    }
}

fn encode_varint(value: u64, out: &mut Vec<u8>) {
    if value < 0xfd {
        out.push(value as u8);
    } else if value <= 0xffff {
        out.push(0xfd);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        out.push(0xfe);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn build_coordinator(config: &MinerConfig) -> Arc<SearchCoordinator> {
    Arc::new(SearchCoordinator::new(
        config.worker_count,
        SweepStrategy::Exhaustive,
        /* extra_nonce_slice_size */ 1 << 12,
        /* progress_threshold */ 1 << 18,
        Arc::new(|| Box::new(CpuAccelerator::default()) as Box<dyn Accelerator>),
    ))
}

/// Poll the coordinator until a block is found or the search exhausts,
/// logging progress snapshots along the way. Used by genesis mode, which
/// has no template manager driving it.
async fn poll_until_terminal(
    coordinator: &SearchCoordinator,
    interval: Duration,
) -> Option<CoordinatorEvent> {
    loop {
        tokio::time::sleep(interval).await;
        for event in coordinator.drain_events() {
            match &event {
                CoordinatorEvent::Progress(snapshots) => {
                    let attempts: u64 = snapshots.iter().map(|s| s.attempts).sum();
                    info!(attempts, "search progress");
                }
                CoordinatorEvent::SearchExhausted { .. } => return None,
                CoordinatorEvent::BlockFound { .. } => return Some(event),
            }
        }
    }
}

fn run_benchmark(nonces: u64, out: Option<String>) -> anyhow::Result<()> {
    let header = [0u8; 76];
    let target = Target::from_bytes([0u8; 32]); // unreachable: measures full-range throughput
    let mut accelerator = CpuAccelerator::default();

    let mut samples = Vec::new();
    let mut remaining = nonces;
    let mut cursor: u32 = 0;

    while remaining > 0 {
        let batch = remaining.min(1 << 20) as u32;
        let chunk_end = cursor.saturating_add(batch - 1);
        let start = Instant::now();
        let result = accelerator
            .scan(&header, cursor..=chunk_end, &target)
            .expect("CPU accelerator never errors");
        let elapsed = start.elapsed();

        let hashrate = result.attempts as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
        info!(attempts = result.attempts, hashrate, "benchmark batch complete");
        samples.push(serde_json::json!({
            "attempts": result.attempts,
            "elapsed_ms": elapsed.as_millis(),
            "hashrate": hashrate,
        }));

        remaining -= batch as u64;
        match chunk_end.checked_add(1) {
            Some(next) => cursor = next,
            None => break,
        }
    }

    if let Some(path) = out {
        std::fs::write(&path, serde_json::to_string_pretty(&samples)?)?;
        info!(path, "wrote benchmark samples");
    }

    Ok(())
}
