//! Environment-sourced configuration. One struct, one fallible constructor,
//! no file or persisted state: the miner is stateless across restarts.

use std::env;
use std::time::Duration;

use miner_core::{validate_address, Network, ValidatedAddress};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("environment variable {0} has an invalid value: {1}")]
    Invalid(&'static str, String),

    #[error("REWARD_ADDRESS does not decode to a valid address: {0}")]
    InvalidRewardAddress(String),
}

/// Which kind of search the miner runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningMode {
    /// Self-contained demonstration search against a synthetic fixture
    /// template; no node connection required.
    Genesis,
    /// Poll a real node for templates and submit found blocks.
    Live,
}

#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub rpc_host: String,
    pub rpc_port: u16,
    pub rpc_username: String,
    pub rpc_password: String,
    pub worker_count: usize,
    pub progress_report_interval: Duration,
    pub mining_mode: MiningMode,
    pub network: Network,
    /// Required in live mode (the coinbase payout destination); unused in
    /// genesis mode, where the synthetic template pays a fixed test address.
    pub reward_address: Option<ValidatedAddress>,
}

impl MinerConfig {
    /// Load configuration from the environment, per the variable list in
    /// the published CLI surface. `mode_override` lets a subcommand (e.g.
    /// `start-live`) force a mode regardless of `MINING_MODE`.
    pub fn from_env(mode_override: Option<MiningMode>) -> Result<Self, ConfigError> {
        let network = match env_or("BITCOIN_NETWORK", "mainnet").as_str() {
            "mainnet" => Network::Mainnet,
            "testnet" => Network::Testnet4,
            other => {
                return Err(ConfigError::Invalid("BITCOIN_NETWORK", other.to_string()));
            }
        };

        let mining_mode = match mode_override {
            Some(mode) => mode,
            None => match env_or("MINING_MODE", "genesis").as_str() {
                "genesis" => MiningMode::Genesis,
                "live" => MiningMode::Live,
                other => return Err(ConfigError::Invalid("MINING_MODE", other.to_string())),
            },
        };

        let reward_address = match mining_mode {
            MiningMode::Live => {
                let raw = env::var("REWARD_ADDRESS")
                    .map_err(|_| ConfigError::Missing("REWARD_ADDRESS"))?;
                let addr = validate_address(&raw, network)
                    .map_err(|e| ConfigError::InvalidRewardAddress(e.to_string()))?;
                Some(addr)
            }
            MiningMode::Genesis => None,
        };

        Ok(MinerConfig {
            rpc_host: env_or("RPC_HOST", "127.0.0.1"),
            rpc_port: parse_env("RPC_PORT", 8332)?,
            rpc_username: env_or("RPC_USERNAME", ""),
            rpc_password: env_or("RPC_PASSWORD", ""),
            worker_count: parse_env("WORKER_COUNT", num_cpus())?,
            progress_report_interval: Duration::from_millis(parse_env(
                "PROGRESS_REPORT_INTERVAL",
                1000u64,
            )?),
            mining_mode,
            network,
            reward_address,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid(key, raw.clone())),
        Err(_) => Ok(default),
    }
}

/// Physical cores minus one, reserving one core for the async I/O pool.
fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1).max(1))
        .unwrap_or(4)
}
