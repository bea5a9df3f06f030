//! Polls the node for block templates, detects significant changes, and
//! publishes them to subscribers.
//!
//! Shape grounded on a job-generator pattern: produce a fresh job on a
//! cadence, tag it, hand it downstream. Driven here by real `miner-rpc`
//! calls instead of synthetic headers.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use miner_core::{
    double_sha256, parse_tx, BlockHeader, CoinbaseBuilder, MerkleError, Network, Target,
    Transaction, TxError, ValidatedAddress,
};
use miner_rpc::{RpcClient, RpcError};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Failures building an [`EngineTemplate`] from a node response.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("rpc call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("malformed hex in template field {0:?}")]
    InvalidHex(&'static str),

    #[error("malformed transaction in template: {0}")]
    Transaction(#[from] TxError),

    #[error("merkle construction failed: {0}")]
    Merkle(MerkleError),

    #[error("template field {0:?} out of expected shape")]
    BadField(&'static str),
}

/// Lifecycle of the template manager, replacing an ad-hoc busy flag with an
/// explicit state the coordinator can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplatePhase {
    Stopped,
    Starting,
    Running,
    Polling,
    /// `consecutive_failure_threshold` polls in a row have failed; the node
    /// is considered unreachable. Polling continues regardless.
    RpcUnavailable,
    Draining,
}

/// An immutable snapshot of the node's mining intent, tagged with the
/// generation counter it was published under.
#[derive(Debug, Clone)]
pub struct EngineTemplate {
    pub generation: u64,
    pub network: Network,
    pub height: u32,
    pub prev_block_hash: [u8; 32],
    pub bits: u32,
    pub target: Target,
    pub curtime: u32,
    pub mintime: u32,
    /// Total coinbase value: subsidy + fees, as reported by the node.
    pub reward: u64,
    pub reward_address: ValidatedAddress,
    pub other_txs: Vec<Transaction>,
    /// Precomputed internal-order txid of `other_txs[i]`, in template order
    /// (matching `CoinbaseTransaction::txid`'s non-reversed convention).
    pub other_txids: Vec<[u8; 32]>,
    pub default_witness_commitment: Option<String>,
}

impl EngineTemplate {
    /// A reusable coinbase builder for this template; each caller (worker or
    /// bookkeeping code) supplies its own extra nonce.
    pub fn coinbase_builder(&self) -> CoinbaseBuilder {
        CoinbaseBuilder::new(self.network, self.height, self.reward_address.clone())
    }

    /// Sorted txid set, used for the transaction-set-changed significance
    /// check (order in a template can change without the set changing).
    fn sorted_txids(&self) -> Vec<[u8; 32]> {
        let mut ids = self.other_txids.clone();
        ids.sort_unstable();
        ids
    }
}

/// Whether `new` differs from `old` enough to require a worker restart.
/// Any one of: height, previous-block hash, target, coinbase value, or the
/// sorted transaction-id set changed. Cosmetic drift (timestamp only) does
/// not count.
fn is_significant(old: &EngineTemplate, new: &EngineTemplate) -> bool {
    old.height != new.height
        || old.prev_block_hash != new.prev_block_hash
        || old.target.0 != new.target.0
        || old.reward != new.reward
        || old.sorted_txids() != new.sorted_txids()
}

/// Emitted whenever the manager publishes a freshly polled template.
#[derive(Debug, Clone)]
pub struct TemplateUpdate {
    pub old: Option<Arc<EngineTemplate>>,
    pub new: Arc<EngineTemplate>,
    pub significant: bool,
    pub restart_required: bool,
}

/// Polls a node on a fixed cadence and publishes [`TemplateUpdate`]s.
pub struct TemplateManager {
    rpc: Arc<RpcClient>,
    network: Network,
    reward_address: ValidatedAddress,
    poll_interval: Duration,
    consecutive_failure_threshold: u32,
    generation: AtomicU64,
    polling_errors: AtomicU32,
}

impl TemplateManager {
    pub fn new(
        rpc: Arc<RpcClient>,
        network: Network,
        reward_address: ValidatedAddress,
        poll_interval: Duration,
    ) -> Self {
        TemplateManager {
            rpc,
            network,
            reward_address,
            poll_interval,
            consecutive_failure_threshold: 5,
            generation: AtomicU64::new(0),
            polling_errors: AtomicU32::new(0),
        }
    }

    /// Spawn the poll loop on the caller's runtime. Returns a phase receiver
    /// (for observability), an update receiver (the actual feed), the join
    /// handle, and a shutdown sender: dropping or sending on it moves the
    /// manager through `Draining` into a final `Stopped`.
    pub fn spawn(
        self: Arc<Self>,
    ) -> (
        watch::Receiver<TemplatePhase>,
        watch::Receiver<Option<TemplateUpdate>>,
        tokio::task::JoinHandle<()>,
        watch::Sender<bool>,
    ) {
        let (phase_tx, phase_rx) = watch::channel(TemplatePhase::Stopped);
        let (update_tx, update_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            self.run(phase_tx, update_tx, stop_rx).await;
        });

        (phase_rx, update_rx, handle, stop_tx)
    }

    async fn run(
        &self,
        phase_tx: watch::Sender<TemplatePhase>,
        update_tx: watch::Sender<Option<TemplateUpdate>>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        let _ = phase_tx.send(TemplatePhase::Starting);
        let mut last: Option<Arc<EngineTemplate>> = None;
        let mut interval = tokio::time::interval(self.poll_interval);

        loop {
            let _ = phase_tx.send(TemplatePhase::Polling);
            match self.fetch_template().await {
                Ok(fresh) => {
                    self.polling_errors.store(0, Ordering::Relaxed);
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
                    let fresh = Arc::new(EngineTemplate {
                        generation,
                        ..fresh
                    });

                    let significant = last.as_ref().is_some_and(|old| is_significant(old, &fresh));
                    let restart_required = last.is_none() || significant;

                    info!(
                        generation,
                        height = fresh.height,
                        significant,
                        "published template"
                    );

                    let update = TemplateUpdate {
                        old: last.clone(),
                        new: fresh.clone(),
                        significant: last.is_none() || significant,
                        restart_required,
                    };
                    let _ = update_tx.send(Some(update));
                    last = Some(fresh);
                    let _ = phase_tx.send(TemplatePhase::Running);
                }
                Err(err) => {
                    let errors = self.polling_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(error = %err, errors, "template poll failed");
                    if errors >= self.consecutive_failure_threshold {
                        warn!(errors, "rpc considered unavailable, continuing to retry");
                        let _ = phase_tx.send(TemplatePhase::RpcUnavailable);
                    } else {
                        let _ = phase_tx.send(TemplatePhase::Running);
                    }
                }
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = phase_tx.send(TemplatePhase::Draining);
        let _ = phase_tx.send(TemplatePhase::Stopped);
    }

    /// Poll once and translate the raw RPC response into an [`EngineTemplate`].
    /// The `generation` field on the returned value is a placeholder (0);
    /// the caller overwrites it before publishing.
    async fn fetch_template(&self) -> Result<EngineTemplate, TemplateError> {
        let response = self.rpc.get_block_template().await?;

        let prev_block_hash = reverse_hex32(&response.previousblockhash, "previousblockhash")?;
        let bits = u32::from_str_radix(&response.bits, 16)
            .map_err(|_| TemplateError::InvalidHex("bits"))?;
        let target = Target::from_bits(bits);

        let mut other_txs = Vec::with_capacity(response.transactions.len());
        let mut other_txids = Vec::with_capacity(response.transactions.len());
        for raw in &response.transactions {
            let bytes =
                hex_decode(&raw.data).ok_or(TemplateError::InvalidHex("transactions[].data"))?;
            let tx = parse_tx(&bytes)?;
            // Internal (non-reversed) byte order, matching
            // `CoinbaseTransaction::txid` — `Transaction::txid()` returns
            // the reversed display form and must not be fed to the merkle
            // tree directly.
            other_txids.push(double_sha256(&tx.serialize_no_witness()));
            other_txs.push(tx);
        }

        debug!(
            height = response.height,
            tx_count = other_txs.len(),
            "fetched block template"
        );

        Ok(EngineTemplate {
            generation: 0,
            network: self.network,
            height: response.height,
            prev_block_hash,
            bits,
            target,
            curtime: response.curtime,
            mintime: response.mintime,
            reward: response.coinbasevalue,
            reward_address: self.reward_address.clone(),
            other_txs,
            other_txids,
            default_witness_commitment: response.default_witness_commitment.clone(),
        })
    }
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(s.len() / 2);
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let hi = (bytes[i] as char).to_digit(16)?;
        let lo = (bytes[i + 1] as char).to_digit(16)?;
        out.push(((hi << 4) | lo) as u8);
        i += 2;
    }
    Some(out)
}

fn reverse_hex32(s: &str, field: &'static str) -> Result<[u8; 32], TemplateError> {
    let bytes = hex_decode(s).ok_or(TemplateError::InvalidHex(field))?;
    if bytes.len() != 32 {
        return Err(TemplateError::BadField(field));
    }
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = bytes[31 - i];
    }
    Ok(out)
}

/// Used by the header builder: a template on its own doesn't carry a merkle
/// root, since that's a function of the coinbase's extra nonce. Callers
/// build a `BlockHeader` once they've picked an extra nonce and run the
/// merkle calculator.
pub fn header_skeleton(template: &EngineTemplate, merkle_root: [u8; 32]) -> BlockHeader {
    BlockHeader::new(
        template.prev_block_hash,
        merkle_root,
        template.curtime,
        template.bits,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use miner_core::{validate_address, TxInput, TxOutput};

    fn sample(height: u32, prev: [u8; 32], reward: u64, txids: Vec<[u8; 32]>) -> EngineTemplate {
        let network = Network::Mainnet;
        let address =
            validate_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", network).unwrap();
        let other_txs = txids
            .iter()
            .map(|_| Transaction {
                version: 1,
                inputs: vec![TxInput {
                    previous_txid: [0u8; 32],
                    previous_vout: 0,
                    script_sig: Vec::new(),
                    sequence: 0xFFFFFFFF,
                }],
                outputs: vec![TxOutput {
                    value: 1,
                    script_pubkey: vec![0x51],
                }],
                witnesses: vec![Vec::new()],
                locktime: 0,
            })
            .collect();

        EngineTemplate {
            generation: 1,
            network,
            height,
            prev_block_hash: prev,
            bits: 0x1d00ffff,
            target: Target::from_bits(0x1d00ffff),
            curtime: 1_700_000_000,
            mintime: 1_699_999_000,
            reward,
            reward_address: address,
            other_txs,
            other_txids: txids,
            default_witness_commitment: None,
        }
    }

    #[test]
    fn test_height_change_is_significant() {
        let a = sample(100, [0u8; 32], 5_000_000_000, vec![]);
        let b = sample(101, [0u8; 32], 5_000_000_000, vec![]);
        assert!(is_significant(&a, &b));
    }

    #[test]
    fn test_reordered_same_txid_set_is_not_significant() {
        let a = sample(100, [0u8; 32], 5_000_000_000, vec![[1u8; 32], [2u8; 32]]);
        let b = sample(100, [0u8; 32], 5_000_000_000, vec![[2u8; 32], [1u8; 32]]);
        assert!(!is_significant(&a, &b));
    }

    #[test]
    fn test_coinbase_value_change_is_significant() {
        let a = sample(100, [0u8; 32], 5_000_000_000, vec![]);
        let b = sample(100, [0u8; 32], 5_000_100_000, vec![]);
        assert!(is_significant(&a, &b));
    }

    #[test]
    fn test_hex_decode_rejects_odd_length() {
        assert_eq!(hex_decode("abc"), None);
    }

    #[test]
    fn test_reverse_hex32_round_trips_display_order() {
        let display = "00".repeat(31) + "ff";
        let internal = reverse_hex32(&display, "test").unwrap();
        assert_eq!(internal[0], 0xff);
        assert_eq!(internal[31], 0x00);
    }
}
