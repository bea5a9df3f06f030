//! One OS thread per worker. Sweeps an assigned `(extraNonce, nonce)`
//! subspace, checking for cancellation only at chunk boundaries so the
//! accelerator's inner kernel stays branch-free.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use miner_core::CachedMerkleCalculator;
use tracing::debug;

use crate::accelerator::Accelerator;
use crate::coordinator::{SearchSubspace, SweepStrategy, WorkerCommand, WorkerEvent};
use crate::template::EngineTemplate;

/// Nonces scanned per accelerator call. Small enough that cancellation is
/// noticed well within the default progress-report interval, large enough
/// that per-chunk overhead (header copy, command-channel poll) stays
/// negligible next to the hashing work.
const CHUNK_SIZE: u32 = 1 << 16;

/// Result of polling the command channel at a checkpoint.
enum Checkpoint {
    Continue,
    Stop,
    /// A new template to pick up without tearing the worker down, pushed by
    /// `SearchCoordinator::update_template(restart = false)`.
    Update(Arc<EngineTemplate>, u64),
}

/// Drain pending commands, returning the action to take at this checkpoint.
/// If both a stale `UpdateTemplate` and a `Cancel`/`Stop` are queued, the
/// cancellation wins since it's checked first in arrival order.
fn poll_checkpoint(command_rx: &Receiver<WorkerCommand>, current_generation: u64) -> Checkpoint {
    let mut result = Checkpoint::Continue;
    while let Ok(command) = command_rx.try_recv() {
        match command {
            WorkerCommand::Cancel { generation } if generation == current_generation => {
                return Checkpoint::Stop;
            }
            WorkerCommand::Stop => return Checkpoint::Stop,
            WorkerCommand::UpdateTemplate { template, generation } => {
                result = Checkpoint::Update(template, generation);
            }
            _ => {}
        }
    }
    result
}

/// Emit a progress event after this many attempts since the last one, per
/// spec.md's `attempts_since_last_report > progress_threshold` rule.
fn worker_loop_inner(
    id: usize,
    command_rx: &Receiver<WorkerCommand>,
    event_tx: &Sender<WorkerEvent>,
    accelerator: &mut dyn Accelerator,
    progress_threshold: u64,
    mut template: Arc<EngineTemplate>,
    subspace: &SearchSubspace,
    mut generation: u64,
    strategy: SweepStrategy,
) {
    let step = match strategy {
        SweepStrategy::Exhaustive => 1,
        SweepStrategy::Strided { step } => step.max(1),
    };

    let mut total_attempts = 0u64;
    let mut attempts_since_report = 0u64;

    let mut extra_nonce_value = *subspace.extra_nonce_range.start();
    loop {
        if extra_nonce_value > *subspace.extra_nonce_range.end() {
            break;
        }

        match poll_checkpoint(command_rx, generation) {
            Checkpoint::Stop => return,
            Checkpoint::Update(new_template, new_generation) => {
                template = new_template;
                generation = new_generation;
            }
            Checkpoint::Continue => {}
        }

        let extra_nonce = extra_nonce_value.to_be_bytes();
        let coinbase = template.coinbase_builder().with_extra_nonce(extra_nonce).build(template.reward);

        let mut merkle = match CachedMerkleCalculator::new(
            coinbase.raw_tx.clone(),
            coinbase.extra_nonce_offset,
            coinbase.txid,
            &template.other_txids,
        ) {
            Ok(calc) => calc,
            Err(err) => {
                let _ = event_tx.send(WorkerEvent::Errored {
                    worker_id: id,
                    generation,
                    message: format!("merkle setup failed: {err}"),
                });
                return;
            }
        };
        let merkle_root = merkle.recompute_for_extra_nonce(extra_nonce);

        let header = crate::template::header_skeleton(&template, merkle_root);
        let header_without_nonce = header.serialize_without_nonce();

        let mut nonce = *subspace.nonce_range.start();
        let mut template_updated = false;
        loop {
            if nonce > *subspace.nonce_range.end() {
                break;
            }

            match poll_checkpoint(command_rx, generation) {
                Checkpoint::Stop => return,
                Checkpoint::Update(new_template, new_generation) => {
                    template = new_template;
                    generation = new_generation;
                    template_updated = true;
                    break;
                }
                Checkpoint::Continue => {}
            }

            let chunk_end = nonce.saturating_add(CHUNK_SIZE - 1).min(*subspace.nonce_range.end());
            let scan_result = accelerator.scan(&header_without_nonce, nonce..=chunk_end, &template.target);

            let result = match scan_result {
                Ok(result) => result,
                Err(err) => {
                    debug!(worker_id = id, error = %err, "accelerator error, falling back to CPU for this chunk");
                    let mut cpu = crate::accelerator::CpuAccelerator::default();
                    cpu.scan(&header_without_nonce, nonce..=chunk_end, &template.target)
                        .expect("CPU accelerator never errors")
                }
            };

            total_attempts += result.attempts;
            attempts_since_report += result.attempts;

            if attempts_since_report > progress_threshold {
                let _ = event_tx.send(WorkerEvent::Progress {
                    worker_id: id,
                    generation,
                    attempts_delta: attempts_since_report,
                    last_hash: result.found.map(|(_, h)| h).unwrap_or([0u8; 32]),
                });
                attempts_since_report = 0;
            }

            if let Some((found_nonce, hash)) = result.found {
                let _ = event_tx.send(WorkerEvent::Found {
                    worker_id: id,
                    generation,
                    nonce: found_nonce,
                    extra_nonce,
                    hash,
                    merkle_root,
                });
                return;
            }

            match chunk_end.checked_add(1) {
                Some(next) => nonce = next,
                None => break,
            }
        }

        if template_updated {
            // Re-process the same extraNonce value against the new
            // template instead of advancing past it.
            continue;
        }

        match extra_nonce_value.checked_add(step) {
            Some(next) => extra_nonce_value = next,
            None => break,
        }
    }

    let _ = event_tx.send(WorkerEvent::Exhausted {
        worker_id: id,
        generation,
        attempts: total_attempts,
    });
}

/// Thread entry point: wait for the initial `Mine` command, run the sweep,
/// then idle (accepting `Stop`) until the coordinator joins this thread.
pub fn worker_loop(
    id: usize,
    command_rx: Receiver<WorkerCommand>,
    event_tx: Sender<WorkerEvent>,
    mut accelerator: Box<dyn Accelerator>,
    progress_threshold: u64,
) {
    loop {
        match command_rx.recv() {
            Ok(WorkerCommand::Mine {
                template,
                subspace,
                generation,
                strategy,
            }) => {
                worker_loop_inner(
                    id,
                    &command_rx,
                    &event_tx,
                    accelerator.as_mut(),
                    progress_threshold,
                    template,
                    &subspace,
                    generation,
                    strategy,
                );
            }
            Ok(WorkerCommand::Cancel { .. }) => continue,
            // An UpdateTemplate arriving before the initial Mine is a stale
            // race from a prior generation; nothing is mining yet to update.
            Ok(WorkerCommand::UpdateTemplate { .. }) => continue,
            Ok(WorkerCommand::Stop) | Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accelerator::CpuAccelerator;
    use crate::coordinator::SweepStrategy;
    use miner_core::{validate_address, Network, Target, Transaction};
    use std::sync::mpsc;

    fn genesis_template() -> EngineTemplate {
        let network = Network::Mainnet;
        let address =
            validate_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", network).unwrap();
        EngineTemplate {
            generation: 1,
            network,
            height: 0,
            prev_block_hash: [0u8; 32],
            bits: 0x207fffff,
            target: Target::from_bits(0x207fffff),
            curtime: 1_700_000_000,
            mintime: 1_699_999_000,
            reward: 5_000_000_000,
            reward_address: address,
            other_txs: Vec::<Transaction>::new(),
            other_txids: Vec::new(),
            default_witness_commitment: None,
        }
    }

    #[test]
    fn test_worker_finds_block_at_low_difficulty() {
        let template = Arc::new(genesis_template());
        let subspace = SearchSubspace {
            extra_nonce_range: 0..=0,
            nonce_range: 0..=u32::MAX,
        };

        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        worker_loop_inner(
            0,
            &command_rx,
            &event_tx,
            &mut CpuAccelerator::default(),
            1 << 20,
            template,
            &subspace,
            1,
            SweepStrategy::Exhaustive,
        );
        drop(command_tx);

        let events: Vec<_> = event_rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, WorkerEvent::Found { .. })));
    }

    #[test]
    fn test_worker_respects_cancellation() {
        let template = genesis_template();
        // Impossible target: worker should cancel quickly instead of
        // exhausting the whole nonce range.
        let mut hard_template = template;
        hard_template.target = Target::from_bytes([0u8; 32]);

        let subspace = SearchSubspace {
            extra_nonce_range: 0..=0,
            nonce_range: 0..=u32::MAX,
        };

        let (command_tx, command_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel();

        command_tx.send(WorkerCommand::Cancel { generation: 1 }).unwrap();

        worker_loop_inner(
            0,
            &command_rx,
            &event_tx,
            &mut CpuAccelerator::default(),
            1 << 20,
            Arc::new(hard_template),
            &subspace,
            1,
            SweepStrategy::Exhaustive,
        );

        let events: Vec<_> = event_rx.try_iter().collect();
        assert!(events.is_empty(), "cancelled worker must not emit exhausted/found");
    }
}
