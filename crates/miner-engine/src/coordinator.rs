//! Owns the worker pool: partitions the search space, tracks per-worker
//! state, aggregates progress, and cancels generations on template refresh.
//!
//! Cyclic coordinator<->worker callbacks are modeled as two unidirectional
//! `std::sync::mpsc` channels per worker (commands down, events up) instead
//! of shared mutable state on the hot path.

use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::accelerator::Accelerator;
use crate::template::EngineTemplate;
use crate::worker::worker_loop;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("all {0} workers errored out within one generation")]
    AllWorkersErrored(usize),
}

/// How the 4-byte extraNonce field is swept. The operator picks one at
/// `SearchCoordinator::new`; every progress snapshot reports it back so
/// throughput numbers stay honest about search completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStrategy {
    /// Visit every extraNonce in the assigned slice.
    Exhaustive,
    /// Visit every `step`-th extraNonce, trading completeness for throughput.
    Strided { step: u32 },
}

/// Per-worker state as seen by the coordinator. Workers are otherwise
/// stateless from the coordinator's perspective beyond this event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Idle,
    Mining,
    Exhausted,
    Errored,
    Found,
}

/// The disjoint slice of `(extraNonce, nonce)` space assigned to one worker.
/// Both bounds are inclusive so a worker's `nonce_range` can represent
/// `u32::MAX` itself, which an exclusive `Range<u32>` cannot.
#[derive(Debug, Clone)]
pub struct SearchSubspace {
    pub extra_nonce_range: RangeInclusive<u32>,
    pub nonce_range: RangeInclusive<u32>,
}

#[derive(Debug, Clone)]
pub struct WorkerSnapshot {
    pub id: usize,
    pub subspace: SearchSubspace,
    pub attempts: u64,
    pub last_hash: Option<[u8; 32]>,
    pub phase: WorkerPhase,
    pub last_progress: Option<Instant>,
}

/// Sent from the coordinator down to a worker thread.
pub enum WorkerCommand {
    Mine {
        template: Arc<EngineTemplate>,
        subspace: SearchSubspace,
        generation: u64,
        strategy: SweepStrategy,
    },
    /// Swap in a new template without tearing down the worker thread. Picked
    /// up at the worker's next extraNonce checkpoint.
    UpdateTemplate {
        template: Arc<EngineTemplate>,
        generation: u64,
    },
    Cancel {
        generation: u64,
    },
    Stop,
}

/// Sent from a worker thread up to the coordinator.
pub enum WorkerEvent {
    Progress {
        worker_id: usize,
        generation: u64,
        attempts_delta: u64,
        last_hash: [u8; 32],
    },
    Exhausted {
        worker_id: usize,
        generation: u64,
        attempts: u64,
    },
    Found {
        worker_id: usize,
        generation: u64,
        nonce: u32,
        extra_nonce: [u8; 4],
        hash: [u8; 32],
        merkle_root: [u8; 32],
    },
    Errored {
        worker_id: usize,
        generation: u64,
        message: String,
    },
}

/// High-level outcomes subscribers actually care about.
#[derive(Debug, Clone)]
pub enum CoordinatorEvent {
    Progress(Vec<WorkerSnapshot>),
    SearchExhausted { generation: u64 },
    BlockFound {
        generation: u64,
        nonce: u32,
        extra_nonce: [u8; 4],
        hash: [u8; 32],
        merkle_root: [u8; 32],
    },
}

struct WorkerHandle {
    command_tx: mpsc::Sender<WorkerCommand>,
    join: Option<std::thread::JoinHandle<()>>,
}

/// Owns the worker pool and the generation counter.
pub struct SearchCoordinator {
    worker_count: usize,
    strategy: SweepStrategy,
    extra_nonce_slice_size: u32,
    progress_threshold: u64,
    accelerator_factory: Arc<dyn Fn() -> Box<dyn Accelerator> + Send + Sync>,
    generation: AtomicU64,
    stopping: AtomicBool,
    workers: Mutex<Vec<WorkerHandle>>,
    event_tx: mpsc::Sender<WorkerEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<WorkerEvent>>>,
    snapshots: Mutex<Vec<WorkerSnapshot>>,
    /// Generation a `BlockFound` has already been accepted for, so a second
    /// worker reporting found under the same generation is discarded rather
    /// than re-emitted (spec's earliest-wins tie-break).
    found_generation: Mutex<Option<u64>>,
}

impl SearchCoordinator {
    pub fn new(
        worker_count: usize,
        strategy: SweepStrategy,
        extra_nonce_slice_size: u32,
        progress_threshold: u64,
        accelerator_factory: Arc<dyn Fn() -> Box<dyn Accelerator> + Send + Sync>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel();
        SearchCoordinator {
            worker_count,
            strategy,
            extra_nonce_slice_size,
            progress_threshold,
            accelerator_factory,
            generation: AtomicU64::new(0),
            stopping: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            snapshots: Mutex::new(Vec::new()),
            found_generation: Mutex::new(None),
        }
    }

    /// Split the 32-bit nonce space evenly among `worker_count` workers; the
    /// last worker absorbs the remainder. Inclusive so the full `0..=u32::MAX`
    /// space is actually covered (spec property: union of subspaces equals
    /// the announced space).
    fn partition_nonce_range(&self) -> Vec<RangeInclusive<u32>> {
        partition_range(0..=u32::MAX, self.worker_count)
    }

    fn partition_extra_nonce_range(&self) -> Vec<RangeInclusive<u32>> {
        let total = self.extra_nonce_slice_size.saturating_mul(self.worker_count as u32);
        partition_range(0..=total.saturating_sub(1), self.worker_count)
    }

    /// Compute the partition, spawn `worker_count` threads, and start
    /// mining the given template under a freshly bumped generation.
    pub fn start(&self, template: Arc<EngineTemplate>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stopping.store(false, Ordering::SeqCst);
        *self.found_generation.lock().unwrap() = None;
        self.spawn_workers(template, generation);
    }

    fn spawn_workers(&self, template: Arc<EngineTemplate>, generation: u64) {
        let nonce_ranges = self.partition_nonce_range();
        let extra_ranges = self.partition_extra_nonce_range();

        let mut handles = Vec::with_capacity(self.worker_count);
        let mut snapshots = Vec::with_capacity(self.worker_count);

        for id in 0..self.worker_count {
            let subspace = SearchSubspace {
                extra_nonce_range: extra_ranges[id].clone(),
                nonce_range: nonce_ranges[id].clone(),
            };

            let (command_tx, command_rx) = mpsc::channel();
            let event_tx = self.event_tx.clone();
            let accelerator = (self.accelerator_factory)();
            let progress_threshold = self.progress_threshold;

            command_tx
                .send(WorkerCommand::Mine {
                    template: template.clone(),
                    subspace: subspace.clone(),
                    generation,
                    strategy: self.strategy,
                })
                .expect("freshly created channel");

            let join = std::thread::Builder::new()
                .name(format!("miner-worker-{id}"))
                .spawn(move || {
                    worker_loop(id, command_rx, event_tx, accelerator, progress_threshold);
                })
                .expect("failed to spawn worker thread");

            handles.push(WorkerHandle {
                command_tx,
                join: Some(join),
            });
            snapshots.push(WorkerSnapshot {
                id,
                subspace,
                attempts: 0,
                last_hash: None,
                phase: WorkerPhase::Mining,
                last_progress: None,
            });
        }

        *self.workers.lock().unwrap() = handles;
        *self.snapshots.lock().unwrap() = snapshots;

        info!(generation, workers = self.worker_count, "search started");
    }

    /// If `restart` is true, cancel the current generation, join workers,
    /// and start fresh with the new template. If false, push the new
    /// template straight to the running workers, which pick it up at their
    /// next extraNonce checkpoint with no thread teardown.
    pub fn update_template(&self, new_template: Arc<EngineTemplate>, restart: bool) {
        if restart {
            self.cancel_current();
            self.join_workers();
            self.start(new_template);
            return;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.found_generation.lock().unwrap() = None;

        let workers = self.workers.lock().unwrap();
        for handle in workers.iter() {
            let _ = handle.command_tx.send(WorkerCommand::UpdateTemplate {
                template: new_template.clone(),
                generation,
            });
        }
        drop(workers);

        let mut snapshots = self.snapshots.lock().unwrap();
        for s in snapshots.iter_mut() {
            s.phase = WorkerPhase::Mining;
        }
        drop(snapshots);

        info!(generation, "template updated in place, no restart");
    }

    fn cancel_current(&self) {
        let generation = self.generation.load(Ordering::SeqCst);
        let workers = self.workers.lock().unwrap();
        for handle in workers.iter() {
            let _ = handle.command_tx.send(WorkerCommand::Cancel { generation });
        }
    }

    fn join_workers(&self) {
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.iter_mut() {
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
        workers.clear();
    }

    /// Cooperative shutdown: cancel, drain, and join every worker.
    pub fn stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        let workers = self.workers.lock().unwrap();
        for handle in workers.iter() {
            let _ = handle.command_tx.send(WorkerCommand::Cancel { generation });
            let _ = handle.command_tx.send(WorkerCommand::Stop);
        }
        drop(workers);
        self.join_workers();
    }

    /// Drain pending worker events and fold them into `snapshots`, returning
    /// any high-level events subscribers should see. Intended to be polled
    /// regularly from a small async aggregation loop (the caller decides the
    /// cadence; this call never blocks).
    pub fn drain_events(&self) -> Vec<CoordinatorEvent> {
        let mut out = Vec::new();
        let current_generation = self.generation.load(Ordering::SeqCst);

        let rx_guard = self.event_rx.lock().unwrap();
        let rx = rx_guard.as_ref().expect("event receiver taken");

        while let Ok(event) = rx.try_recv() {
            match event {
                WorkerEvent::Progress {
                    worker_id,
                    generation,
                    attempts_delta,
                    last_hash,
                } => {
                    if generation != current_generation {
                        continue; // GenerationStale: silently discarded.
                    }
                    let mut snapshots = self.snapshots.lock().unwrap();
                    if let Some(s) = snapshots.get_mut(worker_id) {
                        s.attempts += attempts_delta;
                        s.last_hash = Some(last_hash);
                        s.phase = WorkerPhase::Mining;
                        s.last_progress = Some(Instant::now());
                    }
                }
                WorkerEvent::Exhausted {
                    worker_id,
                    generation,
                    attempts,
                } => {
                    if generation != current_generation {
                        continue;
                    }
                    {
                        let mut snapshots = self.snapshots.lock().unwrap();
                        if let Some(s) = snapshots.get_mut(worker_id) {
                            s.attempts += attempts;
                            s.phase = WorkerPhase::Exhausted;
                        }
                    }
                    if self.all_workers_in(WorkerPhase::Exhausted) {
                        out.push(CoordinatorEvent::SearchExhausted {
                            generation: current_generation,
                        });
                    }
                }
                WorkerEvent::Found {
                    worker_id,
                    generation,
                    nonce,
                    extra_nonce,
                    hash,
                    merkle_root,
                } => {
                    if generation != current_generation {
                        continue;
                    }

                    let mut found_guard = self.found_generation.lock().unwrap();
                    if *found_guard == Some(generation) {
                        // Earliest found for this generation already won; per
                        // the tie-break policy, later reports are discarded.
                        drop(found_guard);
                        warn!(worker_id, generation, "discarding later Found for already-resolved generation");
                        continue;
                    }
                    *found_guard = Some(generation);
                    drop(found_guard);

                    let mut snapshots = self.snapshots.lock().unwrap();
                    if let Some(s) = snapshots.get_mut(worker_id) {
                        s.phase = WorkerPhase::Found;
                    }
                    drop(snapshots);

                    self.cancel_current();

                    out.push(CoordinatorEvent::BlockFound {
                        generation,
                        nonce,
                        extra_nonce,
                        hash,
                        merkle_root,
                    });
                }
                WorkerEvent::Errored {
                    worker_id,
                    generation,
                    message,
                } => {
                    if generation != current_generation {
                        continue;
                    }
                    let mut snapshots = self.snapshots.lock().unwrap();
                    if let Some(s) = snapshots.get_mut(worker_id) {
                        s.phase = WorkerPhase::Errored;
                    }
                    warn!(worker_id, %message, "worker errored");
                }
            }
        }

        if !self.snapshots.lock().unwrap().is_empty() {
            out.push(CoordinatorEvent::Progress(self.snapshots.lock().unwrap().clone()));
        }

        out
    }

    fn all_workers_in(&self, phase: WorkerPhase) -> bool {
        self.snapshots
            .lock()
            .unwrap()
            .iter()
            .all(|s| s.phase == phase || s.phase == WorkerPhase::Found)
    }

    /// Sum of attempts across all workers in the current generation.
    pub fn total_attempts(&self) -> u64 {
        self.snapshots.lock().unwrap().iter().map(|s| s.attempts).sum()
    }
}

/// Run a coordinator's aggregation timer on the caller's tokio runtime,
/// publishing `CoordinatorEvent`s on `tx` every `progress_interval`. This is
/// the coordinator's one suspension point (per the concurrency model);
/// workers never touch this runtime.
pub async fn run_aggregation_loop(
    coordinator: Arc<SearchCoordinator>,
    progress_interval: Duration,
    tx: watch::Sender<Vec<CoordinatorEvent>>,
) {
    let mut interval = tokio::time::interval(progress_interval);
    loop {
        interval.tick().await;
        let events = coordinator.drain_events();
        if !events.is_empty() {
            let _ = tx.send(events);
        }
    }
}

/// Split `range` into `parts` contiguous, disjoint, covering sub-ranges; the
/// last part absorbs any remainder from integer division. Inclusive bounds
/// throughout so the full input range, including `u32::MAX`, is covered —
/// an exclusive `Range<u32>` can't represent one-past-`u32::MAX`.
fn partition_range(range: RangeInclusive<u32>, parts: usize) -> Vec<RangeInclusive<u32>> {
    let parts = parts.max(1) as u64;
    let start = *range.start() as u64;
    let span = *range.end() as u64 - start + 1;
    let chunk = span / parts;
    let remainder = span % parts;

    let mut out = Vec::with_capacity(parts as usize);
    let mut cursor = start;
    for i in 0..parts {
        let this_len = if i == parts - 1 { chunk + remainder } else { chunk };
        let part_end = cursor + this_len - 1;
        out.push(cursor as u32..=part_end as u32);
        cursor = part_end + 1;
    }
    out
}
