//! S5: publishing a new, significant template must cancel in-flight workers
//! and restart the search with attempts reset under a bumped generation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use miner_core::{validate_address, Network, Target, Transaction};
use miner_engine::{Accelerator, CpuAccelerator, EngineTemplate, SearchCoordinator, SweepStrategy};

fn template_at_height(height: u32) -> Arc<EngineTemplate> {
    let network = Network::Mainnet;
    let address = validate_address("bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq", network).unwrap();
    Arc::new(EngineTemplate {
        generation: 0,
        network,
        height,
        prev_block_hash: [height as u8; 32],
        bits: 0x1d00ffff,
        // Unreachable target: the search must run to cancellation, not
        // to a found block, so attempts actually accumulate.
        target: Target::from_bytes([0u8; 32]),
        curtime: 1_700_000_000,
        mintime: 1_699_999_000,
        reward: 5_000_000_000,
        reward_address: address,
        other_txs: Vec::<Transaction>::new(),
        other_txids: Vec::new(),
        default_witness_commitment: None,
    })
}

#[test]
fn test_template_refresh_restarts_workers_and_resets_attempts() {
    let coordinator = SearchCoordinator::new(
        2,
        SweepStrategy::Exhaustive,
        4,
        0, // progress_threshold = 0: every chunk reports progress
        Arc::new(|| Box::new(CpuAccelerator::default()) as Box<dyn Accelerator>),
    );

    coordinator.start(template_at_height(100));

    // Give workers time to complete at least one chunk and report progress.
    let mut observed_progress = false;
    for _ in 0..50 {
        thread::sleep(Duration::from_millis(20));
        let _ = coordinator.drain_events();
        if coordinator.total_attempts() > 0 {
            observed_progress = true;
            break;
        }
    }
    assert!(observed_progress, "expected at least one progress report before restart");

    coordinator.update_template(template_at_height(101), true);

    // Fresh generation: attempts reset to zero immediately after restart,
    // before any new progress has been folded in.
    assert_eq!(coordinator.total_attempts(), 0);

    coordinator.stop();
}
