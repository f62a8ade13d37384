// src/worker.rs

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::data_types::{Address, Challenge, WorkerStats, WorkerStatus};
use crate::difficulty::{matches_difficulty, DifficultyMask};
use crate::engine::HashBackend;
use crate::events::{EventBus, MinerEvent};
use crate::preimage::{build_preimage, nonce_hex};
use crate::state::SharedState;
use crate::submit::Submitter;

/// Each worker owns a disjoint nonce range of this width, indexed by its id.
pub const NONCE_RANGE_WIDTH: u64 = 1_000_000_000;

pub const PAUSE_POLL: Duration = Duration::from_millis(100);
pub const TRANSIENT_BACKOFF: Duration = Duration::from_secs(2);
pub const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Dependencies and tuning shared by every worker in a batch.
#[derive(Clone)]
pub struct WorkerEnv {
    pub engine: Arc<dyn HashBackend>,
    pub shared: Arc<SharedState>,
    pub submitter: Arc<Submitter>,
    pub events: Arc<EventBus>,
    pub batch_size: usize,
    pub max_submission_failures: u32,
}

fn set_status(shared: &SharedState, worker_id: usize, status: WorkerStatus) {
    if let Some(mut stats) = shared.worker_stats.get_mut(&worker_id) {
        stats.status = status;
    }
}

enum ScanOutcome {
    /// Keep scanning / mining the next batch.
    Continue,
    /// This worker is done with its address.
    Exit,
}

/// One mining worker: enumerates its nonce range in batches against a frozen
/// challenge snapshot, scans for mask-dominated hashes and arbitrates
/// submission with its siblings.
pub fn run_worker(env: &WorkerEnv, worker_id: usize, address: &Address, snapshot: &Challenge) {
    let challenge_id = snapshot.challenge_id.clone();
    let mask = match DifficultyMask::from_hex(&snapshot.difficulty) {
        Ok(mask) => mask,
        Err(e) => {
            warn!("worker {}: unusable difficulty: {}", worker_id, e);
            return;
        }
    };

    let range_start = worker_id as u64 * NONCE_RANGE_WIDTH;
    let range_end = range_start.saturating_add(NONCE_RANGE_WIDTH);
    let mut current_nonce = range_start;

    env.shared
        .worker_stats
        .insert(worker_id, WorkerStats::new(worker_id, address, &challenge_id));
    set_status(&env.shared, worker_id, WorkerStatus::Mining);

    loop {
        if !env.shared.is_mining.load(Ordering::SeqCst)
            || !env.shared.is_running.load(Ordering::SeqCst)
        {
            set_status(&env.shared, worker_id, WorkerStatus::Completed);
            return;
        }
        if env.shared.is_solved(&address.bech32, &challenge_id) {
            set_status(&env.shared, worker_id, WorkerStatus::Completed);
            return;
        }
        if env.shared.stopped_workers.contains(&worker_id) {
            debug!("worker {}: sibling won {}, exiting", worker_id, address.bech32);
            set_status(&env.shared, worker_id, WorkerStatus::Completed);
            return;
        }
        if env.shared.submission_failures(&address.bech32, &challenge_id)
            >= env.max_submission_failures
        {
            warn!(
                "worker {}: failure budget exhausted for {} on {}",
                worker_id, address.bech32, challenge_id
            );
            set_status(&env.shared, worker_id, WorkerStatus::Completed);
            return;
        }
        if env.shared.is_paused(&address.bech32, &challenge_id) {
            thread::sleep(PAUSE_POLL);
            continue;
        }
        if current_nonce >= range_end {
            debug!("worker {}: nonce range exhausted", worker_id);
            set_status(&env.shared, worker_id, WorkerStatus::Completed);
            return;
        }

        // Materialize the next batch of sequential nonces.
        let count = (env.batch_size as u64).min(range_end - current_nonce);
        let mut nonces = Vec::with_capacity(count as usize);
        let mut preimages = Vec::with_capacity(count as usize);
        for offset in 0..count {
            let nh = nonce_hex(current_nonce + offset);
            preimages.push(build_preimage(&nh, &address.bech32, snapshot, &mask));
            nonces.push(nh);
        }
        current_nonce += count;

        let hashes = match env.engine.hash_batch(&preimages) {
            Ok(hashes) => hashes,
            Err(e) if e.is_transient_backend() => {
                debug!("worker {}: backend busy ({}), backing off", worker_id, e);
                thread::sleep(TRANSIENT_BACKOFF);
                continue;
            }
            Err(e) => {
                warn!("worker {}: batch failed: {}", worker_id, e);
                thread::sleep(ERROR_BACKOFF);
                continue;
            }
        };

        if let Some(mut stats) = env.shared.worker_stats.get_mut(&worker_id) {
            stats.record_hashes(count);
            env.events.emit(MinerEvent::WorkerUpdate(stats.clone()));
        }

        // The snapshot is only as good as the orchestrator's current
        // challenge; a transition invalidates the whole batch.
        match env.shared.current_challenge_id() {
            Some(ref id) if *id == challenge_id => {}
            _ => {
                debug!("worker {}: challenge changed, discarding batch", worker_id);
                set_status(&env.shared, worker_id, WorkerStatus::Completed);
                return;
            }
        }

        for (i, hash) in hashes.iter().enumerate() {
            if !matches_difficulty(hash, &mask) {
                continue;
            }
            match handle_candidate(env, worker_id, address, snapshot, &nonces[i], hash) {
                ScanOutcome::Continue => continue,
                ScanOutcome::Exit => return,
            }
        }
    }
}

/// A hash dominated the frozen mask: arbitrate, re-validate against the live
/// snapshot, submit.
fn handle_candidate(
    env: &WorkerEnv,
    worker_id: usize,
    address: &Address,
    snapshot: &Challenge,
    nonce: &str,
    hash: &[u8; 64],
) -> ScanOutcome {
    let challenge_id = &snapshot.challenge_id;
    let hash_hex = hex::encode(hash);

    // Atomic insert-if-absent claims the hash; a hash some worker already
    // POSTed (or is about to) is skipped.
    if !env.shared.submitted_hashes.insert(hash_hex.clone()) {
        return ScanOutcome::Continue;
    }
    if env.shared.is_submitting(&address.bech32, challenge_id) {
        // Another worker is already submitting for this pair.
        env.shared.submitted_hashes.remove(&hash_hex);
        set_status(&env.shared, worker_id, WorkerStatus::Completed);
        return ScanOutcome::Exit;
    }
    if !env.shared.try_begin_submission(&address.bech32, challenge_id) {
        env.shared.submitted_hashes.remove(&hash_hex);
        set_status(&env.shared, worker_id, WorkerStatus::Completed);
        return ScanOutcome::Exit;
    }

    env.shared.stop_siblings(worker_id, &address.bech32);
    set_status(&env.shared, worker_id, WorkerStatus::Submitting);
    env.events.emit(MinerEvent::SolutionFound {
        worker_id,
        address: address.bech32.clone(),
        challenge_id: challenge_id.clone(),
        nonce: nonce.to_string(),
        is_dev_fee: address.is_dev_fee(),
    });

    let release = |remove_hash: &str| {
        env.shared.submitted_hashes.remove(remove_hash);
        env.shared.clear_stop_requests_for(&address.bech32);
        env.shared.end_submission(&address.bech32, challenge_id);
    };

    // Pre-submission validation against the live snapshot.
    let live = match env.shared.current_challenge() {
        Some(live) if live.challenge_id == *challenge_id => live,
        _ => {
            debug!("worker {}: challenge moved on before submission", worker_id);
            release(&hash_hex);
            set_status(&env.shared, worker_id, WorkerStatus::Completed);
            return ScanOutcome::Exit;
        }
    };

    let mut submit_hash_hex = hash_hex.clone();
    if live.mutable_fields_differ(snapshot) {
        let still_good = match DifficultyMask::from_hex(&live.difficulty) {
            Ok(live_mask) => {
                let preimage = build_preimage(nonce, &address.bech32, &live, &live_mask);
                match env.engine.hash_batch(std::slice::from_ref(&preimage)) {
                    Ok(rehashed) => {
                        if matches_difficulty(&rehashed[0], &live_mask) {
                            submit_hash_hex = hex::encode(rehashed[0]);
                            true
                        } else {
                            false
                        }
                    }
                    Err(e) => {
                        debug!("worker {}: revalidation hash failed: {}", worker_id, e);
                        false
                    }
                }
            }
            Err(e) => {
                warn!("worker {}: live difficulty unusable: {}", worker_id, e);
                false
            }
        };
        if !still_good {
            // The target tightened under us. Drop the candidate silently and
            // keep mining; this is not a submission failure.
            debug!(
                "worker {}: candidate no longer meets live difficulty, discarding",
                worker_id
            );
            release(&hash_hex);
            set_status(&env.shared, worker_id, WorkerStatus::Mining);
            return ScanOutcome::Continue;
        }
        if submit_hash_hex != hash_hex {
            env.shared.submitted_hashes.insert(submit_hash_hex.clone());
        }
    }

    match env
        .submitter
        .submit_solution(address, challenge_id, nonce, &submit_hash_hex)
    {
        Ok(()) => {
            if let Some(mut stats) = env.shared.worker_stats.get_mut(&worker_id) {
                stats.solutions_found += 1;
                stats.status = WorkerStatus::Completed;
                env.events.emit(MinerEvent::WorkerUpdate(stats.clone()));
            }
            env.shared.end_submission(&address.bech32, challenge_id);
            ScanOutcome::Exit
        }
        Err(e) => {
            let mut failures = 0;
            if e.counts_as_submission_failure() {
                failures = env
                    .shared
                    .record_submission_failure(&address.bech32, challenge_id);
                warn!(
                    "worker {}: submission failed ({}), attempt {}",
                    worker_id, e, failures
                );
            }
            release(&hash_hex);
            if submit_hash_hex != hash_hex {
                env.shared.submitted_hashes.remove(&submit_hash_hex);
            }
            if failures >= env.max_submission_failures {
                warn!(
                    "worker {}: abandoning {} for {} after {} failed submissions",
                    worker_id, address.bech32, challenge_id, failures
                );
                set_status(&env.shared, worker_id, WorkerStatus::Completed);
                return ScanOutcome::Exit;
            }
            set_status(&env.shared, worker_id, WorkerStatus::Mining);
            ScanOutcome::Continue
        }
    }
}
