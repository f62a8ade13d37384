// src/orchestrator.rs

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{Local, Timelike};
use log::{debug, error, info, warn};

use crate::api::ScavengerService;
use crate::config::MinerConfig;
use crate::data_types::{Address, Challenge, WorkerStatus};
use crate::dev_fee::DevFeeRotator;
use crate::difficulty::DifficultyMask;
use crate::engine::HashBackend;
use crate::error::MinerError;
use crate::events::{EventBus, MinerEvent};
use crate::grouping::calculate_worker_groups;
use crate::poller::{spawn_poller, ControlMsg};
use crate::receipts::ReceiptStore;
use crate::state::SharedState;
use crate::submit::Submitter;
use crate::wallet::Wallet;
use crate::worker::{run_worker, WorkerEnv};

pub const REGISTRATION_SPACING: Duration = Duration::from_millis(1500);
pub const QUIESCENCE_WAIT: Duration = Duration::from_secs(1);
pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);
const MAIN_LOOP_TICK: Duration = Duration::from_millis(500);

/// Top-level mining state machine: challenge transitions, worker grouping,
/// dev-fee injection, hourly reset, watchdog, crash recovery.
pub struct Orchestrator {
    config: MinerConfig,
    api: Arc<dyn ScavengerService>,
    engine: Arc<dyn HashBackend>,
    wallet: Arc<dyn Wallet>,
    receipts: Arc<ReceiptStore>,
    dev_fee: Arc<DevFeeRotator>,
    shared: Arc<SharedState>,
    events: Arc<EventBus>,
    submitter: Arc<Submitter>,
    mining_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(
        config: MinerConfig,
        api: Arc<dyn ScavengerService>,
        engine: Arc<dyn HashBackend>,
        wallet: Arc<dyn Wallet>,
        receipts: Arc<ReceiptStore>,
        dev_fee: Arc<DevFeeRotator>,
        events: Arc<EventBus>,
    ) -> Self {
        let shared = Arc::new(SharedState::new());
        let submitter = Arc::new(Submitter::new(
            Arc::clone(&api),
            Arc::clone(&wallet),
            Arc::clone(&receipts),
            Arc::clone(&dev_fee),
            Arc::clone(&shared),
            Arc::clone(&events),
        ));
        Orchestrator {
            config,
            api,
            engine,
            wallet,
            receipts,
            dev_fee,
            shared,
            events,
            submitter,
            mining_thread: Mutex::new(None),
        }
    }

    pub fn shared(&self) -> Arc<SharedState> {
        Arc::clone(&self.shared)
    }

    // ------------------------------------------------------------------
    // startup and recovery
    // ------------------------------------------------------------------

    /// Load receipts, seed the solved set and counters, reconcile the
    /// dev-fee cache, register outstanding addresses and fetch the pool.
    pub fn startup(&self) -> Result<(), MinerError> {
        match self.api.fetch_tandc() {
            Ok(tandc) => info!(
                "terms fetched (version {})",
                tandc.version.as_deref().unwrap_or("unknown")
            ),
            Err(e) => warn!("could not fetch terms: {}", e),
        }

        self.load_submitted_solutions()?;
        self.register_outstanding_addresses();
        self.ensure_dev_fee_pool();
        Ok(())
    }

    fn load_submitted_solutions(&self) -> Result<(), MinerError> {
        let receipts = self.receipts.read_all_receipts()?;
        let mut dev_fee_count: u64 = 0;
        let mut user_count: u64 = 0;
        for receipt in &receipts {
            self.shared.submitted_hashes.insert(receipt.hash.clone());
            self.shared
                .mark_solved(&receipt.address, &receipt.challenge_id);
            if receipt.is_dev_fee {
                dev_fee_count += 1;
            } else {
                user_count += 1;
            }
        }
        self.shared.user_solutions.store(user_count, Ordering::SeqCst);
        if self.dev_fee.total_dev_fee_solutions() != dev_fee_count {
            self.dev_fee.sync_with_receipts(dev_fee_count);
        }
        info!(
            "recovered {} receipts ({} user, {} dev-fee)",
            receipts.len(),
            user_count,
            dev_fee_count
        );
        Ok(())
    }

    fn register_outstanding_addresses(&self) {
        let unregistered: Vec<Address> = self
            .wallet
            .addresses()
            .into_iter()
            .filter(|a| !a.registered)
            .collect();
        if unregistered.is_empty() {
            return;
        }
        info!("registering {} addresses", unregistered.len());
        for (i, address) in unregistered.iter().enumerate() {
            if i > 0 {
                thread::sleep(REGISTRATION_SPACING);
            }
            let result = self
                .wallet
                .registration_credentials(&address.bech32)
                .and_then(|creds| {
                    self.api
                        .register_address(&address.bech32, &creds.signature, &creds.public_key)
                })
                .and_then(|()| self.wallet.mark_registered(&address.bech32));
            match result {
                Ok(()) => info!("registered {}", address.bech32),
                // Submission-time auto-registration gets another shot later.
                Err(e) => warn!("registration of {} failed: {}", address.bech32, e),
            }
        }
    }

    fn ensure_dev_fee_pool(&self) {
        if !self.dev_fee.is_enabled() {
            info!("dev-fee rotator disabled");
            return;
        }
        match self.config.dev_fee_url.as_deref() {
            Some(url) => match reqwest::blocking::Client::builder().build() {
                Ok(client) => {
                    self.dev_fee.prefetch_address_pool(&client, url);
                }
                Err(e) => {
                    warn!("dev-fee client init failed: {}; rotator disabled", e);
                    let _ = self.dev_fee.set_enabled(false);
                }
            },
            None => {
                if !self.dev_fee.pool_is_valid() {
                    warn!("no dev-fee endpoint configured and no cached pool; rotator disabled");
                    let _ = self.dev_fee.set_enabled(false);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // main loop
    // ------------------------------------------------------------------

    /// Blocking entry point: polls the challenge endpoint, reacts to
    /// transitions and runs until the mining period ends or `stop` is
    /// called.
    pub fn run(&self) -> Result<(), MinerError> {
        self.startup()?;

        let (tx, rx) = mpsc::channel();
        let poller = spawn_poller(
            Arc::clone(&self.api),
            Arc::clone(&self.shared),
            tx.clone(),
        );
        let watchdog = self.spawn_watchdog(tx);

        let mut last_hour = Local::now().hour();
        while self.shared.is_running.load(Ordering::SeqCst) {
            match rx.recv_timeout(MAIN_LOOP_TICK) {
                Ok(ControlMsg::ChallengeTransition {
                    previous,
                    challenge,
                }) => self.handle_transition(previous, challenge),
                Ok(ControlMsg::DifficultyChanged {
                    old_difficulty,
                    challenge,
                }) => self.handle_difficulty_change(&old_difficulty, challenge),
                Ok(ControlMsg::MiningEnded) => {
                    info!("mining period is over; shutting down");
                    self.stop();
                }
                Ok(ControlMsg::WatchdogRestart) => self.restart_mining(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let hour = Local::now().hour();
            if hour != last_hour {
                last_hour = hour;
                self.hourly_reset();
            }
        }

        let _ = poller.join();
        let _ = watchdog.join();
        self.join_mining_thread();
        Ok(())
    }

    /// Cooperative shutdown: timers cancel, workers exit at the next batch
    /// head, in-flight HTTP finishes on its own timeout.
    pub fn stop(&self) {
        self.shared.is_mining.store(false, Ordering::SeqCst);
        self.shared.is_running.store(false, Ordering::SeqCst);
        self.events.emit(MinerEvent::MiningStopped);
    }

    fn join_mining_thread(&self) {
        let handle = self
            .mining_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    // ------------------------------------------------------------------
    // transitions
    // ------------------------------------------------------------------

    /// Challenge rollover: quiesce workers, reinitialize the ROM when the
    /// day key changed, adopt the new snapshot and restart mining.
    pub fn handle_transition(&self, previous: Option<String>, challenge: Challenge) {
        info!(
            "challenge transition: {} -> {}",
            previous.as_deref().unwrap_or("none"),
            challenge.challenge_id
        );

        self.shared.is_mining.store(false, Ordering::SeqCst);
        self.join_mining_thread();
        self.engine.kill_workers();
        self.shared.clear_worker_state();
        thread::sleep(QUIESCENCE_WAIT);

        let old_key = self
            .shared
            .current_challenge()
            .map(|c| c.no_pre_mine.clone());
        if old_key.as_deref() != Some(challenge.no_pre_mine.as_str())
            || !self.engine.is_rom_ready()
        {
            if let Err(e) = self.engine.init_rom(&challenge.no_pre_mine) {
                error!(
                    "ROM init failed for {}: {}; idle until the next transition",
                    challenge.challenge_id, e
                );
                self.shared.set_current_challenge(Some(challenge));
                return;
            }
        }

        self.shared.set_current_challenge(Some(challenge.clone()));
        self.load_challenge_state(&challenge.challenge_id);

        let zero_bits = DifficultyMask::from_hex(&challenge.difficulty)
            .map(|m| m.zero_bit_prefix())
            .unwrap_or(0);
        println!(
            "\n==============================================\n⛏️  Challenge {} (difficulty {}, {} leading zero bits)\n==============================================",
            challenge.challenge_id, challenge.difficulty, zero_bits
        );
        self.events.emit(MinerEvent::ChallengeStarted {
            challenge_id: challenge.challenge_id.clone(),
            difficulty: challenge.difficulty.clone(),
            zero_bits,
        });

        self.start_mining();
    }

    /// Same challenge, tightened (or relaxed) target: swap the snapshot and
    /// let in-flight workers re-validate at submission time.
    pub fn handle_difficulty_change(&self, old_difficulty: &str, challenge: Challenge) {
        info!(
            "difficulty changed on {}: {} -> {}",
            challenge.challenge_id, old_difficulty, challenge.difficulty
        );
        self.shared.set_current_challenge(Some(challenge));
    }

    fn load_challenge_state(&self, challenge_id: &str) {
        let solved = self.shared.solved_count_for(challenge_id);
        if solved > 0 {
            info!(
                "{} addresses already solved for {} (from receipts)",
                solved, challenge_id
            );
        }
    }

    /// Top-of-hour defensive reset: purge worker state and rebuild the ROM
    /// with the unchanged key, then resume.
    pub fn hourly_reset(&self) {
        let challenge = match self.shared.current_challenge() {
            Some(challenge) => challenge,
            None => return,
        };
        info!("hourly reset: recycling workers and ROM");
        self.shared.is_mining.store(false, Ordering::SeqCst);
        self.join_mining_thread();
        self.engine.kill_workers();
        self.shared.clear_worker_state();
        thread::sleep(QUIESCENCE_WAIT);
        if let Err(e) = self.engine.init_rom(&challenge.no_pre_mine) {
            error!("hourly ROM rebuild failed: {}; idle until next transition", e);
            return;
        }
        self.start_mining();
    }

    fn restart_mining(&self) {
        if !self.shared.is_running.load(Ordering::SeqCst) {
            return;
        }
        warn!("watchdog restart: recycling the worker pool");
        self.shared.is_mining.store(false, Ordering::SeqCst);
        self.join_mining_thread();
        thread::sleep(QUIESCENCE_WAIT);
        self.start_mining();
    }

    // ------------------------------------------------------------------
    // mining driver
    // ------------------------------------------------------------------

    /// Spawn the batch-rotation driver for the current challenge. Returns
    /// immediately; workers run on their own threads.
    pub fn start_mining(&self) {
        if self.shared.current_challenge().is_none() {
            debug!("start_mining without a challenge; staying idle");
            return;
        }
        if !self.shared.is_running.load(Ordering::SeqCst) {
            return;
        }

        self.shared.is_mining.store(true, Ordering::SeqCst);

        let env = WorkerEnv {
            engine: Arc::clone(&self.engine),
            shared: Arc::clone(&self.shared),
            submitter: Arc::clone(&self.submitter),
            events: Arc::clone(&self.events),
            batch_size: self.config.batch_size,
            max_submission_failures: self.config.max_submission_failures,
        };
        let wallet = Arc::clone(&self.wallet);
        let dev_fee = Arc::clone(&self.dev_fee);
        let receipts = Arc::clone(&self.receipts);
        let events = Arc::clone(&self.events);
        let worker_threads = self.config.worker_threads.max(1);
        let mode = self.config.worker_grouping_mode;
        let workers_per_address = self.config.workers_per_address;

        let handle = thread::Builder::new()
            .name("mining-driver".to_string())
            .spawn(move || {
                mining_loop(
                    env,
                    wallet,
                    dev_fee,
                    receipts,
                    worker_threads,
                    mode,
                    workers_per_address,
                );
                events.emit(MinerEvent::MiningStopped);
            })
            .expect("spawn mining driver");

        let mut slot = self
            .mining_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(handle) {
            // A previous driver that already observed is_mining == false.
            drop(slot);
            let _ = old.join();
        }
    }

    // ------------------------------------------------------------------
    // watchdog
    // ------------------------------------------------------------------

    fn spawn_watchdog(&self, tx: Sender<ControlMsg>) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                let mut since_last_check = Duration::ZERO;
                while shared.is_running.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_secs(1));
                    since_last_check += Duration::from_secs(1);
                    if since_last_check < WATCHDOG_INTERVAL {
                        continue;
                    }
                    since_last_check = Duration::ZERO;

                    if !shared.is_mining.load(Ordering::SeqCst) {
                        continue;
                    }
                    let issues = find_watchdog_issues(&shared);
                    if issues.is_empty() {
                        continue;
                    }
                    for issue in &issues {
                        warn!("watchdog: {}", issue);
                    }
                    // Restarting between batches only; racing the natural
                    // end-of-batch turnover just causes oscillation.
                    if shared.batch_in_progress.load(Ordering::SeqCst) {
                        debug!("watchdog: batch in progress, deferring restart");
                        continue;
                    }
                    if tx.send(ControlMsg::WatchdogRestart).is_err() {
                        break;
                    }
                }
            })
            .expect("spawn watchdog")
    }
}

/// Worker-pool health check: no worker should sit idle while mining is
/// active, and none should be grinding an address that is already solved for
/// the current challenge.
pub fn find_watchdog_issues(shared: &SharedState) -> Vec<String> {
    let challenge_id = match shared.current_challenge_id() {
        Some(id) => id,
        None => return Vec::new(),
    };
    let mut issues = Vec::new();
    for entry in shared.worker_stats.iter() {
        let stats = entry.value();
        match stats.status {
            WorkerStatus::Idle => {
                issues.push(format!("worker {} idle during active mining", stats.worker_id));
            }
            WorkerStatus::Mining if shared.is_solved(&stats.address, &challenge_id) => {
                issues.push(format!(
                    "worker {} mining already-solved address {}",
                    stats.worker_id, stats.address
                ));
            }
            _ => {}
        }
    }
    issues
}

/// Batched rotation over the eligible addresses: group workers, run one
/// batch of worker tasks to completion, advance the cursor, repeat until the
/// challenge changes or everything is solved.
#[allow(clippy::too_many_arguments)]
fn mining_loop(
    env: WorkerEnv,
    wallet: Arc<dyn Wallet>,
    dev_fee: Arc<DevFeeRotator>,
    receipts: Arc<ReceiptStore>,
    worker_threads: usize,
    mode: crate::config::GroupingMode,
    workers_per_address: usize,
) {
    let mut cursor = 0usize;

    while env.shared.is_mining.load(Ordering::SeqCst)
        && env.shared.is_running.load(Ordering::SeqCst)
    {
        let challenge = match env.shared.current_challenge() {
            Some(challenge) => challenge,
            None => break,
        };
        let challenge_id = challenge.challenge_id.clone();

        let mut eligible: Vec<Address> = wallet
            .addresses()
            .into_iter()
            .filter(|a| a.registered && !env.shared.is_solved(&a.bech32, &challenge_id))
            .collect();
        if eligible.is_empty() {
            info!(
                "all addresses solved for {}; idle until the next challenge",
                challenge_id
            );
            env.shared.is_mining.store(false, Ordering::SeqCst);
            break;
        }
        if cursor >= eligible.len() {
            cursor = 0;
        }
        eligible.rotate_left(cursor);

        // Dev-fee injection: the synthetic address joins the batch head and
        // is grouped like any other address.
        let mut dev_fee_injected = false;
        if dev_fee.should_mine_dev_fee_now(&receipts) {
            if let Some(dev_address) = dev_fee.get_dev_fee_address(&challenge_id) {
                if !env.shared.is_solved(&dev_address.bech32, &challenge_id) {
                    info!("injecting dev-fee address {} into this batch", dev_address.bech32);
                    eligible.insert(0, dev_address);
                    dev_fee.set_mining_dev_fee(true);
                    dev_fee_injected = true;
                }
            }
        }

        let groups =
            calculate_worker_groups(&eligible, worker_threads, mode, workers_per_address);
        if groups.is_empty() {
            break;
        }
        let user_groups = groups
            .iter()
            .filter(|g| !g.address.is_dev_fee())
            .count();

        debug!(
            "batch: {} groups over {} eligible addresses (cursor {})",
            groups.len(),
            eligible.len(),
            cursor
        );

        env.shared.batch_in_progress.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();
        for group in &groups {
            for worker_id in &group.worker_ids {
                let env = env.clone();
                let address = group.address.clone();
                // Frozen deep copy: the poller may swap the live snapshot
                // mid-batch without touching this worker's inputs.
                let snapshot = challenge.clone();
                let worker_id = *worker_id;
                let handle = thread::Builder::new()
                    .name(format!("miner-{}", worker_id))
                    .spawn(move || run_worker(&env, worker_id, &address, &snapshot))
                    .expect("spawn mining worker");
                handles.push(handle);
            }
        }
        for handle in handles {
            let _ = handle.join();
        }
        env.shared.batch_in_progress.store(false, Ordering::SeqCst);

        if dev_fee_injected {
            dev_fee.set_mining_dev_fee(false);
        }
        env.shared.stopped_workers.clear();

        cursor += user_groups;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::WorkerStats;

    fn challenge(id: &str) -> Challenge {
        Challenge {
            challenge_id: id.into(),
            difficulty: "00FF".into(),
            latest_submission: "ls".into(),
            no_pre_mine: "npm".into(),
            no_pre_mine_hour: "h".into(),
            challenge_number: None,
            day: None,
            issued_at: None,
        }
    }

    fn address(i: i32) -> Address {
        Address {
            index: i,
            bech32: format!("addr1q{:03}", i),
            public_key: String::new(),
            registered: true,
        }
    }

    #[test]
    fn watchdog_flags_idle_workers() {
        let shared = SharedState::new();
        shared.set_current_challenge(Some(challenge("C1")));
        shared
            .worker_stats
            .insert(0, WorkerStats::new(0, &address(0), "C1"));
        // Fresh stats are Idle.
        let issues = find_watchdog_issues(&shared);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("idle"));
    }

    #[test]
    fn watchdog_flags_mining_on_solved_address() {
        let shared = SharedState::new();
        shared.set_current_challenge(Some(challenge("C1")));
        let addr = address(0);
        let mut stats = WorkerStats::new(0, &addr, "C1");
        stats.status = WorkerStatus::Mining;
        shared.worker_stats.insert(0, stats);
        shared.mark_solved(&addr.bech32, "C1");

        let issues = find_watchdog_issues(&shared);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("already-solved"));
    }

    #[test]
    fn watchdog_quiet_when_healthy_or_idle_without_challenge() {
        let shared = SharedState::new();
        assert!(find_watchdog_issues(&shared).is_empty());

        shared.set_current_challenge(Some(challenge("C1")));
        let mut stats = WorkerStats::new(0, &address(0), "C1");
        stats.status = WorkerStatus::Mining;
        shared.worker_stats.insert(0, stats);
        assert!(find_watchdog_issues(&shared).is_empty());
    }
}
