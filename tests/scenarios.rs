// tests/scenarios.rs
//
// End-to-end orchestration runs over in-memory service and engine fakes.

mod common;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use night_harvester::api::ScavengerService;
use night_harvester::config::{GroupingMode, MinerConfig};
use night_harvester::data_types::DevFeePoolEntry;
use night_harvester::dev_fee::DevFeeRotator;
use night_harvester::engine::HashBackend;
use night_harvester::events::EventBus;
use night_harvester::receipts::ReceiptStore;
use night_harvester::wallet::Wallet;
use night_harvester::{Orchestrator, ReceiptEntry};

struct Harness {
    orchestrator: Orchestrator,
    api: Arc<MockService>,
    engine: Arc<MockEngine>,
    receipts: Arc<ReceiptStore>,
    dev_fee: Arc<DevFeeRotator>,
    dir: PathBuf,
}

impl Harness {
    fn new(tag: &str, addresses: usize, worker_threads: usize, fill: u8) -> Self {
        let dir = temp_dir(tag);
        let api = Arc::new(MockService::new());
        let engine = Arc::new(MockEngine::new(fill));
        let wallet = Arc::new(MemWallet::with_addresses(addresses));
        let receipts = Arc::new(ReceiptStore::open(&dir).unwrap());
        let dev_fee = Arc::new(DevFeeRotator::load_or_init(&dir, 17).unwrap());
        let events = Arc::new(EventBus::new());

        let config = MinerConfig {
            worker_threads,
            batch_size: 16,
            worker_grouping_mode: GroupingMode::Auto,
            workers_per_address: 2,
            max_submission_failures: 1,
            api_url: "http://mock".into(),
            dev_fee_url: None,
            data_dir: dir.to_string_lossy().into_owned(),
            rom_size_mb: 1,
            dev_fee_ratio: 17,
        };

        let orchestrator = Orchestrator::new(
            config,
            api.clone() as Arc<dyn ScavengerService>,
            engine.clone() as Arc<dyn HashBackend>,
            wallet as Arc<dyn Wallet>,
            receipts.clone(),
            dev_fee.clone(),
            events,
        );

        Harness {
            orchestrator,
            api,
            engine,
            receipts,
            dev_fee,
            dir,
        }
    }

    fn wait_until_idle(&self) -> bool {
        let shared = self.orchestrator.shared();
        wait_for(Duration::from_secs(10), || {
            !shared.is_mining.load(Ordering::SeqCst)
                && !shared.batch_in_progress.load(Ordering::SeqCst)
        })
    }

    fn finish(self) {
        self.orchestrator.stop();
        self.wait_until_idle();
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

fn seed_user_receipts(store: &ReceiptStore, n: usize) {
    for i in 0..n {
        store
            .append_receipt(&ReceiptEntry {
                ts: "2025-11-01T00:00:00Z".into(),
                address: format!("addr1qseed{:03}", i),
                address_index: 100 + i as i32,
                challenge_id: "SEED".into(),
                nonce: format!("{:016x}", i),
                hash: format!("{:0128x}", i),
                crypto_receipt: None,
                is_dev_fee: false,
            })
            .unwrap();
    }
}

#[test]
fn happy_path_mines_submits_and_persists() {
    let harness = Harness::new("happy", 1, 1, 0);
    harness
        .api
        .set_challenge(challenge("C1", &permissive_difficulty(), "npm-day1"));

    harness
        .orchestrator
        .handle_transition(None, challenge("C1", &permissive_difficulty(), "npm-day1"));

    // Mining stops on its own once the only address is solved.
    assert!(harness.wait_until_idle(), "mining never settled");

    let shared = harness.orchestrator.shared();
    assert!(shared.is_solved("addr1quser000", "C1"));

    let submissions = harness.api.submissions.lock().unwrap().clone();
    assert_eq!(submissions.len(), 1, "exactly one POST per (addr, challenge)");
    assert_eq!(submissions[0].challenge_id, "C1");

    // Worker 0 enumerates only its own range.
    let nonce = u64::from_str_radix(&submissions[0].nonce, 16).unwrap();
    assert!(nonce < night_harvester::worker::NONCE_RANGE_WIDTH);

    let receipts = harness.receipts.read_all_receipts().unwrap();
    assert_eq!(receipts.len(), 1);
    assert!(!receipts[0].is_dev_fee);
    assert_eq!(receipts[0].challenge_id, "C1");
    assert!(receipts[0].crypto_receipt.is_some());
    assert_eq!(receipts[0].nonce, submissions[0].nonce);

    harness.finish();
}

#[test]
fn rollover_reinitializes_rom_and_discards_stale_work() {
    let harness = Harness::new("rollover", 1, 2, 0);

    // C1 is unsolvable for the mock engine, so workers grind fruitlessly.
    harness
        .orchestrator
        .handle_transition(None, challenge("C1", &impossible_difficulty(), "npm-day1"));
    assert_eq!(harness.engine.init_calls.load(Ordering::SeqCst), 1);
    std::thread::sleep(Duration::from_millis(300));

    // Day rollover: new challenge id and a new ROM key.
    harness.orchestrator.handle_transition(
        Some("C1".into()),
        challenge("C2", &permissive_difficulty(), "npm-day2"),
    );
    assert_eq!(harness.engine.init_calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        harness.engine.last_key.lock().unwrap().as_deref(),
        Some("npm-day2")
    );

    assert!(harness.wait_until_idle(), "mining never settled after rollover");

    // Nothing computed under C1 may surface as a C1 receipt.
    let receipts = harness.receipts.read_all_receipts().unwrap();
    assert!(!receipts.is_empty());
    assert!(receipts.iter().all(|r| r.challenge_id == "C2"));

    harness.finish();
}

#[test]
fn same_key_rollover_skips_rom_rebuild() {
    let harness = Harness::new("samekey", 1, 1, 0);
    harness
        .orchestrator
        .handle_transition(None, challenge("C1", &permissive_difficulty(), "npm-day1"));
    assert!(harness.wait_until_idle());
    assert_eq!(harness.engine.init_calls.load(Ordering::SeqCst), 1);

    // Hour boundary within the same day: same no_pre_mine, ROM still ready.
    harness
        .orchestrator
        .handle_transition(Some("C1".into()), challenge("C1H2", &permissive_difficulty(), "npm-day1"));
    assert!(harness.wait_until_idle());
    assert_eq!(harness.engine.init_calls.load(Ordering::SeqCst), 1);

    harness.finish();
}

#[test]
fn dev_fee_cadence_injects_pool_slot_zero() {
    let harness = Harness::new("devfee", 1, 2, 0);

    // 16 user receipts and none for the dev pool: next solution is a fee.
    seed_user_receipts(&harness.receipts, 16);
    harness
        .dev_fee
        .install_pool(
            (0..10)
                .map(|i| DevFeePoolEntry {
                    dev_address: format!("addr1qdev{:02}", i),
                    dev_address_index: i,
                    registered: true,
                })
                .collect(),
        )
        .unwrap();
    harness.orchestrator.startup().unwrap();

    harness
        .orchestrator
        .handle_transition(None, challenge("C1", &permissive_difficulty(), "npm-day1"));

    assert!(
        wait_for(Duration::from_secs(10), || {
            harness
                .receipts
                .read_all_receipts()
                .unwrap()
                .iter()
                .any(|r| r.is_dev_fee)
        }),
        "no dev-fee receipt appeared"
    );

    let receipts = harness.receipts.read_all_receipts().unwrap();
    let fee = receipts.iter().find(|r| r.is_dev_fee).unwrap();
    assert_eq!(fee.address, "addr1qdev00");
    assert_eq!(fee.address_index, -1);
    assert!(harness.dev_fee.total_dev_fee_solutions() >= 1);

    harness.orchestrator.stop();
    harness.wait_until_idle();
    let _ = std::fs::remove_dir_all(&harness.dir);
}

#[test]
fn already_solved_addresses_leave_mining_idle() {
    let harness = Harness::new("solved", 2, 2, 0);
    let shared = harness.orchestrator.shared();
    shared.mark_solved("addr1quser000", "C1");
    shared.mark_solved("addr1quser001", "C1");

    harness
        .orchestrator
        .handle_transition(None, challenge("C1", &permissive_difficulty(), "npm-day1"));

    assert!(harness.wait_until_idle());
    assert_eq!(harness.api.submission_count(), 0);
    assert!(harness.receipts.read_all_receipts().unwrap().is_empty());

    harness.finish();
}

#[test]
fn recovery_restores_solved_set_and_counters() {
    let dir = temp_dir("recovery");
    let receipts = Arc::new(ReceiptStore::open(&dir).unwrap());
    receipts
        .append_receipt(&ReceiptEntry {
            ts: "2025-11-01T00:00:00Z".into(),
            address: "addr1quser000".into(),
            address_index: 0,
            challenge_id: "C1".into(),
            nonce: format!("{:016x}", 7),
            hash: "ab".repeat(64),
            crypto_receipt: None,
            is_dev_fee: false,
        })
        .unwrap();
    receipts
        .append_receipt(&ReceiptEntry {
            ts: "2025-11-01T00:01:00Z".into(),
            address: "addr1qdev00".into(),
            address_index: -1,
            challenge_id: "C1".into(),
            nonce: format!("{:016x}", 8),
            hash: "cd".repeat(64),
            crypto_receipt: None,
            is_dev_fee: true,
        })
        .unwrap();

    let api = Arc::new(MockService::new());
    let engine = Arc::new(MockEngine::new(0));
    let wallet = Arc::new(MemWallet::with_addresses(1));
    let dev_fee = Arc::new(DevFeeRotator::load_or_init(&dir, 17).unwrap());
    let orchestrator = Orchestrator::new(
        MinerConfig {
            data_dir: dir.to_string_lossy().into_owned(),
            ..MinerConfig::default()
        },
        api as Arc<dyn ScavengerService>,
        engine as Arc<dyn HashBackend>,
        wallet as Arc<dyn Wallet>,
        receipts.clone(),
        dev_fee.clone(),
        Arc::new(EventBus::new()),
    );

    orchestrator.startup().unwrap();

    let shared = orchestrator.shared();
    assert!(shared.is_solved("addr1quser000", "C1"));
    assert!(shared.is_solved("addr1qdev00", "C1"));
    assert!(shared.submitted_hashes.contains(&"ab".repeat(64)));
    assert_eq!(shared.user_solutions.load(Ordering::SeqCst), 1);
    // Cache said 0 dev-fee solutions; receipts say 1; receipts win.
    assert_eq!(dev_fee.total_dev_fee_solutions(), 1);

    let _ = std::fs::remove_dir_all(&dir);
}
