// tests/submission_protocol.rs
//
// Submission classification policy: duplicates, auto-registration retry,
// timeouts and the failure budget.

mod common;

use std::sync::Arc;

use common::*;
use night_harvester::api::ScavengerService;
use night_harvester::data_types::Address;
use night_harvester::dev_fee::DevFeeRotator;
use night_harvester::error::MinerError;
use night_harvester::events::EventBus;
use night_harvester::receipts::ReceiptStore;
use night_harvester::state::SharedState;
use night_harvester::submit::Submitter;
use night_harvester::wallet::Wallet;

struct Fixture {
    api: Arc<MockService>,
    wallet: Arc<MemWallet>,
    receipts: Arc<ReceiptStore>,
    shared: Arc<SharedState>,
    submitter: Submitter,
    dir: std::path::PathBuf,
}

impl Fixture {
    fn new(tag: &str) -> Self {
        let dir = temp_dir(tag);
        let api = Arc::new(MockService::new());
        let wallet = Arc::new(MemWallet::with_addresses(1));
        let receipts = Arc::new(ReceiptStore::open(&dir).unwrap());
        let dev_fee = Arc::new(DevFeeRotator::load_or_init(&dir, 17).unwrap());
        let shared = Arc::new(SharedState::new());
        let submitter = Submitter::new(
            api.clone() as Arc<dyn ScavengerService>,
            wallet.clone() as Arc<dyn Wallet>,
            receipts.clone(),
            dev_fee,
            shared.clone(),
            Arc::new(EventBus::new()),
        );
        Fixture {
            api,
            wallet,
            receipts,
            shared,
            submitter,
            dir,
        }
    }

    fn address(&self) -> Address {
        self.wallet.addresses().remove(0)
    }

    fn finish(self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[test]
fn accepted_solution_writes_receipt_and_marks_solved() {
    let fixture = Fixture::new("accept");
    let address = fixture.address();

    fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap();

    assert!(fixture.shared.is_solved(&address.bech32, "C1"));
    let receipts = fixture.receipts.read_all_receipts().unwrap();
    assert_eq!(receipts.len(), 1);
    assert_eq!(receipts[0].nonce, "00000000000000aa");
    assert_eq!(
        fixture
            .shared
            .user_solutions
            .load(std::sync::atomic::Ordering::SeqCst),
        1
    );

    fixture.finish();
}

#[test]
fn duplicate_is_success_without_a_receipt() {
    let fixture = Fixture::new("duplicate");
    let address = fixture.address();
    fixture.api.queue_behaviors([SubmitBehavior::Duplicate]);

    // No error propagates.
    fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap();

    // Solved, but the at-most-one receipt invariant excludes duplicates.
    assert!(fixture.shared.is_solved(&address.bech32, "C1"));
    assert!(fixture.receipts.read_all_receipts().unwrap().is_empty());

    // The benign duplicate shows up in the error log.
    let errors = fixture.receipts.read_all_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.contains("duplicate"));

    fixture.finish();
}

#[test]
fn unregistered_address_triggers_one_registration_retry() {
    let fixture = Fixture::new("autoreg");
    let address = fixture.address();
    fixture.wallet.set_registered(&address.bech32, false);
    fixture
        .api
        .queue_behaviors([SubmitBehavior::Unregistered, SubmitBehavior::Accept]);

    fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap();

    assert_eq!(fixture.api.registration_count(), 1);
    assert_eq!(fixture.api.submission_count(), 2);
    assert!(fixture.shared.is_solved(&address.bech32, "C1"));
    assert_eq!(fixture.receipts.read_all_receipts().unwrap().len(), 1);
    // The wallet learned about the successful registration.
    assert!(fixture.wallet.addresses()[0].registered);

    fixture.finish();
}

#[test]
fn registration_retry_happens_at_most_once() {
    let fixture = Fixture::new("autoreg-cap");
    let address = fixture.address();
    fixture
        .api
        .queue_behaviors([SubmitBehavior::Unregistered, SubmitBehavior::Unregistered]);

    let err = fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap_err();

    assert!(matches!(err, MinerError::AddressUnregistered { .. }));
    // One registration, two submissions, no third attempt.
    assert_eq!(fixture.api.registration_count(), 1);
    assert_eq!(fixture.api.submission_count(), 2);
    assert!(!fixture.shared.is_solved(&address.bech32, "C1"));

    fixture.finish();
}

#[test]
fn failed_registration_propagates_without_resubmitting() {
    let fixture = Fixture::new("reg-fails");
    let address = fixture.address();
    fixture.api.queue_behaviors([SubmitBehavior::Unregistered]);
    fixture
        .api
        .registration_fails
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let err = fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap_err();

    assert!(matches!(err, MinerError::AddressUnregistered { .. }));
    assert_eq!(fixture.api.submission_count(), 1);
    let errors = fixture.receipts.read_all_errors().unwrap();
    assert!(errors
        .iter()
        .any(|e| e.error.contains("auto-registration failed")));

    fixture.finish();
}

#[test]
fn timeout_records_uncertain_state_and_counts_as_failure() {
    let fixture = Fixture::new("timeout");
    let address = fixture.address();
    fixture.api.queue_behaviors([SubmitBehavior::Timeout]);

    let err = fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap_err();

    assert!(err.counts_as_submission_failure());
    assert!(!fixture.shared.is_solved(&address.bech32, "C1"));
    let errors = fixture.receipts.read_all_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].error.contains("uncertain"));

    fixture.finish();
}

#[test]
fn rejection_is_logged_and_propagates() {
    let fixture = Fixture::new("reject");
    let address = fixture.address();
    fixture
        .api
        .queue_behaviors([SubmitBehavior::Reject("invalid nonce".into())]);

    let err = fixture
        .submitter
        .submit_solution(&address, "C1", "00000000000000aa", &"11".repeat(64))
        .unwrap_err();

    assert!(matches!(err, MinerError::SubmissionRejected(_)));
    let errors = fixture.receipts.read_all_errors().unwrap();
    assert!(errors[0].error.contains("invalid nonce"));

    fixture.finish();
}
