// tests/common/mod.rs
//
// In-memory fakes for the service and the hash backend, so the orchestrator
// and workers can be driven end-to-end without network or a gigabyte ROM.
// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use night_harvester::api::ScavengerService;
use night_harvester::data_types::{
    Challenge, ChallengeResponse, SolutionReceipt, TandCResponse,
};
use night_harvester::engine::HashBackend;
use night_harvester::error::MinerError;
use night_harvester::wallet::{RegistrationCredentials, Wallet};
use night_harvester::Address;

static DIR_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "night-harvester-it-{}-{}-{}",
        tag,
        std::process::id(),
        DIR_SEQ.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

pub fn challenge(id: &str, difficulty: &str, no_pre_mine: &str) -> Challenge {
    Challenge {
        challenge_id: id.to_string(),
        difficulty: difficulty.to_string(),
        latest_submission: "latest".to_string(),
        no_pre_mine: no_pre_mine.to_string(),
        no_pre_mine_hour: "7".to_string(),
        challenge_number: None,
        day: None,
        issued_at: None,
    }
}

/// Mask constraining only the first byte to zero; MockEngine hashes with
/// `fill = 0` pass it, `fill != 0` fail it.
pub fn permissive_difficulty() -> String {
    format!("00{}", "ff".repeat(63))
}

/// Mask only the all-zero hash can satisfy.
pub fn impossible_difficulty() -> String {
    "00".repeat(64)
}

// ----------------------------------------------------------------------
// mock scavenger service
// ----------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    Accept,
    Duplicate,
    Unregistered,
    Timeout,
    Reject(String),
}

#[derive(Debug, Clone)]
pub struct SubmissionRecord {
    pub address: String,
    pub challenge_id: String,
    pub nonce: String,
}

pub struct MockService {
    pub current: Mutex<Option<Challenge>>,
    /// One behavior per submission, oldest first; empty queue accepts.
    pub behaviors: Mutex<VecDeque<SubmitBehavior>>,
    pub submissions: Mutex<Vec<SubmissionRecord>>,
    pub registrations: Mutex<Vec<String>>,
    pub registration_fails: AtomicBool,
}

impl MockService {
    pub fn new() -> Self {
        MockService {
            current: Mutex::new(None),
            behaviors: Mutex::new(VecDeque::new()),
            submissions: Mutex::new(Vec::new()),
            registrations: Mutex::new(Vec::new()),
            registration_fails: AtomicBool::new(false),
        }
    }

    pub fn set_challenge(&self, challenge: Challenge) {
        *self.current.lock().unwrap() = Some(challenge);
    }

    pub fn queue_behaviors(&self, behaviors: impl IntoIterator<Item = SubmitBehavior>) {
        self.behaviors.lock().unwrap().extend(behaviors);
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap().len()
    }

    pub fn registration_count(&self) -> usize {
        self.registrations.lock().unwrap().len()
    }
}

impl ScavengerService for MockService {
    fn fetch_challenge(&self) -> Result<ChallengeResponse, MinerError> {
        Ok(ChallengeResponse {
            code: "active".to_string(),
            challenge: self.current.lock().unwrap().clone(),
            starts_at: None,
        })
    }

    fn fetch_tandc(&self) -> Result<TandCResponse, MinerError> {
        Ok(TandCResponse {
            version: Some("1".to_string()),
            content: None,
            message: "sign me".to_string(),
        })
    }

    fn register_address(
        &self,
        address: &str,
        _signature: &str,
        _public_key_hex: &str,
    ) -> Result<(), MinerError> {
        if self.registration_fails.load(Ordering::SeqCst) {
            return Err(MinerError::Api("registration rejected".to_string()));
        }
        self.registrations.lock().unwrap().push(address.to_string());
        Ok(())
    }

    fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SolutionReceipt, MinerError> {
        self.submissions.lock().unwrap().push(SubmissionRecord {
            address: address.to_string(),
            challenge_id: challenge_id.to_string(),
            nonce: nonce.to_string(),
        });
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitBehavior::Accept);
        match behavior {
            SubmitBehavior::Accept => Ok(SolutionReceipt {
                crypto_receipt: serde_json::json!({"ok": true}),
            }),
            SubmitBehavior::Duplicate => Err(MinerError::DuplicateSolution {
                address: address.to_string(),
                challenge_id: challenge_id.to_string(),
            }),
            SubmitBehavior::Unregistered => Err(MinerError::AddressUnregistered {
                address: address.to_string(),
            }),
            SubmitBehavior::Timeout => Err(MinerError::SubmissionTimeout(60)),
            SubmitBehavior::Reject(message) => Err(MinerError::SubmissionRejected(message)),
        }
    }
}

// ----------------------------------------------------------------------
// mock hash backend
// ----------------------------------------------------------------------

/// Deterministic stand-in for the ROM engine. The first output byte is a
/// configurable fill (0 passes the permissive mask), the rest depend on the
/// preimage so distinct nonces give distinct hashes.
pub struct MockEngine {
    pub fill: Mutex<u8>,
    pub ready: AtomicBool,
    pub init_calls: AtomicUsize,
    pub last_key: Mutex<Option<String>>,
}

impl MockEngine {
    pub fn new(fill: u8) -> Self {
        MockEngine {
            fill: Mutex::new(fill),
            ready: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            last_key: Mutex::new(None),
        }
    }
}

impl HashBackend for MockEngine {
    fn init_rom(&self, no_pre_mine: &str) -> Result<(), MinerError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_key.lock().unwrap() = Some(no_pre_mine.to_string());
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_rom_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn hash_batch(&self, preimages: &[Vec<u8>]) -> Result<Vec<[u8; 64]>, MinerError> {
        let fill = *self.fill.lock().unwrap();
        Ok(preimages
            .iter()
            .map(|preimage| {
                let mut hasher = DefaultHasher::new();
                preimage.hash(&mut hasher);
                let digest = hasher.finish().to_le_bytes();
                let mut out = [0u8; 64];
                out[0] = fill;
                out[8..16].copy_from_slice(&digest);
                out
            })
            .collect())
    }

    fn kill_workers(&self) {}
}

// ----------------------------------------------------------------------
// in-memory wallet
// ----------------------------------------------------------------------

pub struct MemWallet {
    entries: Mutex<Vec<Address>>,
}

impl MemWallet {
    pub fn with_addresses(n: usize) -> Self {
        MemWallet {
            entries: Mutex::new(
                (0..n)
                    .map(|i| Address {
                        index: i as i32,
                        bech32: format!("addr1quser{:03}", i),
                        public_key: format!("pk{:02}", i),
                        registered: true,
                    })
                    .collect(),
            ),
        }
    }

    pub fn set_registered(&self, address: &str, registered: bool) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|a| a.bech32 == address) {
            entry.registered = registered;
        }
    }
}

impl Wallet for MemWallet {
    fn addresses(&self) -> Vec<Address> {
        self.entries.lock().unwrap().clone()
    }

    fn registration_credentials(
        &self,
        address: &str,
    ) -> Result<RegistrationCredentials, MinerError> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .find(|a| a.bech32 == address)
            .map(|a| RegistrationCredentials {
                signature: format!("sig-{}", a.index),
                public_key: a.public_key.clone(),
            })
            .ok_or_else(|| MinerError::Wallet(format!("unknown address {}", address)))
    }

    fn mark_registered(&self, address: &str) -> Result<(), MinerError> {
        self.set_registered(address, true);
        Ok(())
    }
}

// ----------------------------------------------------------------------
// helpers
// ----------------------------------------------------------------------

/// Spin until `predicate` holds or the timeout passes; returns whether it
/// held.
pub fn wait_for(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    predicate()
}
