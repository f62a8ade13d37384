// src/data_types.rs

use std::time::Instant;

use serde::{Deserialize, Serialize};

// ===============================================
// API RESPONSE STRUCTS
// ===============================================

#[derive(Debug, Deserialize)]
pub struct TandCResponse {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    pub message: String,
}

/// Immutable challenge descriptor. Workers hold a deep copy of this for the
/// duration of a batch; the poller swaps the orchestrator's copy underneath.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Challenge {
    pub challenge_id: String,
    pub difficulty: String,
    pub latest_submission: String,
    pub no_pre_mine: String,
    pub no_pre_mine_hour: String,
    #[serde(default)]
    pub challenge_number: Option<u16>,
    #[serde(default)]
    pub day: Option<u8>,
    #[serde(default)]
    pub issued_at: Option<String>,
}

impl Challenge {
    /// True when any field that feeds the preimage or the acceptance check
    /// differs, while the challenge itself is still the same one.
    pub fn mutable_fields_differ(&self, other: &Challenge) -> bool {
        self.difficulty != other.difficulty
            || self.latest_submission != other.latest_submission
            || self.no_pre_mine_hour != other.no_pre_mine_hour
    }
}

#[derive(Debug, Deserialize)]
pub struct ChallengeResponse {
    pub code: String,
    pub challenge: Option<Challenge>,
    #[serde(default)]
    pub starts_at: Option<String>,
}

/// Server-side lifecycle of the mining period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengePhase {
    Before,
    Active,
    After,
}

impl ChallengeResponse {
    pub fn phase(&self) -> Option<ChallengePhase> {
        match self.code.as_str() {
            "before" => Some(ChallengePhase::Before),
            "active" => Some(ChallengePhase::Active),
            "after" => Some(ChallengePhase::After),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, PartialEq)]
pub struct SolutionReceipt {
    pub crypto_receipt: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(rename = "statusCode", default)]
    pub status_code: Option<u16>,
}

// ===============================================
// DEV-FEE SERVICE PAYLOADS
// ===============================================

#[derive(Debug, Serialize)]
pub struct DevFeePoolRequest {
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "clientType")]
    pub client_type: String,
}

#[derive(Debug, Deserialize)]
pub struct DevFeePoolResponse {
    pub addresses: Vec<DevFeePoolEntry>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DevFeePoolEntry {
    #[serde(rename = "devAddress")]
    pub dev_address: String,
    #[serde(rename = "devAddressIndex")]
    pub dev_address_index: i32,
    pub registered: bool,
}

// ===============================================
// CORE APPLICATION STRUCTS
// ===============================================

/// Index used for addresses mined on behalf of the dev-fee pool.
pub const DEV_FEE_ADDRESS_INDEX: i32 = -1;

/// A wallet-derived (or dev-fee) mining address. Derivation and signing live
/// outside this crate; the orchestrator only sees the resolved form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub index: i32,
    pub bech32: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub registered: bool,
}

impl Address {
    pub fn dev_fee(bech32: String) -> Self {
        Address {
            index: DEV_FEE_ADDRESS_INDEX,
            bech32,
            public_key: String::new(),
            registered: true,
        }
    }

    pub fn is_dev_fee(&self) -> bool {
        self.index == DEV_FEE_ADDRESS_INDEX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Mining,
    Submitting,
    Completed,
}

/// Per-worker progress snapshot, updated by the worker itself and read by
/// the watchdog and any attached observer.
#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub worker_id: usize,
    pub address_index: i32,
    pub address: String,
    pub hashes_computed: u64,
    pub hash_rate: f64,
    pub solutions_found: u64,
    pub start_time: Instant,
    pub last_update_time: Instant,
    pub status: WorkerStatus,
    pub current_challenge: String,
}

impl WorkerStats {
    pub fn new(worker_id: usize, address: &Address, challenge_id: &str) -> Self {
        let now = Instant::now();
        WorkerStats {
            worker_id,
            address_index: address.index,
            address: address.bech32.clone(),
            hashes_computed: 0,
            hash_rate: 0.0,
            solutions_found: 0,
            start_time: now,
            last_update_time: now,
            status: WorkerStatus::Idle,
            current_challenge: challenge_id.to_string(),
        }
    }

    pub fn record_hashes(&mut self, hashes: u64) {
        self.hashes_computed += hashes;
        self.last_update_time = Instant::now();
        let elapsed = self.last_update_time.duration_since(self.start_time).as_secs_f64();
        if elapsed > 0.001 {
            self.hash_rate = self.hashes_computed as f64 / elapsed;
        }
    }
}

// ===============================================
// PERSISTED RECORDS
// ===============================================

/// One line in the receipts log: an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptEntry {
    pub ts: String,
    pub address: String,
    pub address_index: i32,
    pub challenge_id: String,
    pub nonce: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crypto_receipt: Option<serde_json::Value>,
    #[serde(default)]
    pub is_dev_fee: bool,
}

/// One line in the errors log: a failed or uncertain submission attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub ts: String,
    pub address: String,
    pub challenge_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub error: String,
}
