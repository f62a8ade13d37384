// src/dev_fee.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use log::{info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::data_types::{Address, DevFeePoolEntry, DevFeePoolRequest, DevFeePoolResponse};
use crate::error::MinerError;
use crate::receipts::ReceiptStore;

pub const DEV_FEE_POOL_SIZE: usize = 10;
pub const DEFAULT_DEV_FEE_RATIO: usize = 17;
pub const DEV_FEE_PREFETCH_TIMEOUT_SECS: u64 = 10;
pub const FILE_NAME_DEV_FEE_CACHE: &str = "dev_fee.json";

const ADDRESS_PREFIXES: [&str; 2] = ["addr1", "addr_test1"];

/// Persistent rotator state, mirrored to the cache file on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevFeeState {
    pub address_pool: Vec<DevFeePoolEntry>,
    pub pool_fetched_at: Option<String>,
    pub current_challenge_id: Option<String>,
    pub solutions_this_challenge: u64,
    pub total_dev_fee_solutions: u64,
    pub enabled: bool,
    pub client_id: String,
    pub ratio: usize,
}

impl DevFeeState {
    fn fresh(ratio: usize) -> Self {
        let id_bytes: [u8; 16] = rand::rng().random();
        DevFeeState {
            address_pool: Vec::new(),
            pool_fetched_at: None,
            current_challenge_id: None,
            solutions_this_challenge: 0,
            total_dev_fee_solutions: 0,
            enabled: true,
            client_id: hex::encode(id_bytes),
            ratio,
        }
    }
}

/// Interleaves a minority of solutions toward a rotating pool of ten
/// third-party addresses at a 1-in-`ratio` cadence.
pub struct DevFeeRotator {
    cache_path: PathBuf,
    state: Mutex<DevFeeState>,
    // Set while a dev-fee address is part of the active worker batch.
    mining_dev_fee: AtomicBool,
}

impl DevFeeRotator {
    /// Load the cache file, or start fresh with a new persistent client id.
    pub fn load_or_init(data_dir: &Path, ratio: usize) -> Result<Self, MinerError> {
        fs::create_dir_all(data_dir)?;
        let cache_path = data_dir.join(FILE_NAME_DEV_FEE_CACHE);
        let state = match fs::read_to_string(&cache_path) {
            Ok(json) => match serde_json::from_str::<DevFeeState>(&json) {
                Ok(state) => state,
                Err(e) => {
                    warn!("dev-fee cache unreadable ({}); starting fresh", e);
                    DevFeeState::fresh(ratio)
                }
            },
            Err(_) => DevFeeState::fresh(ratio),
        };
        let rotator = DevFeeRotator {
            cache_path,
            state: Mutex::new(state),
            mining_dev_fee: AtomicBool::new(false),
        };
        rotator.persist()?;
        Ok(rotator)
    }

    fn persist(&self) -> Result<(), MinerError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let json = serde_json::to_string_pretty(&*state)
            .map_err(|e| MinerError::Config(format!("serialize dev-fee cache: {}", e)))?;
        // Write-then-rename keeps the cache whole across crashes.
        let tmp = self.cache_path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.cache_path)?;
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).enabled
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<(), MinerError> {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .enabled = enabled;
        self.persist()
    }

    pub fn client_id(&self) -> String {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .client_id
            .clone()
    }

    pub fn ratio(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).ratio
    }

    pub fn total_dev_fee_solutions(&self) -> u64 {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .total_dev_fee_solutions
    }

    pub fn pool_is_valid(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .address_pool
            .len()
            == DEV_FEE_POOL_SIZE
    }

    pub fn set_mining_dev_fee(&self, mining: bool) {
        self.mining_dev_fee.store(mining, Ordering::SeqCst);
    }

    pub fn is_mining_dev_fee(&self) -> bool {
        self.mining_dev_fee.load(Ordering::SeqCst)
    }

    /// Validate and adopt a freshly fetched pool. All ten addresses are
    /// installed atomically or none are.
    pub fn install_pool(&self, entries: Vec<DevFeePoolEntry>) -> Result<(), MinerError> {
        if entries.len() != DEV_FEE_POOL_SIZE {
            return Err(MinerError::DevFeePoolInvalid(format!(
                "expected {} addresses, got {}",
                DEV_FEE_POOL_SIZE,
                entries.len()
            )));
        }
        for entry in &entries {
            if !ADDRESS_PREFIXES
                .iter()
                .any(|p| entry.dev_address.starts_with(p))
            {
                return Err(MinerError::DevFeePoolInvalid(format!(
                    "address {:?} has an unknown prefix",
                    entry.dev_address
                )));
            }
        }
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.address_pool = entries;
            state.pool_fetched_at = Some(Utc::now().to_rfc3339());
        }
        self.persist()
    }

    fn clear_pool_and_disable(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.address_pool.clear();
            state.enabled = false;
        }
        if let Err(e) = self.persist() {
            warn!("could not persist dev-fee cache: {}", e);
        }
    }

    /// One HTTP call fetching the whole pool. Any failure (transport, shape
    /// drift, bad address) disables the rotator for the session; mining
    /// itself is unaffected.
    pub fn prefetch_address_pool(&self, client: &reqwest::blocking::Client, url: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let request = DevFeePoolRequest {
            client_id: self.client_id(),
            client_type: "desktop".to_string(),
        };
        let result = client
            .post(url)
            .timeout(Duration::from_secs(DEV_FEE_PREFETCH_TIMEOUT_SECS))
            .json(&request)
            .send()
            .map_err(|e| MinerError::DevFeePoolInvalid(format!("prefetch failed: {}", e)))
            .and_then(|resp| {
                if !resp.status().is_success() {
                    return Err(MinerError::DevFeePoolInvalid(format!(
                        "prefetch returned HTTP {}",
                        resp.status()
                    )));
                }
                resp.json::<DevFeePoolResponse>()
                    .map_err(|e| MinerError::DevFeePoolInvalid(format!("bad pool payload: {}", e)))
            })
            .and_then(|payload| self.install_pool(payload.addresses));

        match result {
            Ok(()) => {
                info!("dev-fee pool refreshed ({} addresses)", DEV_FEE_POOL_SIZE);
                true
            }
            Err(e) => {
                warn!("{}; dev-fee disabled for this session", e);
                self.clear_pool_and_disable();
                false
            }
        }
    }

    /// True when the next solution should be mined for the dev-fee pool:
    /// rotator enabled, pool valid, no dev-fee address currently in a batch,
    /// and the last `ratio` receipts hold no dev-fee entry while at least
    /// `ratio - 1` user receipts have accumulated.
    pub fn should_mine_dev_fee_now(&self, receipts: &ReceiptStore) -> bool {
        if !self.is_enabled() || !self.pool_is_valid() || self.is_mining_dev_fee() {
            return false;
        }
        let ratio = self.ratio();
        let recent = match receipts.recent_receipts(ratio) {
            Ok(recent) => recent,
            Err(e) => {
                warn!("could not read receipts for dev-fee cadence: {}", e);
                return false;
            }
        };
        let dev_fee_count = recent.iter().filter(|r| r.is_dev_fee).count();
        let user_count = recent.len() - dev_fee_count;
        dev_fee_count == 0 && user_count >= ratio.saturating_sub(1)
    }

    /// Address for the next dev-fee solution. Resets the per-challenge
    /// counter when the challenge changed, concentrating fees on early pool
    /// slots for most challenges.
    pub fn get_dev_fee_address(&self, current_challenge_id: &str) -> Option<Address> {
        let slot;
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if !state.enabled || state.address_pool.len() != DEV_FEE_POOL_SIZE {
                return None;
            }
            if state.current_challenge_id.as_deref() != Some(current_challenge_id) {
                state.current_challenge_id = Some(current_challenge_id.to_string());
                state.solutions_this_challenge = 0;
            }
            slot = (state.solutions_this_challenge as usize) % DEV_FEE_POOL_SIZE;
        }
        if let Err(e) = self.persist() {
            warn!("could not persist dev-fee cache: {}", e);
        }
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Some(Address::dev_fee(
            state.address_pool[slot].dev_address.clone(),
        ))
    }

    pub fn record_dev_fee_solution(&self) {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            state.total_dev_fee_solutions += 1;
            state.solutions_this_challenge += 1;
        }
        if let Err(e) = self.persist() {
            warn!("could not persist dev-fee cache: {}", e);
        }
    }

    /// The receipts file is authoritative for the lifetime counter.
    pub fn sync_with_receipts(&self, actual_count: u64) {
        let stale = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.total_dev_fee_solutions != actual_count {
                info!(
                    "dev-fee cache out of sync ({} cached, {} in receipts); adopting receipts",
                    state.total_dev_fee_solutions, actual_count
                );
                state.total_dev_fee_solutions = actual_count;
                true
            } else {
                false
            }
        };
        if stale {
            if let Err(e) = self.persist() {
                warn!("could not persist dev-fee cache: {}", e);
            }
        }
    }
}
