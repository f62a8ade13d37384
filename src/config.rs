// src/config.rs

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::MinerError;

pub const DEFAULT_API_URL: &str = "https://scavenger.prod.gd.midnighttge.io";
pub const DEFAULT_BATCH_SIZE: usize = 300;
pub const DEFAULT_WORKERS_PER_ADDRESS: usize = 3;
pub const DEFAULT_MAX_SUBMISSION_FAILURES: u32 = 1;

/// How the orchestrator splits its worker pool across addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingMode {
    /// Pool-size-aware: everything on one address for small pools, a
    /// 3..=5-worker group size otherwise.
    Auto,
    /// The whole pool mines a single address at a time.
    AllOnOne,
    /// Fixed `workers_per_address` group size.
    Grouped,
}

impl Default for GroupingMode {
    fn default() -> Self {
        GroupingMode::Auto
    }
}

impl std::str::FromStr for GroupingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(GroupingMode::Auto),
            "all-on-one" => Ok(GroupingMode::AllOnOne),
            "grouped" => Ok(GroupingMode::Grouped),
            other => Err(format!(
                "unknown grouping mode {:?} (expected auto, all-on-one or grouped)",
                other
            )),
        }
    }
}

fn default_worker_threads() -> usize {
    num_cpus::get()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_workers_per_address() -> usize {
    DEFAULT_WORKERS_PER_ADDRESS
}

fn default_max_submission_failures() -> u32 {
    DEFAULT_MAX_SUBMISSION_FAILURES
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_data_dir() -> String {
    ".".to_string()
}

fn default_rom_size_mb() -> usize {
    1024
}

fn default_dev_fee_ratio() -> usize {
    crate::dev_fee::DEFAULT_DEV_FEE_RATIO
}

/// Persisted orchestrator configuration (`miner.json`). Unknown fields are
/// ignored so older files keep loading after upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub worker_grouping_mode: GroupingMode,
    #[serde(default = "default_workers_per_address")]
    pub workers_per_address: usize,
    #[serde(default = "default_max_submission_failures")]
    pub max_submission_failures: u32,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub dev_fee_url: Option<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_rom_size_mb")]
    pub rom_size_mb: usize,
    #[serde(default = "default_dev_fee_ratio")]
    pub dev_fee_ratio: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            worker_threads: default_worker_threads(),
            batch_size: default_batch_size(),
            worker_grouping_mode: GroupingMode::default(),
            workers_per_address: default_workers_per_address(),
            max_submission_failures: default_max_submission_failures(),
            api_url: default_api_url(),
            dev_fee_url: None,
            data_dir: default_data_dir(),
            rom_size_mb: default_rom_size_mb(),
            dev_fee_ratio: default_dev_fee_ratio(),
        }
    }
}

impl MinerConfig {
    /// Read the config file, writing defaults when it does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, MinerError> {
        if path.exists() {
            let json = fs::read_to_string(path)?;
            serde_json::from_str(&json)
                .map_err(|e| MinerError::Config(format!("bad config {:?}: {}", path, e)))
        } else {
            let config = MinerConfig::default();
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let json = serde_json::to_string_pretty(&config)
                .map_err(|e| MinerError::Config(format!("serialize config: {}", e)))?;
            fs::write(path, json)?;
            info!("wrote default config to {:?}", path);
            Ok(config)
        }
    }
}
