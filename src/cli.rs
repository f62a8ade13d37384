// src/cli.rs

use clap::Parser;

use crate::config::GroupingMode;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The base URL for the Scavenger Mine API (e.g., https://scavenger.gd.midnighttge.io)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Path to the orchestrator config file.
    #[arg(long, default_value = "miner.json")]
    pub config: String,

    /// Wallet file holding the derived addresses and registration credentials.
    #[arg(long, default_value = "wallet.json")]
    pub wallet_file: String,

    /// Where to store receipts, the dev-fee cache and other state.
    #[arg(long)]
    pub data_dir: Option<String>,

    /// Number of mining workers to run.
    #[arg(long)]
    pub threads: Option<usize>,

    /// Nonces hashed per worker batch.
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// How workers are split across addresses: auto, all-on-one or grouped.
    #[arg(long)]
    pub grouping: Option<GroupingMode>,

    /// Workers per address in grouped mode.
    #[arg(long)]
    pub workers_per_address: Option<usize>,

    /// Submission attempts per address and challenge before giving up.
    #[arg(long)]
    pub max_submission_failures: Option<u32>,

    /// ROM size in MiB (smaller values are useful for smoke tests).
    #[arg(long)]
    pub rom_size_mb: Option<usize>,

    /// Endpoint serving the dev-fee address pool.
    #[arg(long)]
    pub dev_fee_url: Option<String>,

    /// Disable dev-fee mining for this session.
    #[arg(long)]
    pub no_dev_fee: bool,

    /// Accept the Token End User Agreement and continue mining without
    /// displaying the terms.
    #[arg(long, default_value_t = true)]
    pub accept_tos: bool,
}

impl Cli {
    /// CLI flags override whatever the config file says.
    pub fn apply_to(&self, config: &mut crate::config::MinerConfig) {
        if let Some(api_url) = &self.api_url {
            config.api_url = api_url.clone();
        }
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(threads) = self.threads {
            config.worker_threads = threads;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(grouping) = self.grouping {
            config.worker_grouping_mode = grouping;
        }
        if let Some(workers_per_address) = self.workers_per_address {
            config.workers_per_address = workers_per_address;
        }
        if let Some(max_failures) = self.max_submission_failures {
            config.max_submission_failures = max_failures;
        }
        if let Some(rom_size_mb) = self.rom_size_mb {
            config.rom_size_mb = rom_size_mb;
        }
        if let Some(dev_fee_url) = &self.dev_fee_url {
            config.dev_fee_url = Some(dev_fee_url.clone());
        }
    }
}
