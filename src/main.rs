// src/main.rs

use std::path::Path;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use night_harvester::api::HttpScavengerService;
use night_harvester::cli::Cli;
use night_harvester::config::MinerConfig;
use night_harvester::dev_fee::DevFeeRotator;
use night_harvester::engine::{EngineConfig, InProcessEngine};
use night_harvester::events::{EventBus, MinerEvent};
use night_harvester::receipts::ReceiptStore;
use night_harvester::wallet::FileWallet;
use night_harvester::{MinerError, Orchestrator};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("fatal: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), MinerError> {
    let cli = Cli::parse();
    let mut config = MinerConfig::load_or_create(Path::new(&cli.config))?;
    cli.apply_to(&mut config);

    println!("==============================================");
    println!("⛏️  Night Harvester");
    println!("==============================================");
    println!("API:      {}", config.api_url);
    println!("Workers:  {}", config.worker_threads);
    println!("Batch:    {} nonces", config.batch_size);
    println!("Grouping: {:?}", config.worker_grouping_mode);

    let data_dir = Path::new(&config.data_dir);
    let wallet = Arc::new(FileWallet::load(Path::new(&cli.wallet_file))?);
    let receipts = Arc::new(ReceiptStore::open(data_dir)?);
    let dev_fee = Arc::new(DevFeeRotator::load_or_init(data_dir, config.dev_fee_ratio)?);
    if cli.no_dev_fee {
        dev_fee.set_enabled(false)?;
        info!("dev-fee mining disabled by flag");
    }

    let engine_config = EngineConfig {
        rom_size: config.rom_size_mb * 1024 * 1024,
        ..EngineConfig::default()
    };
    let engine = Arc::new(InProcessEngine::new(engine_config));
    let api = Arc::new(HttpScavengerService::new(&config.api_url)?);

    let events = Arc::new(EventBus::new());
    spawn_event_logger(&events);

    let orchestrator = Orchestrator::new(
        config,
        api,
        engine,
        wallet,
        receipts,
        dev_fee,
        events,
    );
    orchestrator.run()
}

/// Default observer: turns the event stream into periodic progress lines.
fn spawn_event_logger(events: &EventBus) {
    let (tx, rx) = mpsc::channel::<MinerEvent>();
    events.attach(tx);
    thread::spawn(move || {
        let mut last_rate_print = std::time::Instant::now();
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(MinerEvent::WorkerUpdate(stats)) => {
                    if last_rate_print.elapsed() >= Duration::from_secs(30) {
                        info!(
                            "worker {} on {}: {:.0} H/s, {} hashes",
                            stats.worker_id, stats.address, stats.hash_rate, stats.hashes_computed
                        );
                        last_rate_print = std::time::Instant::now();
                    }
                }
                Ok(MinerEvent::SolutionFound {
                    worker_id,
                    address,
                    nonce,
                    ..
                }) => {
                    println!("🚀 worker {} found a nonce for {}: {}", worker_id, address, nonce);
                }
                Ok(MinerEvent::SolutionSubmitted {
                    address,
                    challenge_id,
                    is_dev_fee,
                }) => {
                    println!(
                        "✅ solution accepted for {} on {}{}",
                        address,
                        challenge_id,
                        if is_dev_fee { " (dev-fee)" } else { "" }
                    );
                }
                Ok(MinerEvent::SubmissionFailed { address, error, .. }) => {
                    warn!("submission for {} failed: {}", address, error);
                }
                Ok(MinerEvent::ChallengeStarted { challenge_id, .. }) => {
                    info!("mining challenge {}", challenge_id);
                }
                Ok(MinerEvent::MiningStopped) => {}
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });
}
