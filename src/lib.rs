pub mod api;
pub mod cli;
pub mod config;
pub mod data_types;
pub mod dev_fee;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod events;
pub mod grouping;
pub mod orchestrator;
pub mod poller;
pub mod preimage;
pub mod receipts;
pub mod rom;
pub mod state;
pub mod submit;
pub mod wallet;
pub mod worker;

pub use data_types::{Address, Challenge, ReceiptEntry, WorkerStats, WorkerStatus};
pub use difficulty::{matches_difficulty, DifficultyMask};
pub use engine::{EngineConfig, HashBackend, InProcessEngine};
pub use error::MinerError;
pub use orchestrator::Orchestrator;
pub use preimage::{build_preimage, nonce_hex};
pub use rom::{hprime, keyed_hash, Rom, RomDigest};
