// src/engine.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use rayon::prelude::*;

use crate::error::MinerError;
use crate::rom::{keyed_hash, Rom};

pub const ROM_INIT_TIMEOUT_SECS: u64 = 60;

/// Batch-hash driver contract. The orchestrator must not call `init_rom`
/// concurrently with `hash_batch`; everything else may be called from any
/// worker thread.
pub trait HashBackend: Send + Sync {
    /// Idempotent; blocks until the ROM for `no_pre_mine` is ready or the
    /// init deadline passes.
    fn init_rom(&self, no_pre_mine: &str) -> Result<(), MinerError>;

    fn is_rom_ready(&self) -> bool;

    /// Output length equals input length and output ordering matches input
    /// ordering; callers may rely on the position index.
    fn hash_batch(&self, preimages: &[Vec<u8>]) -> Result<Vec<[u8; 64]>, MinerError>;

    /// Tear down internal worker state so a fresh `init_rom` can proceed.
    fn kill_workers(&self);
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rom_size: usize,
    pub pre_size: usize,
    pub mixing_numbers: usize,
    pub nb_loops: u32,
    pub init_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        const MB: usize = 1024 * 1024;
        EngineConfig {
            rom_size: 1024 * MB,
            pre_size: 16 * MB,
            mixing_numbers: 4,
            nb_loops: 8,
            init_timeout: Duration::from_secs(ROM_INIT_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    /// Small ROM suitable for tests and smoke runs.
    pub fn small() -> Self {
        const KB: usize = 1024;
        EngineConfig {
            rom_size: 1024 * KB,
            pre_size: 64 * KB,
            mixing_numbers: 4,
            nb_loops: 8,
            init_timeout: Duration::from_secs(ROM_INIT_TIMEOUT_SECS),
        }
    }
}

struct EngineInner {
    rom: RwLock<Option<Arc<Rom>>>,
    // Key the current ROM (or in-flight build) was made for.
    rom_key: Mutex<Option<String>>,
    building: AtomicBool,
    abort_wait: AtomicBool,
}

/// In-process hash engine. Holds one ROM keyed by `no_pre_mine` and fans
/// each batch across the rayon thread pool.
pub struct InProcessEngine {
    cfg: EngineConfig,
    inner: Arc<EngineInner>,
}

impl InProcessEngine {
    pub fn new(cfg: EngineConfig) -> Self {
        InProcessEngine {
            cfg,
            inner: Arc::new(EngineInner {
                rom: RwLock::new(None),
                rom_key: Mutex::new(None),
                building: AtomicBool::new(false),
                abort_wait: AtomicBool::new(false),
            }),
        }
    }

    fn current_rom(&self) -> Option<Arc<Rom>> {
        self.inner.rom.read().ok().and_then(|guard| guard.clone())
    }
}

impl HashBackend for InProcessEngine {
    fn init_rom(&self, no_pre_mine: &str) -> Result<(), MinerError> {
        {
            let key = self
                .inner
                .rom_key
                .lock()
                .map_err(|_| MinerError::TransientBackend("engine lock poisoned".into()))?;
            if key.as_deref() == Some(no_pre_mine)
                && self.current_rom().is_some()
                && !self.inner.building.load(Ordering::SeqCst)
            {
                return Ok(());
            }
        }

        if !self.inner.building.swap(true, Ordering::SeqCst) {
            // We own this build. Drop the old ROM first so peak memory stays
            // at one ROM.
            {
                let mut key = self
                    .inner
                    .rom_key
                    .lock()
                    .map_err(|_| MinerError::TransientBackend("engine lock poisoned".into()))?;
                *key = Some(no_pre_mine.to_string());
            }
            if let Ok(mut slot) = self.inner.rom.write() {
                *slot = None;
            }
            self.inner.abort_wait.store(false, Ordering::SeqCst);

            let key = no_pre_mine.to_string();
            let cfg = self.cfg.clone();
            let inner = Arc::clone(&self.inner);
            info!(
                "initializing ROM ({} MiB) for key {}...",
                cfg.rom_size / (1024 * 1024),
                &key[..16.min(key.len())]
            );
            thread::spawn(move || {
                let start = Instant::now();
                let rom = Rom::new(key.as_bytes(), cfg.pre_size, cfg.mixing_numbers, cfg.rom_size);
                info!(
                    "ROM ready in {:.1}s ({})",
                    start.elapsed().as_secs_f64(),
                    rom.digest
                );
                if let Ok(mut slot) = inner.rom.write() {
                    *slot = Some(Arc::new(rom));
                }
                inner.building.store(false, Ordering::SeqCst);
            });
        }

        // Block until the build (ours or a concurrent caller's) finishes.
        let deadline = Instant::now() + self.cfg.init_timeout;
        while self.inner.building.load(Ordering::SeqCst) {
            if self.inner.abort_wait.load(Ordering::SeqCst) {
                return Err(MinerError::RomInitTimeout(self.cfg.init_timeout.as_secs()));
            }
            if Instant::now() >= deadline {
                warn!("ROM init exceeded {} s", self.cfg.init_timeout.as_secs());
                return Err(MinerError::RomInitTimeout(self.cfg.init_timeout.as_secs()));
            }
            thread::sleep(Duration::from_millis(100));
        }

        if self.current_rom().is_some() {
            Ok(())
        } else {
            Err(MinerError::RomInitTimeout(self.cfg.init_timeout.as_secs()))
        }
    }

    fn is_rom_ready(&self) -> bool {
        !self.inner.building.load(Ordering::SeqCst) && self.current_rom().is_some()
    }

    fn hash_batch(&self, preimages: &[Vec<u8>]) -> Result<Vec<[u8; 64]>, MinerError> {
        let rom = match self.current_rom() {
            Some(rom) => rom,
            None => {
                return Err(MinerError::TransientBackend(
                    "ROM not initialized".to_string(),
                ))
            }
        };

        let nb_loops = self.cfg.nb_loops;
        // rayon's collect preserves input order.
        Ok(preimages
            .par_iter()
            .map(|preimage| keyed_hash(preimage, &rom, nb_loops))
            .collect())
    }

    fn kill_workers(&self) {
        // Hashing itself is cooperative; what needs tearing down is anyone
        // still blocked waiting on an init that the transition obsoleted.
        self.inner.abort_wait.store(true, Ordering::SeqCst);
    }
}
