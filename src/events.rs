// src/events.rs

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::data_types::WorkerStats;

/// Typed event stream for an optional observer (stats printer, UI bridge).
/// The mining core never depends on a consumer being attached.
#[derive(Debug, Clone)]
pub enum MinerEvent {
    ChallengeStarted {
        challenge_id: String,
        difficulty: String,
        zero_bits: u32,
    },
    WorkerUpdate(WorkerStats),
    SolutionFound {
        worker_id: usize,
        address: String,
        challenge_id: String,
        nonce: String,
        is_dev_fee: bool,
    },
    SolutionSubmitted {
        address: String,
        challenge_id: String,
        is_dev_fee: bool,
    },
    SubmissionFailed {
        address: String,
        challenge_id: String,
        error: String,
    },
    MiningStopped,
}

pub struct EventBus {
    sink: Mutex<Option<Sender<MinerEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        EventBus {
            sink: Mutex::new(None),
        }
    }

    pub fn attach(&self, sender: Sender<MinerEvent>) {
        *self.sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(sender);
    }

    /// Best-effort delivery; a hung or dropped observer detaches itself.
    pub fn emit(&self, event: MinerEvent) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = sink.as_ref() {
            if sender.send(event).is_err() {
                *sink = None;
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}
