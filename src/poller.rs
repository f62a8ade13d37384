// src/poller.rs

use std::sync::atomic::Ordering;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::api::ScavengerService;
use crate::data_types::{Challenge, ChallengePhase, ChallengeResponse};
use crate::state::SharedState;

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Messages into the orchestrator's main loop, from the poller and from the
/// watchdog.
#[derive(Debug)]
pub enum ControlMsg {
    /// A different challenge id is now active.
    ChallengeTransition {
        previous: Option<String>,
        challenge: Challenge,
    },
    /// Same challenge id, changed mutable fields (difficulty and friends).
    DifficultyChanged {
        old_difficulty: String,
        challenge: Challenge,
    },
    /// The mining period is over.
    MiningEnded,
    /// The watchdog found stuck or misassigned workers.
    WatchdogRestart,
}

/// Pure per-tick classification, split out from the polling thread so the
/// transition rules are directly testable.
pub fn classify_tick(
    last_seen: Option<&Challenge>,
    response: &ChallengeResponse,
) -> Option<ControlMsg> {
    match response.phase() {
        Some(ChallengePhase::Before) => {
            info!(
                "mining period has not started yet (starts at {})",
                response.starts_at.as_deref().unwrap_or("unknown")
            );
            None
        }
        Some(ChallengePhase::After) => Some(ControlMsg::MiningEnded),
        Some(ChallengePhase::Active) => {
            let challenge = response.challenge.as_ref()?;
            match last_seen {
                Some(held) if held.challenge_id == challenge.challenge_id => {
                    if held.mutable_fields_differ(challenge) {
                        Some(ControlMsg::DifficultyChanged {
                            old_difficulty: held.difficulty.clone(),
                            challenge: challenge.clone(),
                        })
                    } else {
                        None
                    }
                }
                _ => Some(ControlMsg::ChallengeTransition {
                    previous: last_seen.map(|c| c.challenge_id.clone()),
                    challenge: challenge.clone(),
                }),
            }
        }
        None => {
            warn!("challenge endpoint returned unknown code {:?}", response.code);
            None
        }
    }
}

/// Periodic challenge watcher. Fetch errors are logged and skipped; the
/// poller only stops when the orchestrator shuts down or the period ends.
pub fn spawn_poller(
    api: Arc<dyn ScavengerService>,
    shared: Arc<SharedState>,
    tx: Sender<ControlMsg>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name("challenge-poller".to_string())
        .spawn(move || {
            let mut last_seen: Option<Challenge> = None;
            while shared.is_running.load(Ordering::SeqCst) {
                match api.fetch_challenge() {
                    Ok(response) => {
                        if let Some(msg) = classify_tick(last_seen.as_ref(), &response) {
                            let ended = matches!(msg, ControlMsg::MiningEnded);
                            if let ControlMsg::ChallengeTransition { challenge, .. }
                            | ControlMsg::DifficultyChanged { challenge, .. } = &msg
                            {
                                last_seen = Some(challenge.clone());
                            }
                            if tx.send(msg).is_err() || ended {
                                break;
                            }
                        } else {
                            debug!("challenge unchanged");
                        }
                    }
                    Err(e) => warn!("challenge poll failed: {}", e),
                }
                thread::sleep(POLL_INTERVAL);
            }
        })
        .expect("spawn challenge poller")
}
