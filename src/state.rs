// src/state.rs

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::RwLock;

use dashmap::{DashMap, DashSet};

use crate::data_types::{Challenge, WorkerStats};

/// Coordination state shared between the orchestrator, the poller, the
/// watchdog and every worker. The hot path (hashing) never takes a lock
/// here; workers only touch it at batch boundaries and around submission.
pub struct SharedState {
    pub is_running: AtomicBool,
    pub is_mining: AtomicBool,
    /// True between spawning a worker batch and joining it; gates the
    /// watchdog restart.
    pub batch_in_progress: AtomicBool,

    current_challenge: RwLock<Option<Challenge>>,

    /// address -> challenge ids already solved in this process (or found in
    /// the receipts log). Entries are never removed.
    solved: DashMap<String, HashSet<String>>,
    /// Hashes already POSTed, across all workers.
    pub submitted_hashes: DashSet<String>,
    /// `address:challenge_id` keys with a submission in flight.
    submitting: DashSet<String>,
    /// Subset of `submitting` used to park sibling worker loops.
    paused: DashSet<String>,
    /// Workers asked to exit because a sibling on the same address won.
    pub stopped_workers: DashSet<usize>,
    /// `address:challenge_id` -> failed submission attempts.
    submission_failures: DashMap<String, u32>,
    pub worker_stats: DashMap<usize, WorkerStats>,

    pub user_solutions: AtomicU64,
}

pub fn submission_key(address: &str, challenge_id: &str) -> String {
    format!("{}:{}", address, challenge_id)
}

impl SharedState {
    pub fn new() -> Self {
        SharedState {
            is_running: AtomicBool::new(true),
            is_mining: AtomicBool::new(false),
            batch_in_progress: AtomicBool::new(false),
            current_challenge: RwLock::new(None),
            solved: DashMap::new(),
            submitted_hashes: DashSet::new(),
            submitting: DashSet::new(),
            paused: DashSet::new(),
            stopped_workers: DashSet::new(),
            submission_failures: DashMap::new(),
            worker_stats: DashMap::new(),
            user_solutions: AtomicU64::new(0),
        }
    }

    // --- challenge snapshot ---

    pub fn current_challenge(&self) -> Option<Challenge> {
        self.current_challenge
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_current_challenge(&self, challenge: Option<Challenge>) {
        *self
            .current_challenge
            .write()
            .unwrap_or_else(|e| e.into_inner()) = challenge;
    }

    pub fn current_challenge_id(&self) -> Option<String> {
        self.current_challenge
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|c| c.challenge_id.clone())
    }

    // --- solved set (monotone) ---

    pub fn mark_solved(&self, address: &str, challenge_id: &str) {
        self.solved
            .entry(address.to_string())
            .or_default()
            .insert(challenge_id.to_string());
    }

    pub fn is_solved(&self, address: &str, challenge_id: &str) -> bool {
        self.solved
            .get(address)
            .map(|set| set.contains(challenge_id))
            .unwrap_or(false)
    }

    pub fn solved_count_for(&self, challenge_id: &str) -> usize {
        self.solved
            .iter()
            .filter(|entry| entry.value().contains(challenge_id))
            .count()
    }

    // --- submission arbitration ---

    /// Atomic test-and-set on the in-flight submission key. Only the winner
    /// proceeds to submit; it must call `end_submission` afterwards.
    pub fn try_begin_submission(&self, address: &str, challenge_id: &str) -> bool {
        let key = submission_key(address, challenge_id);
        if self.submitting.insert(key.clone()) {
            self.paused.insert(key);
            true
        } else {
            false
        }
    }

    pub fn is_submitting(&self, address: &str, challenge_id: &str) -> bool {
        self.submitting
            .contains(&submission_key(address, challenge_id))
    }

    pub fn end_submission(&self, address: &str, challenge_id: &str) {
        let key = submission_key(address, challenge_id);
        self.paused.remove(&key);
        self.submitting.remove(&key);
    }

    pub fn is_paused(&self, address: &str, challenge_id: &str) -> bool {
        self.paused.contains(&submission_key(address, challenge_id))
    }

    // --- failure accounting ---

    pub fn submission_failures(&self, address: &str, challenge_id: &str) -> u32 {
        self.submission_failures
            .get(&submission_key(address, challenge_id))
            .map(|count| *count)
            .unwrap_or(0)
    }

    pub fn record_submission_failure(&self, address: &str, challenge_id: &str) -> u32 {
        let mut entry = self
            .submission_failures
            .entry(submission_key(address, challenge_id))
            .or_insert(0);
        *entry += 1;
        *entry
    }

    pub fn clear_submission_failures(&self, address: &str, challenge_id: &str) {
        self.submission_failures
            .remove(&submission_key(address, challenge_id));
    }

    // --- sibling stop requests ---

    /// Ask every other worker currently mining `address` to exit at its next
    /// batch boundary.
    pub fn stop_siblings(&self, winner_id: usize, address: &str) {
        for entry in self.worker_stats.iter() {
            if entry.key() != &winner_id && entry.value().address == address {
                self.stopped_workers.insert(*entry.key());
            }
        }
    }

    pub fn clear_stop_requests_for(&self, address: &str) {
        for entry in self.worker_stats.iter() {
            if entry.value().address == address {
                self.stopped_workers.remove(entry.key());
            }
        }
    }

    /// Worker-scoped state wiped on challenge transitions and resets.
    pub fn clear_worker_state(&self) {
        self.worker_stats.clear();
        self.paused.clear();
        self.submitting.clear();
        self.stopped_workers.clear();
    }
}

impl Default for SharedState {
    fn default() -> Self {
        SharedState::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::Address;

    fn address(i: i32) -> Address {
        Address {
            index: i,
            bech32: format!("addr1q{:03}", i),
            public_key: String::new(),
            registered: true,
        }
    }

    #[test]
    fn submission_arbitration_has_a_single_winner() {
        let state = SharedState::new();
        assert!(state.try_begin_submission("addr1q000", "D01C01"));
        assert!(!state.try_begin_submission("addr1q000", "D01C01"));
        assert!(state.is_paused("addr1q000", "D01C01"));

        // Different pair is independent.
        assert!(state.try_begin_submission("addr1q000", "D01C02"));

        state.end_submission("addr1q000", "D01C01");
        assert!(!state.is_submitting("addr1q000", "D01C01"));
        assert!(state.try_begin_submission("addr1q000", "D01C01"));
    }

    #[test]
    fn solved_set_is_monotone_per_pair() {
        let state = SharedState::new();
        assert!(!state.is_solved("addr1q000", "D01C01"));
        state.mark_solved("addr1q000", "D01C01");
        state.mark_solved("addr1q000", "D01C01");
        assert!(state.is_solved("addr1q000", "D01C01"));
        assert!(!state.is_solved("addr1q000", "D01C02"));
        assert_eq!(state.solved_count_for("D01C01"), 1);
    }

    #[test]
    fn failure_counter_rises_and_clears() {
        let state = SharedState::new();
        assert_eq!(state.submission_failures("a", "c"), 0);
        assert_eq!(state.record_submission_failure("a", "c"), 1);
        assert_eq!(state.record_submission_failure("a", "c"), 2);
        state.clear_submission_failures("a", "c");
        assert_eq!(state.submission_failures("a", "c"), 0);
    }

    #[test]
    fn sibling_stop_targets_only_the_same_address() {
        let state = SharedState::new();
        let a = address(0);
        let b = address(1);
        state
            .worker_stats
            .insert(0, WorkerStats::new(0, &a, "D01C01"));
        state
            .worker_stats
            .insert(1, WorkerStats::new(1, &a, "D01C01"));
        state
            .worker_stats
            .insert(2, WorkerStats::new(2, &b, "D01C01"));

        state.stop_siblings(0, &a.bech32);
        assert!(!state.stopped_workers.contains(&0));
        assert!(state.stopped_workers.contains(&1));
        assert!(!state.stopped_workers.contains(&2));

        state.clear_stop_requests_for(&a.bech32);
        assert!(!state.stopped_workers.contains(&1));
    }
}
