// src/error.rs

use thiserror::Error;

/// Classified error kinds crossing component boundaries. Workers and the
/// orchestrator decide retry/abort policy from the variant, never from
/// string matching.
#[derive(Debug, Error)]
pub enum MinerError {
    /// Hash backend momentarily unavailable (busy, ROM swap in progress,
    /// transport hiccup). Retried locally after a short back-off.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Hash backend gave up on a batch.
    #[error("backend timed out: {0}")]
    BackendTimeout(String),

    #[error("ROM did not become ready within {0} s")]
    RomInitTimeout(u64),

    /// The challenge changed while a batch was in flight. The batch is
    /// discarded and the worker exits.
    #[error("challenge changed mid-batch ({held} -> {current})")]
    ChallengeStale { held: String, current: String },

    /// The solution no longer dominates the live difficulty mask. Discarded
    /// silently; never counted as a submission failure.
    #[error("difficulty increased during submission validation")]
    DifficultyIncreased,

    /// Server already holds a solution for this (address, challenge) pair.
    /// Treated as success by the submission pipeline.
    #[error("solution already exists for {address} on {challenge_id}")]
    DuplicateSolution {
        address: String,
        challenge_id: String,
    },

    #[error("address {address} is not registered")]
    AddressUnregistered { address: String },

    /// POST /solution timed out; the server may or may not have accepted it.
    #[error("submission timed out after {0} s (state uncertain)")]
    SubmissionTimeout(u64),

    #[error("submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("dev-fee pool invalid: {0}")]
    DevFeePoolInvalid(String),

    #[error("receipts i/o: {0}")]
    ReceiptsIo(#[from] std::io::Error),

    #[error("API request failed: {0}")]
    Api(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("wallet error: {0}")]
    Wallet(String),
}

impl MinerError {
    /// Whether a failed submission attempt counts against the per-address
    /// failure budget. Benign or retry-locally kinds do not.
    pub fn counts_as_submission_failure(&self) -> bool {
        match self {
            MinerError::SubmissionTimeout(_)
            | MinerError::SubmissionRejected(_)
            | MinerError::AddressUnregistered { .. }
            | MinerError::Api(_) => true,
            _ => false,
        }
    }

    pub fn is_transient_backend(&self) -> bool {
        matches!(
            self,
            MinerError::TransientBackend(_) | MinerError::BackendTimeout(_)
        )
    }
}
