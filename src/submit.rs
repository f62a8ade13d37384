// src/submit.rs

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};

use crate::api::ScavengerService;
use crate::data_types::{Address, ErrorEntry, ReceiptEntry};
use crate::dev_fee::DevFeeRotator;
use crate::error::MinerError;
use crate::events::{EventBus, MinerEvent};
use crate::receipts::ReceiptStore;
use crate::state::SharedState;
use crate::wallet::Wallet;

/// Submission pipeline shared by all workers: POSTs the solution, classifies
/// failures, persists receipts and error entries, and keeps the solved set
/// and counters consistent.
pub struct Submitter {
    api: Arc<dyn ScavengerService>,
    wallet: Arc<dyn Wallet>,
    receipts: Arc<ReceiptStore>,
    dev_fee: Arc<DevFeeRotator>,
    shared: Arc<SharedState>,
    events: Arc<EventBus>,
}

impl Submitter {
    pub fn new(
        api: Arc<dyn ScavengerService>,
        wallet: Arc<dyn Wallet>,
        receipts: Arc<ReceiptStore>,
        dev_fee: Arc<DevFeeRotator>,
        shared: Arc<SharedState>,
        events: Arc<EventBus>,
    ) -> Self {
        Submitter {
            api,
            wallet,
            receipts,
            dev_fee,
            shared,
            events,
        }
    }

    pub fn submit_solution(
        &self,
        address: &Address,
        challenge_id: &str,
        nonce_hex: &str,
        hash_hex: &str,
    ) -> Result<(), MinerError> {
        self.submit_inner(address, challenge_id, nonce_hex, hash_hex, false)
    }

    fn submit_inner(
        &self,
        address: &Address,
        challenge_id: &str,
        nonce_hex: &str,
        hash_hex: &str,
        is_retry: bool,
    ) -> Result<(), MinerError> {
        match self
            .api
            .submit_solution(&address.bech32, challenge_id, nonce_hex)
        {
            Ok(receipt) => {
                self.record_success(
                    address,
                    challenge_id,
                    nonce_hex,
                    hash_hex,
                    Some(receipt.crypto_receipt),
                );
                Ok(())
            }
            Err(MinerError::DuplicateSolution { .. }) => {
                // The server already holds one for this pair; locally that is
                // a success, minus the receipt.
                info!(
                    "solution for {} on {} already exists server-side",
                    address.bech32, challenge_id
                );
                self.shared.mark_solved(&address.bech32, challenge_id);
                self.shared
                    .clear_submission_failures(&address.bech32, challenge_id);
                self.append_error_entry(
                    address,
                    challenge_id,
                    Some(nonce_hex),
                    Some(hash_hex),
                    "benign duplicate: solution already accepted by the service",
                );
                Ok(())
            }
            Err(MinerError::AddressUnregistered { .. }) if !is_retry && !address.is_dev_fee() => {
                warn!(
                    "address {} rejected as unregistered; attempting registration",
                    address.bech32
                );
                match self.register(address) {
                    Ok(()) => self.submit_inner(address, challenge_id, nonce_hex, hash_hex, true),
                    Err(e) => {
                        self.append_error_entry(
                            address,
                            challenge_id,
                            Some(nonce_hex),
                            Some(hash_hex),
                            &format!("auto-registration failed: {}", e),
                        );
                        Err(MinerError::AddressUnregistered {
                            address: address.bech32.clone(),
                        })
                    }
                }
            }
            Err(e) => {
                let note = match &e {
                    MinerError::SubmissionTimeout(secs) => format!(
                        "submission timed out after {} s; acceptance state uncertain",
                        secs
                    ),
                    other => other.to_string(),
                };
                self.append_error_entry(
                    address,
                    challenge_id,
                    Some(nonce_hex),
                    Some(hash_hex),
                    &note,
                );
                self.events.emit(MinerEvent::SubmissionFailed {
                    address: address.bech32.clone(),
                    challenge_id: challenge_id.to_string(),
                    error: note,
                });
                Err(e)
            }
        }
    }

    fn register(&self, address: &Address) -> Result<(), MinerError> {
        let creds = self.wallet.registration_credentials(&address.bech32)?;
        self.api
            .register_address(&address.bech32, &creds.signature, &creds.public_key)?;
        self.wallet.mark_registered(&address.bech32)
    }

    fn record_success(
        &self,
        address: &Address,
        challenge_id: &str,
        nonce_hex: &str,
        hash_hex: &str,
        crypto_receipt: Option<serde_json::Value>,
    ) {
        if address.is_dev_fee() {
            self.dev_fee.record_dev_fee_solution();
        } else {
            self.shared.user_solutions.fetch_add(1, Ordering::SeqCst);
        }

        let entry = ReceiptEntry {
            ts: Utc::now().to_rfc3339(),
            address: address.bech32.clone(),
            address_index: address.index,
            challenge_id: challenge_id.to_string(),
            nonce: nonce_hex.to_string(),
            hash: hash_hex.to_string(),
            crypto_receipt,
            is_dev_fee: address.is_dev_fee(),
        };
        if let Err(e) = self.receipts.append_receipt(&entry) {
            // A lost line is recoverable; never abort mining over it.
            warn!("could not append receipt: {}", e);
        }

        // Solved only becomes visible after the submission succeeded and the
        // receipt was attempted.
        self.shared.mark_solved(&address.bech32, challenge_id);
        self.shared
            .clear_submission_failures(&address.bech32, challenge_id);

        info!(
            "✅ solution accepted for {} on {} (nonce {}{})",
            address.bech32,
            challenge_id,
            nonce_hex,
            if address.is_dev_fee() { ", dev-fee" } else { "" }
        );
        self.events.emit(MinerEvent::SolutionSubmitted {
            address: address.bech32.clone(),
            challenge_id: challenge_id.to_string(),
            is_dev_fee: address.is_dev_fee(),
        });
    }

    fn append_error_entry(
        &self,
        address: &Address,
        challenge_id: &str,
        nonce: Option<&str>,
        hash: Option<&str>,
        error: &str,
    ) {
        let entry = ErrorEntry {
            ts: Utc::now().to_rfc3339(),
            address: address.bech32.clone(),
            challenge_id: challenge_id.to_string(),
            nonce: nonce.map(str::to_string),
            hash: hash.map(str::to_string),
            error: error.to_string(),
        };
        if let Err(e) = self.receipts.append_error(&entry) {
            warn!("could not append error entry: {}", e);
        }
    }
}
