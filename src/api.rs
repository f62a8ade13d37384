// src/api.rs

use std::time::Duration;

use log::debug;
use reqwest::blocking::Client;
use reqwest::StatusCode;

use crate::data_types::{ApiErrorResponse, ChallengeResponse, SolutionReceipt, TandCResponse};
use crate::error::MinerError;

pub const CHALLENGE_TIMEOUT_SECS: u64 = 30;
pub const TANDC_TIMEOUT_SECS: u64 = 30;
pub const REGISTRATION_TIMEOUT_SECS: u64 = 30;
pub const SUBMISSION_TIMEOUT_SECS: u64 = 60;

/// Scavenger service surface the orchestrator mines against. Implemented
/// over HTTP in production and by in-memory fakes in tests.
pub trait ScavengerService: Send + Sync {
    fn fetch_challenge(&self) -> Result<ChallengeResponse, MinerError>;

    fn fetch_tandc(&self) -> Result<TandCResponse, MinerError>;

    fn register_address(
        &self,
        address: &str,
        signature: &str,
        public_key_hex: &str,
    ) -> Result<(), MinerError>;

    fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SolutionReceipt, MinerError>;
}

pub struct HttpScavengerService {
    client: Client,
    base_url: String,
}

impl HttpScavengerService {
    pub fn new(base_url: &str) -> Result<Self, MinerError> {
        let client = Client::builder()
            .build()
            .map_err(|e| MinerError::Api(format!("http client init: {}", e)))?;
        Ok(HttpScavengerService {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// Pull the server's complaint out of an error body, which may be JSON
/// (`message`/`error` fields) or plain text.
fn error_message(body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ApiErrorResponse>(body) {
        if let Some(message) = parsed.message.or(parsed.error) {
            return message;
        }
    }
    body.trim().to_string()
}

/// Classify a non-2xx submission response into the error taxonomy. Exposed
/// for tests; the policy lives in the submission pipeline.
pub fn classify_submission_response(
    status: StatusCode,
    body: &str,
    address: &str,
    challenge_id: &str,
) -> MinerError {
    let message = error_message(body);
    let lowered = message.to_lowercase();
    if lowered.contains("already exists") || lowered.contains("duplicate") {
        return MinerError::DuplicateSolution {
            address: address.to_string(),
            challenge_id: challenge_id.to_string(),
        };
    }
    if status == StatusCode::FORBIDDEN
        || lowered.contains("not registered")
        || lowered.contains("unregistered")
    {
        return MinerError::AddressUnregistered {
            address: address.to_string(),
        };
    }
    MinerError::SubmissionRejected(format!("HTTP {}: {}", status.as_u16(), message))
}

fn map_send_error(e: reqwest::Error, timeout_secs: u64, submitting: bool) -> MinerError {
    if e.is_timeout() {
        if submitting {
            MinerError::SubmissionTimeout(timeout_secs)
        } else {
            MinerError::Api(format!("request timed out after {} s", timeout_secs))
        }
    } else if submitting {
        MinerError::SubmissionRejected(format!("network error: {}", e))
    } else {
        MinerError::Api(format!("request failed: {}", e))
    }
}

impl ScavengerService for HttpScavengerService {
    fn fetch_challenge(&self) -> Result<ChallengeResponse, MinerError> {
        let url = format!("{}/challenge", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(CHALLENGE_TIMEOUT_SECS))
            .send()
            .map_err(|e| map_send_error(e, CHALLENGE_TIMEOUT_SECS, false))?;
        if !resp.status().is_success() {
            return Err(MinerError::Api(format!(
                "GET /challenge returned HTTP {}",
                resp.status()
            )));
        }
        resp.json::<ChallengeResponse>()
            .map_err(|e| MinerError::Api(format!("bad challenge payload: {}", e)))
    }

    fn fetch_tandc(&self) -> Result<TandCResponse, MinerError> {
        let url = format!("{}/TandC", self.base_url);
        let resp = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(TANDC_TIMEOUT_SECS))
            .send()
            .map_err(|e| map_send_error(e, TANDC_TIMEOUT_SECS, false))?;
        if !resp.status().is_success() {
            return Err(MinerError::Api(format!(
                "GET /TandC returned HTTP {}",
                resp.status()
            )));
        }
        resp.json::<TandCResponse>()
            .map_err(|e| MinerError::Api(format!("bad TandC payload: {}", e)))
    }

    fn register_address(
        &self,
        address: &str,
        signature: &str,
        public_key_hex: &str,
    ) -> Result<(), MinerError> {
        let url = format!(
            "{}/register/{}/{}/{}",
            self.base_url, address, signature, public_key_hex
        );
        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(REGISTRATION_TIMEOUT_SECS))
            .send()
            .map_err(|e| map_send_error(e, REGISTRATION_TIMEOUT_SECS, false))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().unwrap_or_default();
        let message = error_message(&body);
        // An existing registration comes back as 4xx; that address is usable.
        if status.is_client_error() && message.to_lowercase().contains("already") {
            debug!("address {} already registered", address);
            return Ok(());
        }
        Err(MinerError::Api(format!(
            "registration failed with HTTP {}: {}",
            status.as_u16(),
            message
        )))
    }

    fn submit_solution(
        &self,
        address: &str,
        challenge_id: &str,
        nonce: &str,
    ) -> Result<SolutionReceipt, MinerError> {
        let url = format!(
            "{}/solution/{}/{}/{}",
            self.base_url, address, challenge_id, nonce
        );
        let resp = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(SUBMISSION_TIMEOUT_SECS))
            .send()
            .map_err(|e| map_send_error(e, SUBMISSION_TIMEOUT_SECS, true))?;
        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<SolutionReceipt>()
                .map_err(|e| MinerError::SubmissionRejected(format!("bad receipt payload: {}", e)));
        }
        let body = resp.text().unwrap_or_default();
        Err(classify_submission_response(
            status,
            &body,
            address,
            challenge_id,
        ))
    }
}
