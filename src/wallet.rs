// src/wallet.rs
//
// Key derivation and CIP-8 signing happen outside this process. The wallet
// file carries the derived addresses together with the pre-computed
// registration credentials the service expects.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::data_types::Address;
use crate::error::MinerError;

/// Signature material for `POST /register/{address}/{signature}/{publicKey}`.
#[derive(Debug, Clone)]
pub struct RegistrationCredentials {
    pub signature: String,
    pub public_key: String,
}

/// Read-only address provider plus registration bookkeeping.
pub trait Wallet: Send + Sync {
    fn addresses(&self) -> Vec<Address>;

    fn registration_credentials(
        &self,
        address: &str,
    ) -> Result<RegistrationCredentials, MinerError>;

    /// Persist the fact that the service accepted this address.
    fn mark_registered(&self, address: &str) -> Result<(), MinerError>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct WalletEntry {
    index: i32,
    bech32: String,
    public_key: String,
    #[serde(default)]
    registered: bool,
    registration_signature: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WalletFile {
    addresses: Vec<WalletEntry>,
}

/// JSON-file wallet. Single writer (this process); updated whole-file on
/// registration changes.
pub struct FileWallet {
    path: PathBuf,
    entries: Mutex<Vec<WalletEntry>>,
}

impl FileWallet {
    pub fn load(path: &Path) -> Result<Self, MinerError> {
        let json = fs::read_to_string(path)
            .map_err(|e| MinerError::Wallet(format!("cannot read wallet {:?}: {}", path, e)))?;
        let file: WalletFile = serde_json::from_str(&json)
            .map_err(|e| MinerError::Wallet(format!("bad wallet file {:?}: {}", path, e)))?;
        if file.addresses.is_empty() {
            return Err(MinerError::Wallet(format!(
                "wallet {:?} holds no addresses",
                path
            )));
        }
        for entry in &file.addresses {
            if entry.index < 0 {
                return Err(MinerError::Wallet(format!(
                    "wallet address {:?} has a negative index",
                    entry.bech32
                )));
            }
        }
        Ok(FileWallet {
            path: path.to_path_buf(),
            entries: Mutex::new(file.addresses),
        })
    }

    fn persist(&self, entries: &[WalletEntry]) -> Result<(), MinerError> {
        let file = WalletFile {
            addresses: entries.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| MinerError::Wallet(format!("serialize wallet: {}", e)))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Wallet for FileWallet {
    fn addresses(&self) -> Vec<Address> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|entry| Address {
                index: entry.index,
                bech32: entry.bech32.clone(),
                public_key: entry.public_key.clone(),
                registered: entry.registered,
            })
            .collect()
    }

    fn registration_credentials(
        &self,
        address: &str,
    ) -> Result<RegistrationCredentials, MinerError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|entry| entry.bech32 == address)
            .map(|entry| RegistrationCredentials {
                signature: entry.registration_signature.clone(),
                public_key: entry.public_key.clone(),
            })
            .ok_or_else(|| MinerError::Wallet(format!("unknown address {}", address)))
    }

    fn mark_registered(&self, address: &str) -> Result<(), MinerError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.iter_mut().find(|entry| entry.bech32 == address) {
            entry.registered = true;
        }
        self.persist(&entries)
    }
}
