// src/receipts.rs

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::warn;

use crate::data_types::{ErrorEntry, ReceiptEntry};
use crate::error::MinerError;

pub const FILE_NAME_RECEIPTS: &str = "receipts.jsonl";
pub const FILE_NAME_ERRORS: &str = "errors.jsonl";

/// Append-only, line-delimited log of accepted solutions and of submission
/// errors. Each line is a self-contained JSON record; a crash may lose the
/// tail but never leaves a partial line behind (single O_APPEND write per
/// record, serialized by a mutex).
pub struct ReceiptStore {
    receipts_path: PathBuf,
    errors_path: PathBuf,
    write_lock: Mutex<()>,
}

impl ReceiptStore {
    pub fn open(data_dir: &Path) -> Result<Self, MinerError> {
        fs::create_dir_all(data_dir)?;
        Ok(ReceiptStore {
            receipts_path: data_dir.join(FILE_NAME_RECEIPTS),
            errors_path: data_dir.join(FILE_NAME_ERRORS),
            write_lock: Mutex::new(()),
        })
    }

    fn append_line(&self, path: &Path, line: &str) -> Result<(), MinerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        // One write call for record + newline keeps the append atomic.
        let mut record = String::with_capacity(line.len() + 1);
        record.push_str(line);
        record.push('\n');
        file.write_all(record.as_bytes())?;
        Ok(())
    }

    pub fn append_receipt(&self, entry: &ReceiptEntry) -> Result<(), MinerError> {
        let line = serde_json::to_string(entry)
            .map_err(|e| MinerError::Config(format!("serialize receipt: {}", e)))?;
        self.append_line(&self.receipts_path, &line)
    }

    pub fn append_error(&self, entry: &ErrorEntry) -> Result<(), MinerError> {
        let line = serde_json::to_string(entry)
            .map_err(|e| MinerError::Config(format!("serialize error entry: {}", e)))?;
        self.append_line(&self.errors_path, &line)
    }

    fn read_lines<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, MinerError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<T>(&line) {
                Ok(entry) => entries.push(entry),
                // A torn tail line from a crash is expected; anything else
                // malformed is worth a warning but must not stop recovery.
                Err(e) => warn!("skipping malformed line {} in {:?}: {}", lineno + 1, path, e),
            }
        }
        Ok(entries)
    }

    pub fn read_all_receipts(&self) -> Result<Vec<ReceiptEntry>, MinerError> {
        Self::read_lines(&self.receipts_path)
    }

    pub fn read_all_errors(&self) -> Result<Vec<ErrorEntry>, MinerError> {
        Self::read_lines(&self.errors_path)
    }

    /// The most recent `n` receipts in file (chronological) order.
    pub fn recent_receipts(&self, n: usize) -> Result<Vec<ReceiptEntry>, MinerError> {
        let mut all = self.read_all_receipts()?;
        let skip = all.len().saturating_sub(n);
        Ok(all.split_off(skip))
    }
}
