// src/difficulty.rs

use crate::error::MinerError;

/// Parsed difficulty target. The server publishes a hex string; a hash is
/// accepted iff every bit set in its leading bytes is also set in the mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DifficultyMask {
    bytes: Vec<u8>,
    hex_upper: String,
}

impl DifficultyMask {
    pub fn from_hex(difficulty: &str) -> Result<Self, MinerError> {
        let trimmed = difficulty.trim_start_matches("0x");
        let bytes = hex::decode(trimmed)
            .map_err(|e| MinerError::Api(format!("bad difficulty hex {:?}: {}", difficulty, e)))?;
        if bytes.is_empty() {
            return Err(MinerError::Api("empty difficulty mask".to_string()));
        }
        Ok(DifficultyMask {
            bytes,
            hex_upper: trimmed.to_ascii_uppercase(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Uppercase hex form, as it participates in the preimage.
    pub fn as_hex_upper(&self) -> &str {
        &self.hex_upper
    }

    /// Number of leading zero bits in the mask. Logging only.
    pub fn zero_bit_prefix(&self) -> u32 {
        let mut count = 0;
        for byte in &self.bytes {
            if *byte == 0 {
                count += 8;
            } else {
                count += byte.leading_zeros();
                break;
            }
        }
        count
    }
}

/// Acceptance check: big-endian bitwise domination of the hash by the mask.
pub fn matches_difficulty(hash: &[u8], mask: &DifficultyMask) -> bool {
    let mask_bytes = mask.as_bytes();
    if hash.len() < mask_bytes.len() {
        return false;
    }
    hash.iter()
        .zip(mask_bytes)
        .all(|(h, m)| (h | m) == *m)
}
