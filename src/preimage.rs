// src/preimage.rs
//
// Wire contract with the service's recomputation: the hashed byte sequence
// is the UTF-8 concatenation of nonce hex, address, challenge id, the
// uppercase difficulty hex, no_pre_mine, latest_submission and
// no_pre_mine_hour, in that order.

use crate::data_types::Challenge;
use crate::difficulty::DifficultyMask;

pub fn nonce_hex(nonce: u64) -> String {
    format!("{:016x}", nonce)
}

pub fn build_preimage(
    nonce_hex: &str,
    address: &str,
    challenge: &Challenge,
    mask: &DifficultyMask,
) -> Vec<u8> {
    let mut preimage = String::with_capacity(
        nonce_hex.len()
            + address.len()
            + challenge.challenge_id.len()
            + mask.as_hex_upper().len()
            + challenge.no_pre_mine.len()
            + challenge.latest_submission.len()
            + challenge.no_pre_mine_hour.len(),
    );
    preimage.push_str(nonce_hex);
    preimage.push_str(address);
    preimage.push_str(&challenge.challenge_id);
    preimage.push_str(mask.as_hex_upper());
    preimage.push_str(&challenge.no_pre_mine);
    preimage.push_str(&challenge.latest_submission);
    preimage.push_str(&challenge.no_pre_mine_hour);
    preimage.into_bytes()
}
