// src/rom.rs

use std::convert::TryInto;
use std::fmt;

pub const DATASET_ACCESS_SIZE: usize = 64;

pub struct RomDigest(pub [u8; 64]);

impl fmt::Display for RomDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ROM digest: ")?;
        for byte in self.0.iter() {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// The read-only memory the keyed hash samples from. Parameterised only by
/// the challenge's `no_pre_mine` key; expensive to build, cheap to read.
pub struct Rom {
    pub digest: RomDigest,
    data: Vec<u8>,
}

/// Variable-length blake2b expansion: short outputs are a single
/// domain-separated hash, long outputs a 32-byte-per-round chain.
pub fn hprime(output: &mut [u8], input: &[u8]) {
    let output_len = output.len();
    if output_len <= 64 {
        let mut state = blake2b_simd::Params::new().hash_length(output_len).to_state();
        state.update(&(output_len as u32).to_le_bytes());
        state.update(input);
        output.copy_from_slice(state.finalize().as_bytes());
        return;
    }

    let mut state = blake2b_simd::State::new();
    state.update(&(output_len as u32).to_le_bytes());
    state.update(input);
    let mut prev = state.finalize();

    output[0..32].copy_from_slice(&prev.as_bytes()[0..32]);
    let mut bytes = output_len - 32;
    let mut pos = 32;

    while bytes > 64 {
        let mut state = blake2b_simd::State::new();
        state.update(prev.as_bytes());
        prev = state.finalize();
        output[pos..pos + 32].copy_from_slice(&prev.as_bytes()[0..32]);
        bytes -= 32;
        pos += 32;
    }

    let mut state = blake2b_simd::State::new();
    state.update(prev.as_bytes());
    let last = state.finalize();
    output[pos..pos + bytes].copy_from_slice(&last.as_bytes()[0..bytes]);
}

fn xorbuf(out: &mut [u8], input: &[u8]) {
    for (o, i) in out.iter_mut().zip(input) {
        *o ^= *i;
    }
}

impl Rom {
    /// Two-step generation: expand the key into a small mixing buffer, then
    /// fill the full ROM by XOR-combining `mixing_numbers` pseudo-randomly
    /// chosen source chunks per output chunk, digesting as we go.
    pub fn new(key: &[u8], pre_size: usize, mixing_numbers: usize, size: usize) -> Self {
        assert!(pre_size.is_power_of_two());
        assert!(size >= pre_size && size % DATASET_ACCESS_SIZE == 0);

        let mut seed_state = blake2b_simd::Params::new().hash_length(32).to_state();
        seed_state.update(&(size as u32).to_le_bytes());
        seed_state.update(key);
        let seed: [u8; 32] = seed_state.finalize().as_bytes().try_into().unwrap();

        let mut mixing_buffer = vec![0u8; pre_size];
        hprime(&mut mixing_buffer, &seed);

        // Per-chunk mixing offsets derived from the seed.
        let offsets_state = blake2b_simd::Params::new()
            .hash_length(64)
            .to_state()
            .update(&seed)
            .update(b"generation offset")
            .finalize();
        let offsets_diff: Vec<u16> = offsets_state
            .as_array()
            .chunks(2)
            .map(|c| u16::from_le_bytes(c.try_into().unwrap()))
            .collect();

        let nb_chunks = size / DATASET_ACCESS_SIZE;
        let mut offsets_base = vec![0u8; nb_chunks];
        let base_input = blake2b_simd::Params::new()
            .hash_length(64)
            .to_state()
            .update(&seed)
            .update(b"generation offset base")
            .finalize();
        hprime(&mut offsets_base, base_input.as_array());

        let nb_source_chunks = (pre_size / DATASET_ACCESS_SIZE) as u32;
        let mut data = vec![0u8; size];
        let mut digest = blake2b_simd::Params::new().hash_length(64).to_state();

        for (i, chunk) in data.chunks_mut(DATASET_ACCESS_SIZE).enumerate() {
            let idx0 = (i as u32) % nb_source_chunks;
            let offset0 = idx0 as usize * DATASET_ACCESS_SIZE;
            chunk.copy_from_slice(&mixing_buffer[offset0..offset0 + DATASET_ACCESS_SIZE]);

            let start_idx = offsets_base[i % offsets_base.len()] as u32 % nb_source_chunks;
            for d in 1..mixing_numbers {
                let idx = start_idx.wrapping_add(offsets_diff[(d - 1) % offsets_diff.len()] as u32)
                    % nb_source_chunks;
                let offset = idx as usize * DATASET_ACCESS_SIZE;
                xorbuf(chunk, &mixing_buffer[offset..offset + DATASET_ACCESS_SIZE]);
            }
            digest.update(chunk);
        }

        let digest = RomDigest(*digest.finalize().as_array());
        Rom { digest, data }
    }

    pub(crate) fn at(&self, i: u32) -> &[u8; DATASET_ACCESS_SIZE] {
        let start = (i as usize % (self.data.len() / DATASET_ACCESS_SIZE)) * DATASET_ACCESS_SIZE;
        <&[u8; DATASET_ACCESS_SIZE]>::try_from(&self.data[start..start + DATASET_ACCESS_SIZE])
            .unwrap()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// ROM-keyed hash over an arbitrary salt. Each round folds eight
/// digest-addressed ROM windows back into the running digest, so the result
/// depends on memory content spread across the whole ROM.
pub fn keyed_hash(salt: &[u8], rom: &Rom, nb_loops: u32) -> [u8; 64] {
    let mut state = blake2b_simd::Params::new().hash_length(64).to_state();
    state.update(&rom.digest.0);
    state.update(salt);
    let mut digest = *state.finalize().as_array();

    for round in 0u32..nb_loops {
        let mut ctx = blake2b_simd::Params::new().hash_length(64).to_state();
        ctx.update(&round.to_le_bytes());
        ctx.update(&digest);
        for word in digest.chunks(8) {
            let idx = u64::from_le_bytes(word.try_into().unwrap()) as u32;
            ctx.update(rom.at(idx));
        }
        digest = *ctx.finalize().as_array();
    }
    digest
}
