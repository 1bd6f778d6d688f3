// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Keyed whitening and interleaving of frame bits.
//!
//! Frame bits are XORed with a ChaCha20 keystream and then moved by a
//! Fisher-Yates permutation, both seeded from the dataset key. Without the
//! key the embedded bits are indistinguishable from noise, and a burst of
//! damaged units is spread across the frame.
//!
//! # Cross-platform portability
//!
//! The shuffle draws `u32` ranges (not `usize`) so 32-bit and 64-bit targets
//! consume the same amount of PRNG entropy per step and produce the same
//! permutation.

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::crypto::DatasetKey;

const SCRAMBLE_LABEL: &[u8] = b"scramble";

/// Keystream and permutation for one bit length.
pub struct Scrambler {
    keystream: Vec<u8>,
    /// `perm[i]` is the output position of input bit `i`.
    perm: Vec<usize>,
}

impl Scrambler {
    pub fn new(key: &DatasetKey, len: usize) -> Self {
        let seed = key.mac(&[SCRAMBLE_LABEL]);
        let mut rng = ChaCha20Rng::from_seed(seed);

        let mut raw = vec![0u8; len.div_ceil(8)];
        rng.fill_bytes(&mut raw);
        let keystream = (0..len).map(|i| (raw[i / 8] >> (7 - i % 8)) & 1).collect();

        let mut perm: Vec<usize> = (0..len).collect();
        for i in (1..len).rev() {
            let j = rng.gen_range(0..=(i as u32)) as usize;
            perm.swap(i, j);
        }
        Self { keystream, perm }
    }

    pub fn len(&self) -> usize {
        self.perm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.perm.is_empty()
    }

    pub fn scramble(&self, bits: &[u8]) -> Vec<u8> {
        debug_assert_eq!(bits.len(), self.len());
        let mut out = vec![0u8; bits.len()];
        for (i, &bit) in bits.iter().enumerate() {
            out[self.perm[i]] = (bit ^ self.keystream[i]) & 1;
        }
        out
    }

    pub fn unscramble(&self, bits: &[u8]) -> Vec<u8> {
        debug_assert_eq!(bits.len(), self.len());
        (0..bits.len()).map(|i| (bits[self.perm[i]] ^ self.keystream[i]) & 1).collect()
    }
}
