// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Payload bits <-> coded carrier bits.
//!
//! Encoding: pack to bytes, Reed-Solomon with `parity` symbols, expand to
//! bits, repeat `redundancy` times. Decoding reverses it and measures the
//! observed bit-error rate against the corrected codeword.

use crate::ecc::reed_solomon::{self, RsDecodeError};
use crate::ecc::{bits_to_bytes, bytes_to_bits, repetition};

/// Forward error correction settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coding {
    pub redundancy: usize,
    pub parity: usize,
}

impl Coding {
    /// Bits of one Reed-Solomon codeword stream for `payload_bits`.
    pub fn codeword_bits(&self, payload_bits: usize) -> usize {
        reed_solomon::encoded_len(payload_bits.div_ceil(8), self.parity) * 8
    }

    /// Total carrier bits needed for `payload_bits`.
    pub fn coded_bits(&self, payload_bits: usize) -> usize {
        self.codeword_bits(payload_bits) * self.redundancy
    }

    pub fn encode(&self, bits: &[u8]) -> Vec<u8> {
        let codeword = reed_solomon::encode(&bits_to_bytes(bits), self.parity);
        repetition::encode(&bytes_to_bits(&codeword), self.redundancy)
    }

    /// Decode `payload_bits` from carrier LLRs (positive = bit 0, zero = unreadable).
    ///
    /// Missing trailing copies reduce redundancy; with no complete copy the
    /// result is marked uncorrected.
    pub fn decode(&self, llrs: &[f64], payload_bits: usize) -> Decoded {
        let cw_bits = self.codeword_bits(payload_bits);
        let used = llrs.len().min(self.coded_bits(payload_bits));
        let llrs = &llrs[..used];
        if cw_bits == 0 || llrs.len() < cw_bits {
            return Decoded { bits: vec![0; payload_bits], bit_error_rate: 1.0, corrected: false };
        }

        let (voted, _) = repetition::decode(llrs, cw_bits);
        let data_len = payload_bits.div_ceil(8);
        let (data, truth, corrected) = match reed_solomon::decode(&bits_to_bytes(&voted), data_len, self.parity) {
            Ok((data, _)) => {
                let truth = bytes_to_bits(&reed_solomon::encode(&data, self.parity));
                (data, truth, true)
            }
            Err(RsDecodeError) => (bits_to_bytes(&voted[..data_len * 8]), voted, false),
        };

        // Unreadable positions count as errors.
        let errors = llrs
            .iter()
            .enumerate()
            .filter(|&(i, &llr)| llr == 0.0 || (llr < 0.0) != (truth[i % cw_bits] == 1))
            .count();
        let mut bits = bytes_to_bits(&data);
        bits.truncate(payload_bits);
        Decoded { bits, bit_error_rate: errors as f64 / llrs.len() as f64, corrected }
    }
}

/// Result of [`Coding::decode`].
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub bits: Vec<u8>,
    /// Fraction of carrier bits that disagreed with the corrected codeword.
    pub bit_error_rate: f64,
    /// `false` when Reed-Solomon could not correct the codeword.
    pub corrected: bool,
}
