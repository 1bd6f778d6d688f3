// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Repetition coding with soft majority voting.
//!
//! Copy `j` of a bit stream of length `n` occupies positions
//! `j * n .. (j + 1) * n`. On extraction the per-copy log-likelihood ratios
//! are summed; a non-negative total decides bit 0. Unreadable positions
//! carry an LLR of zero.

/// Lay out `r` sequential copies of `bits`.
pub fn encode(bits: &[u8], r: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(bits.len() * r);
    for _ in 0..r {
        out.extend_from_slice(bits);
    }
    out
}

/// Hard bit to LLR: bit 0 maps to `+1.0`, bit 1 to `-1.0`.
pub fn bit_llr(bit: u8) -> f64 {
    if bit & 1 == 0 {
        1.0
    } else {
        -1.0
    }
}

/// Agreement statistics from a majority vote.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoteQuality {
    /// Copy bits that disagree with the voted value.
    pub disagreements: usize,
    /// Copy bits that took part in the vote.
    pub votes: usize,
}

impl VoteQuality {
    /// Fraction of copy bits outvoted by the majority.
    pub fn disagreement_rate(&self) -> f64 {
        if self.votes == 0 {
            0.0
        } else {
            self.disagreements as f64 / self.votes as f64
        }
    }
}

/// Soft majority vote over sequential copies of a `bit_count`-bit stream.
///
/// Trailing positions that do not form a complete copy are ignored.
pub fn decode(llrs: &[f64], bit_count: usize) -> (Vec<u8>, VoteQuality) {
    if bit_count == 0 {
        return (Vec::new(), VoteQuality::default());
    }
    let copies = llrs.len() / bit_count;
    let mut voted = Vec::with_capacity(bit_count);
    let mut quality = VoteQuality::default();

    for i in 0..bit_count {
        let total: f64 = (0..copies).map(|c| llrs[c * bit_count + i]).sum();
        let bit = if total >= 0.0 { 0u8 } else { 1u8 };
        for c in 0..copies {
            let llr = llrs[c * bit_count + i];
            // A zero LLR is an erasure and does not vote.
            if llr == 0.0 {
                continue;
            }
            quality.votes += 1;
            if (llr < 0.0) != (bit == 1) {
                quality.disagreements += 1;
            }
        }
        voted.push(bit);
    }
    (voted, quality)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_layout() {
        assert_eq!(encode(&[1, 0, 1], 2), vec![1, 0, 1, 1, 0, 1]);
    }

    #[test]
    fn majority_overrides_minority() {
        let bits = [1u8, 0, 1, 1, 0];
        let mut coded = encode(&bits, 3);
        coded[0] ^= 1;
        coded[7] ^= 1;
        let llrs: Vec<f64> = coded.iter().map(|&b| bit_llr(b)).collect();
        let (voted, q) = decode(&llrs, bits.len());
        assert_eq!(voted, bits);
        assert_eq!(q.disagreements, 2);
        assert_eq!(q.votes, 15);
    }

    #[test]
    fn incomplete_trailing_copy_ignored() {
        let mut llrs: Vec<f64> = encode(&[0, 1], 2).iter().map(|&b| bit_llr(b)).collect();
        llrs.push(-1.0);
        let (voted, q) = decode(&llrs, 2);
        assert_eq!(voted, vec![0, 1]);
        assert_eq!(q.votes, 4);
    }

    #[test]
    fn erasures_abstain() {
        let llrs = [0.0, -1.0, 0.0, -1.0, 1.0, -1.0];
        let (voted, q) = decode(&llrs, 2);
        assert_eq!(voted, vec![0, 1]);
        assert_eq!(q.votes, 4);
        assert_eq!(q.disagreements, 0);
    }

    #[test]
    fn empty_stream() {
        let (voted, q) = decode(&[1.0, -1.0], 0);
        assert!(voted.is_empty());
        assert_eq!(q.disagreement_rate(), 0.0);
    }
}
