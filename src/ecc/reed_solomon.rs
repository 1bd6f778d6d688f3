// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Reed-Solomon coding over GF(2^8).
//!
//! RS(255, 255 - p) with primitive polynomial 0x11D and first consecutive
//! root alpha^0. Payloads longer than one block are split into
//! `255 - p` byte chunks; the final chunk is a shortened code. Decoding uses
//! Berlekamp-Massey, Chien search and Forney.

use std::sync::OnceLock;

use thiserror::Error;

/// x^8 + x^4 + x^3 + x^2 + 1.
const PRIM_POLY: u16 = 0x11D;

/// Full codeword length.
const N_MAX: usize = 255;

/// Parity lengths a strategy may request. Keeps the decoder's search small.
pub const PARITY_CHOICES: [usize; 6] = [0, 2, 4, 8, 16, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Reed-Solomon: too many symbol errors to correct")]
pub struct RsDecodeError;

/// Per-stream decode statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RsStats {
    /// Symbols corrected across all blocks.
    pub corrected: usize,
    pub blocks: usize,
}

// --- GF(2^8) ---

struct GfTables {
    exp: [u8; 512],
    log: [u8; 256],
}

fn gf() -> &'static GfTables {
    static TABLES: OnceLock<GfTables> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut exp = [0u8; 512];
        let mut log = [0u8; 256];
        let mut x: u16 = 1;
        for i in 0..255usize {
            exp[i] = x as u8;
            exp[i + 255] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= PRIM_POLY;
            }
        }
        exp[510] = exp[0];
        exp[511] = exp[1];
        GfTables { exp, log }
    })
}

fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let t = gf();
    t.exp[t.log[a as usize] as usize + t.log[b as usize] as usize]
}

/// Multiplicative inverse; `a` must be non-zero.
fn inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0);
    let t = gf();
    t.exp[255 - t.log[a as usize] as usize]
}

/// alpha^e for any (possibly negative) exponent.
fn alpha(e: i64) -> u8 {
    gf().exp[e.rem_euclid(255) as usize]
}

/// Horner evaluation, `poly[0]` is the highest-degree coefficient.
fn eval_desc(poly: &[u8], x: u8) -> u8 {
    poly.iter().fold(0u8, |acc, &c| mul(acc, x) ^ c)
}

/// Evaluation with `poly[0]` as the constant term.
fn eval_asc(poly: &[u8], x: u8) -> u8 {
    poly.iter().rev().fold(0u8, |acc, &c| mul(acc, x) ^ c)
}

fn build_generator(parity: usize) -> Vec<u8> {
    let mut g = vec![1u8];
    for i in 0..parity {
        let root = alpha(i as i64);
        let mut next = vec![0u8; g.len() + 1];
        for (j, &c) in g.iter().enumerate() {
            next[j] ^= c;
            next[j + 1] ^= mul(c, root);
        }
        g = next;
    }
    g
}

/// Cached generator polynomial, one per entry of [`PARITY_CHOICES`].
fn generator(parity: usize) -> Option<&'static [u8]> {
    static GENERATORS: [OnceLock<Vec<u8>>; PARITY_CHOICES.len()] =
        [OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new(), OnceLock::new()];
    let slot = PARITY_CHOICES.iter().position(|&p| p == parity)?;
    Some(GENERATORS[slot].get_or_init(|| build_generator(parity)).as_slice())
}

/// Whether `parity` is one of the supported parity lengths.
pub fn is_supported_parity(parity: usize) -> bool {
    PARITY_CHOICES.contains(&parity)
}

// --- Encoding ---

fn encode_block(data: &[u8], parity: usize, gpoly: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(data);
    if parity == 0 {
        return;
    }
    let mut reg = vec![0u8; parity];
    for &byte in data {
        let feedback = byte ^ reg[0];
        for j in 0..parity - 1 {
            reg[j] = reg[j + 1] ^ mul(feedback, gpoly[j + 1]);
        }
        reg[parity - 1] = mul(feedback, gpoly[parity]);
    }
    out.extend_from_slice(&reg);
}

/// Systematically encode `data` with `parity` symbols per block.
///
/// `parity` must be one of [`PARITY_CHOICES`]; other values return the data
/// unchanged, which callers prevent through parameter validation.
pub fn encode(data: &[u8], parity: usize) -> Vec<u8> {
    let Some(gpoly) = generator(parity) else {
        debug_assert!(false, "unsupported parity {parity}");
        return data.to_vec();
    };
    let k = N_MAX - parity;
    let mut out = Vec::with_capacity(encoded_len(data.len(), parity));
    for chunk in data.chunks(k) {
        encode_block(chunk, parity, gpoly, &mut out);
    }
    out
}

/// Encoded length in bytes for `data_len` payload bytes.
pub fn encoded_len(data_len: usize, parity: usize) -> usize {
    let k = N_MAX - parity;
    data_len + data_len.div_ceil(k) * parity
}

// --- Decoding ---

/// Error locator (ascending powers) from syndromes.
fn berlekamp_massey(syndromes: &[u8]) -> Vec<u8> {
    let n = syndromes.len();
    let mut c = vec![0u8; n + 1];
    let mut b = vec![0u8; n + 1];
    c[0] = 1;
    b[0] = 1;
    let mut ell = 0usize;
    let mut prev_delta = 1u8;
    let mut shift = 1usize;

    for r in 0..n {
        let mut delta = syndromes[r];
        for i in 1..=ell {
            delta ^= mul(c[i], syndromes[r - i]);
        }
        if delta == 0 {
            shift += 1;
            continue;
        }
        let factor = mul(delta, inv(prev_delta));
        let saved = c.clone();
        for j in 0..=n - shift {
            c[j + shift] ^= mul(factor, b[j]);
        }
        if 2 * ell <= r {
            ell = r + 1 - ell;
            b = saved;
            prev_delta = delta;
            shift = 1;
        } else {
            shift += 1;
        }
    }
    c.truncate(ell + 1);
    c
}

fn decode_block(received: &[u8], data_len: usize, parity: usize) -> Result<(Vec<u8>, usize), RsDecodeError> {
    if parity == 0 {
        return Ok((received.to_vec(), 0));
    }
    let n = received.len();
    let syndromes: Vec<u8> = (0..parity).map(|i| eval_desc(received, alpha(i as i64))).collect();
    if syndromes.iter().all(|&s| s == 0) {
        return Ok((received[..data_len].to_vec(), 0));
    }

    let sigma = berlekamp_massey(&syndromes);
    let errors = sigma.len() - 1;
    if errors == 0 || errors > parity / 2 {
        return Err(RsDecodeError);
    }

    // Chien search over the (possibly shortened) block only: a root that
    // lands in the virtual zero padding means the block is uncorrectable.
    let positions: Vec<usize> = (0..n)
        .filter(|&idx| {
            let power = (n - 1 - idx) as i64;
            eval_asc(&sigma, alpha(-power)) == 0
        })
        .collect();
    if positions.len() != errors {
        return Err(RsDecodeError);
    }

    // Forney: omega = S(x) * sigma(x) mod x^parity.
    let mut omega = vec![0u8; parity];
    for (i, &s) in sigma.iter().enumerate() {
        for (j, &syn) in syndromes.iter().enumerate() {
            if i + j < parity {
                omega[i + j] ^= mul(s, syn);
            }
        }
    }
    let sigma_prime: Vec<u8> = (1..sigma.len()).map(|i| if i % 2 == 1 { sigma[i] } else { 0 }).collect();

    let mut corrected = received.to_vec();
    for &idx in &positions {
        let power = (n - 1 - idx) as i64;
        let x = alpha(power);
        let x_inv = alpha(-power);
        let denom = eval_asc(&sigma_prime, x_inv);
        if denom == 0 {
            return Err(RsDecodeError);
        }
        corrected[idx] ^= mul(x, mul(eval_asc(&omega, x_inv), inv(denom)));
    }

    if (0..parity).any(|i| eval_desc(&corrected, alpha(i as i64)) != 0) {
        return Err(RsDecodeError);
    }
    corrected.truncate(data_len);
    Ok((corrected, errors))
}

/// Decode a stream produced by [`encode`] back to `data_len` bytes.
pub fn decode(encoded: &[u8], data_len: usize, parity: usize) -> Result<(Vec<u8>, RsStats), RsDecodeError> {
    if !is_supported_parity(parity) || encoded.len() < encoded_len(data_len, parity) {
        return Err(RsDecodeError);
    }
    let k = N_MAX - parity;
    let mut out = Vec::with_capacity(data_len);
    let mut stats = RsStats::default();
    let mut offset = 0;
    let mut remaining = data_len;
    while remaining > 0 {
        let chunk = remaining.min(k);
        let block = &encoded[offset..offset + chunk + parity];
        let (data, fixed) = decode_block(block, chunk, parity)?;
        out.extend_from_slice(&data);
        stats.corrected += fixed;
        stats.blocks += 1;
        offset += chunk + parity;
        remaining -= chunk;
    }
    Ok((out, stats))
}
