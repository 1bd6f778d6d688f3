// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Chunked slot planes.
//!
//! Every carrier that stores fixed-width symbols in eligible units (quality
//! scores, padding pixels, wavelet blocks, bytes, VCF records) implements
//! [`SlotCodec`]. The driver here does the rest in two dispatched passes:
//!
//! 1. count eligible slots per chunk and prefix-sum them into global offsets;
//! 2. give each chunk the symbols for its global slot range and let it write.
//!
//! A slot with global index `g` is selected when `g % stride == 0` and carries
//! symbol `g / stride`. Eligibility must not change when a slot is written,
//! otherwise the reader would see different slots than the writer.

use super::integrity::Violation;
use crate::dispatch::ExecContext;
use crate::error::{Result, WatermarkError};

/// A chunk of pixel-like integer units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ValueChunk {
    /// Global index of `values[0]`.
    pub base: usize,
    /// Row length for two-dimensional carriers; `0` for flat ones.
    pub width: usize,
    pub values: Vec<i32>,
}

pub(crate) trait SlotCodec: Sync {
    type Chunk: Send + Sync;

    fn bits_per_slot(&self) -> usize;

    fn slot_count(&self, chunk: &Self::Chunk) -> usize;

    /// Write `symbols[i]` into eligible slot `i`; `None` leaves it untouched.
    /// Returns the slots that could not be written within bounds.
    fn write(&self, chunk: &mut Self::Chunk, symbols: &[Option<u32>]) -> Vec<Violation>;

    /// Read every eligible slot in order; `None` when unreadable.
    fn read(&self, chunk: &Self::Chunk) -> Vec<Option<u32>>;
}

/// Number of selected slots out of `total` eligible ones.
pub(crate) fn selected(total: usize, stride: usize) -> usize {
    total.div_ceil(stride.max(1))
}

fn slot_offsets<C: SlotCodec>(codec: &C, chunks: &[C::Chunk], ctx: &ExecContext) -> Result<(Vec<usize>, usize)> {
    let counts = ctx.dispatch(chunks.iter().collect(), |_, chunk| Ok(codec.slot_count(chunk)))?;
    let mut offsets = Vec::with_capacity(counts.len());
    let mut total = 0usize;
    for c in counts {
        offsets.push(total);
        total += c;
    }
    Ok((offsets, total))
}

/// Carrier capacity in bits.
pub(crate) fn capacity<C: SlotCodec>(
    codec: &C,
    chunks: &[C::Chunk],
    stride: usize,
    ctx: &ExecContext,
) -> Result<usize> {
    let (_, total) = slot_offsets(codec, chunks, ctx)?;
    Ok(selected(total, stride) * codec.bits_per_slot())
}

/// MSB-first packing of `bits` into `k`-bit symbols; the last one is zero-padded.
fn pack_symbols(bits: &[u8], k: usize) -> Vec<u32> {
    bits.chunks(k)
        .map(|chunk| (0..k).fold(0u32, |acc, i| (acc << 1) | chunk.get(i).copied().unwrap_or(0) as u32))
        .collect()
}

/// Write `coded` bits across the chunks.
pub(crate) fn write<C: SlotCodec>(
    codec: &C,
    chunks: Vec<C::Chunk>,
    coded: &[u8],
    stride: usize,
    ctx: &ExecContext,
) -> Result<(Vec<C::Chunk>, Vec<Violation>)> {
    let stride = stride.max(1);
    let k = codec.bits_per_slot();
    let (offsets, total) = slot_offsets(codec, &chunks, ctx)?;
    let available = selected(total, stride) * k;
    if coded.len() > available {
        return Err(WatermarkError::InsufficientCapacity { needed: coded.len(), available });
    }
    let symbols = pack_symbols(coded, k);

    let jobs: Vec<(C::Chunk, usize)> = chunks.into_iter().zip(offsets).collect();
    let written = ctx.dispatch(jobs, |_, (mut chunk, base)| {
        let assigned: Vec<Option<u32>> = (0..codec.slot_count(&chunk))
            .map(|i| {
                let g = base + i;
                if g % stride == 0 {
                    symbols.get(g / stride).copied()
                } else {
                    None
                }
            })
            .collect();
        let violations = codec.write(&mut chunk, &assigned);
        Ok((chunk, violations))
    })?;

    let mut out = Vec::with_capacity(written.len());
    let mut violations = Vec::new();
    for (chunk, v) in written {
        out.push(chunk);
        violations.extend(v);
    }
    Ok((out, violations))
}

/// Read up to `limit_bits` carrier bits as LLRs.
pub(crate) fn read<C: SlotCodec>(
    codec: &C,
    chunks: &[C::Chunk],
    stride: usize,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    let stride = stride.max(1);
    let k = codec.bits_per_slot();
    let per_chunk = ctx.dispatch(chunks.iter().collect(), |_, chunk| Ok(codec.read(chunk)))?;

    let mut llrs = Vec::with_capacity(limit_bits);
    let slots = per_chunk.into_iter().flatten().step_by(stride);
    for symbol in slots {
        if llrs.len() >= limit_bits {
            break;
        }
        for i in (0..k).rev() {
            llrs.push(match symbol {
                Some(s) if (s >> i) & 1 == 1 => -1.0,
                Some(_) => 1.0,
                None => 0.0,
            });
        }
    }
    llrs.truncate(limit_bits);
    Ok(llrs)
}

/// Split `len` units into consecutive ranges of about `chunk_units` each.
pub(crate) fn ranges(len: usize, chunk_units: usize) -> Vec<std::ops::Range<usize>> {
    let step = chunk_units.max(1);
    (0..len).step_by(step).map(|start| start..(start + step).min(len)).collect()
}
