// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! TIFF embedding in integer Haar detail coefficients.
//!
//! Each page is cut into 2x2 blocks in raster order (a trailing odd row or
//! column is left alone). A block is transformed with the reversible
//! integer S-transform, one bit is stored as the parity of the chosen
//! detail band (1 = LH, 2 = HL, 3 = HH) and the block is transformed back.
//!
//! A bit flip only ever moves the coefficient within its pair `{2p, 2p+1}`,
//! and a block is eligible only when both members of that pair invert to
//! in-range pixels. The pair is the same before and after writing, so
//! reader and writer agree on the slots. A unit step in any detail band
//! moves each pixel by at most one.

use super::integrity::{Violation, ViolationKind};
use super::plane::{self, SlotCodec, ValueChunk};
use crate::codec::tiff::TiffFile;
use crate::dispatch::ExecContext;
use crate::error::{Result, WatermarkError};
use crate::profile::ConstraintProfile;

/// Detail bands addressable by `band_index`.
pub const BANDS: [&str; 3] = ["LH", "HL", "HH"];

fn half(x: i32) -> i32 {
    x.div_euclid(2)
}

fn lift(x: i32, y: i32) -> (i32, i32) {
    (half(x + y), x - y)
}

fn unlift(l: i32, h: i32) -> (i32, i32) {
    let x = l + half(h + 1);
    (x, x - h)
}

/// `[a, b, c, d]` (row-major 2x2) to `[LL, LH, HL, HH]`.
pub(crate) fn forward([a, b, c, d]: [i32; 4]) -> [i32; 4] {
    let (l1, h1) = lift(a, b);
    let (l2, h2) = lift(c, d);
    let (ll, lh) = lift(l1, l2);
    let (hl, hh) = lift(h1, h2);
    [ll, lh, hl, hh]
}

pub(crate) fn inverse([ll, lh, hl, hh]: [i32; 4]) -> [i32; 4] {
    let (l1, l2) = unlift(ll, lh);
    let (h1, h2) = unlift(hl, hh);
    let (a, b) = unlift(l1, h1);
    let (c, d) = unlift(l2, h2);
    [a, b, c, d]
}

pub(crate) struct WaveletSlots {
    band: usize,
    max_sample: i32,
    limit: i32,
}

impl WaveletSlots {
    fn new(band_index: u8, max_sample: i32, profile: &ConstraintProfile) -> Result<Self> {
        if !(1..=3).contains(&band_index) {
            return Err(WatermarkError::InvalidParameters(format!("band index {band_index} is not in 1..=3")));
        }
        Ok(Self { band: band_index as usize, max_sample, limit: profile.max_unit_delta as i32 })
    }

    fn in_range(&self, px: &[i32; 4]) -> bool {
        px.iter().all(|v| (0..=self.max_sample).contains(v))
    }

    /// Coefficients of the block when both pair members invert cleanly.
    fn eligible(&self, px: [i32; 4]) -> Option<[i32; 4]> {
        let coeffs = forward(px);
        let even = coeffs[self.band] - coeffs[self.band].rem_euclid(2);
        let ok = [even, even + 1].into_iter().all(|c| {
            let mut alt = coeffs;
            alt[self.band] = c;
            self.in_range(&inverse(alt))
        });
        ok.then_some(coeffs)
    }
}

fn block_origins(chunk: &ValueChunk) -> impl Iterator<Item = usize> + '_ {
    let w = chunk.width;
    let rows = if w == 0 { 0 } else { chunk.values.len() / w };
    (0..rows / 2).flat_map(move |by| (0..w / 2).map(move |bx| 2 * by * w + 2 * bx))
}

fn block_at(chunk: &ValueChunk, i0: usize) -> [i32; 4] {
    let w = chunk.width;
    [chunk.values[i0], chunk.values[i0 + 1], chunk.values[i0 + w], chunk.values[i0 + w + 1]]
}

impl SlotCodec for WaveletSlots {
    type Chunk = ValueChunk;

    fn bits_per_slot(&self) -> usize {
        1
    }

    fn slot_count(&self, chunk: &ValueChunk) -> usize {
        block_origins(chunk).filter(|&i0| self.eligible(block_at(chunk, i0)).is_some()).count()
    }

    fn write(&self, chunk: &mut ValueChunk, symbols: &[Option<u32>]) -> Vec<Violation> {
        let w = chunk.width;
        let origins: Vec<usize> = block_origins(chunk).collect();
        let mut violations = Vec::new();
        let mut slot = 0;
        for i0 in origins {
            let px = block_at(chunk, i0);
            let Some(mut coeffs) = self.eligible(px) else {
                continue;
            };
            let symbol = symbols[slot];
            slot += 1;
            let Some(bit) = symbol else {
                continue;
            };
            let c = coeffs[self.band];
            if c.rem_euclid(2) as u32 == bit {
                continue;
            }
            coeffs[self.band] = if bit == 1 { c + 1 } else { c - 1 };
            let out = inverse(coeffs);
            if px.iter().zip(&out).any(|(a, b)| (a - b).abs() > self.limit) {
                violations.push(Violation { unit: chunk.base + i0, kind: ViolationKind::Unwritable });
                continue;
            }
            for (offset, v) in [0, 1, w, w + 1].into_iter().zip(out) {
                chunk.values[i0 + offset] = v;
            }
        }
        violations
    }

    fn read(&self, chunk: &ValueChunk) -> Vec<Option<u32>> {
        block_origins(chunk)
            .filter_map(|i0| self.eligible(block_at(chunk, i0)))
            .map(|coeffs| Some(coeffs[self.band].rem_euclid(2) as u32))
            .collect()
    }
}

/// Horizontal stripes of an even number of rows, with the page each came from.
fn stripes(file: &TiffFile, chunk_units: usize) -> (Vec<usize>, Vec<ValueChunk>) {
    let mut meta = Vec::new();
    let mut chunks = Vec::new();
    let mut base = 0;
    for (page, p) in file.pages.iter().enumerate() {
        let samples = file.page_samples(page);
        let w = p.width.max(1);
        let rows_per = ((chunk_units / w) & !1).max(2);
        for rows in samples.chunks(rows_per * w) {
            meta.push(page);
            chunks.push(ValueChunk { base, width: p.width, values: rows.to_vec() });
            base += rows.len();
        }
    }
    (meta, chunks)
}

/// Every page shares one sample range in practice; mixed stacks use the
/// narrowest so a slot never overflows any page.
fn max_sample(file: &TiffFile) -> i32 {
    file.pages.iter().map(|p| p.max_sample()).min().unwrap_or(0)
}

pub(super) fn capacity(
    file: &TiffFile,
    profile: &ConstraintProfile,
    band: u8,
    stride: usize,
    ctx: &ExecContext,
) -> Result<usize> {
    let (_, chunks) = stripes(file, ctx.chunk_units);
    plane::capacity(&WaveletSlots::new(band, max_sample(file), profile)?, &chunks, stride, ctx)
}

pub(super) fn embed(
    file: &TiffFile,
    profile: &ConstraintProfile,
    band: u8,
    coded: &[u8],
    stride: usize,
    ctx: &ExecContext,
) -> Result<(TiffFile, Vec<Violation>)> {
    let codec = WaveletSlots::new(band, max_sample(file), profile)?;
    let (meta, chunks) = stripes(file, ctx.chunk_units);
    let (written, violations) = plane::write(&codec, chunks, coded, stride, ctx)?;

    let mut pages: Vec<Vec<i32>> = vec![Vec::new(); file.pages.len()];
    for (&page, chunk) in meta.iter().zip(written) {
        pages[page].extend(chunk.values);
    }
    let mut out = file.clone();
    for (page, samples) in pages.iter().enumerate() {
        out.set_page_samples(page, samples);
    }
    Ok((out, violations))
}

pub(super) fn read(
    file: &TiffFile,
    profile: &ConstraintProfile,
    band: u8,
    stride: usize,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    let (_, chunks) = stripes(file, ctx.chunk_units);
    plane::read(&WaveletSlots::new(band, max_sample(file), profile)?, &chunks, stride, limit_bits, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::tiff::synthetic_stack;
    use crate::codec::Format;
    use crate::profile::bounds_for;

    #[test]
    fn transform_is_reversible() {
        for a in [0, 1, 2, 7, 254, 255] {
            for b in [0, 3, 128, 255] {
                for c in [0, 1, 200] {
                    for d in [0, 5, 255] {
                        let px = [a, b, c, d];
                        assert_eq!(inverse(forward(px)), px);
                    }
                }
            }
        }
    }

    #[test]
    fn unit_coefficient_step_moves_pixels_by_at_most_one() {
        let px = [37, 90, 12, 201];
        let coeffs = forward(px);
        for band in 1..4 {
            for step in [-1, 1] {
                let mut alt = coeffs;
                alt[band] += step;
                let out = inverse(alt);
                assert!(px.iter().zip(&out).all(|(a, b)| (a - b).abs() <= 1), "band {band} step {step}");
                assert_eq!(forward(out), alt);
            }
        }
    }

    #[test]
    fn saturated_block_is_skipped() {
        let slots = WaveletSlots::new(3, 255, &bounds_for(Format::Tiff)).unwrap();
        assert!(slots.eligible([255, 255, 255, 255]).is_none());
        assert!(slots.eligible([254, 254, 254, 254]).is_some());
        let chunk = ValueChunk { base: 0, width: 2, values: vec![255, 0, 0, 255] };
        let n = slots.slot_count(&chunk);
        let read = slots.read(&chunk);
        assert_eq!(read.len(), n);
    }

    #[test]
    fn embed_then_read_every_band() {
        let w = 16u32;
        let h = 16u32;
        let page: Vec<u16> = (0..w * h).map(|i| ((i * 37) % 251) as u16).collect();
        let file = TiffFile::from_bytes(&synthetic_stack(w, h, 8, &[page.clone(), page])).unwrap();
        let profile = bounds_for(Format::Tiff);
        let ctx = ExecContext::serial().with_chunk_units(64);
        for band in 1..=3u8 {
            let cap = capacity(&file, &profile, band, 1, &ctx).unwrap();
            assert!(cap > 64, "band {band} capacity {cap}");
            let bits: Vec<u8> = (0..40).map(|i| ((i * 7) % 3 == 0) as u8).collect();
            let (out, violations) = embed(&file, &profile, band, &bits, 2, &ctx).unwrap();
            assert!(violations.is_empty());
            for p in 0..2 {
                let before = file.page_samples(p);
                let after = out.page_samples(p);
                assert!(before.iter().zip(&after).all(|(a, b)| (a - b).abs() <= 1));
            }
            let llrs = read(&out, &profile, band, 2, 40, &ctx).unwrap();
            let back: Vec<u8> = llrs.iter().map(|&l| (l < 0.0) as u8).collect();
            assert_eq!(back, bits, "band {band}");
        }
    }

    #[test]
    fn band_out_of_range_rejected() {
        assert!(WaveletSlots::new(0, 255, &bounds_for(Format::Tiff)).is_err());
        assert!(WaveletSlots::new(4, 255, &bounds_for(Format::Tiff)).is_err());
    }
}
