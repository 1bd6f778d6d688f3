// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! DICOM embedding.
//!
//! The preferred carrier is a private OB data element at the strategy's
//! `element_tag`, registered under a private creator `APERTURE WM`. It holds
//! the coded bits verbatim and leaves every pixel untouched.
//!
//! When the private block is owned by someone else (or the tag is not a
//! private data tag), the fallback writes into pixels whose value lies in a
//! `2^k`-wide window starting at the Pixel Padding Value. Such pixels carry
//! no diagnostic signal. The window width satisfies
//! `2^k - 1 <= max_pixel_delta`, so no sample moves further than that, and a
//! written pixel stays inside the window so eligibility does not change.
//! The fallback is refused when any original sample other than the padding
//! value itself falls inside the window: such a sample is tissue.

use super::integrity::Violation;
use super::plane::{self, SlotCodec, ValueChunk};
use crate::codec::dicom::{DataElement, DicomFile, DicomTag, PixelLayout};
use crate::codec::Format;
use crate::dispatch::ExecContext;
use crate::ecc::{bits_to_bytes, bytes_to_bits};
use crate::error::{Result, WatermarkError};
use crate::profile::ConstraintProfile;

/// Private creator string identifying our block.
pub const CREATOR: &str = "APERTURE WM";

/// Default private data element for the watermark.
pub const DEFAULT_ELEMENT_TAG: DicomTag = DicomTag::new(0x0A71, 0x1000);

/// Largest private element value written, in bytes.
pub const MAX_PRIVATE_BYTES: usize = 1 << 20;

/// Tags the strategy may create or rewrite.
pub fn owned_tags(element_tag: DicomTag) -> Vec<DicomTag> {
    match element_tag.creator() {
        Some(creator) => vec![creator, element_tag],
        None => Vec::new(),
    }
}

fn is_ours(e: &DataElement) -> bool {
    e.read_text() == Some(CREATOR)
}

/// Whether the private block at `tag` is free or already ours.
fn private_available(file: &DicomFile, profile: &ConstraintProfile, tag: DicomTag) -> bool {
    let Some(creator) = tag.creator() else {
        return false;
    };
    if profile.protects_tag(tag) || profile.protects_tag(creator) {
        return false;
    }
    match file.element(creator) {
        None => file.element(tag).is_none(),
        Some(c) => is_ours(c) && file.element(tag).map_or(true, |e| e.vr == *b"OB"),
    }
}

/// Existing watermark elements: OB elements inside blocks owned by [`CREATOR`].
pub fn existing_elements(file: &DicomFile) -> Vec<DicomTag> {
    file.elements
        .iter()
        .filter(|e| e.vr == *b"OB")
        .filter(|e| e.tag.creator().and_then(|c| file.element(c)).is_some_and(is_ours))
        .map(|e| e.tag)
        .collect()
}

/// Padding window `[lo, lo + 2^k - 1]` inside the sample range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PaddingSlots {
    lo: i32,
    k: u32,
    pad: i32,
}

impl PaddingSlots {
    fn new(layout: &PixelLayout, profile: &ConstraintProfile, max_pixel_delta: u16) -> Option<Self> {
        let pad = layout.padding?;
        let bound = profile.max_unit_delta.min(max_pixel_delta as u32);
        let k = (bound + 1).ilog2();
        if k == 0 {
            return None;
        }
        let width = (1i32 << k) - 1;
        let (min, max) = layout.sample_range();
        let lo = if pad + width <= max { pad } else { pad - width };
        (lo >= min).then_some(Self { lo, k, pad })
    }

    fn contains(&self, v: i32) -> bool {
        (self.lo..=self.lo + (1 << self.k) - 1).contains(&v)
    }

    /// Only the padding value itself occupies the window.
    fn window_is_padding_only(&self, samples: &[i32]) -> bool {
        samples.iter().all(|&v| v == self.pad || !self.contains(v))
    }
}

impl SlotCodec for PaddingSlots {
    type Chunk = ValueChunk;

    fn bits_per_slot(&self) -> usize {
        self.k as usize
    }

    fn slot_count(&self, chunk: &ValueChunk) -> usize {
        chunk.values.iter().filter(|&&v| self.contains(v)).count()
    }

    fn write(&self, chunk: &mut ValueChunk, symbols: &[Option<u32>]) -> Vec<Violation> {
        let mut slot = 0;
        for v in chunk.values.iter_mut() {
            if !self.contains(*v) {
                continue;
            }
            if let Some(s) = symbols[slot] {
                *v = self.lo + s as i32;
            }
            slot += 1;
        }
        Vec::new()
    }

    fn read(&self, chunk: &ValueChunk) -> Vec<Option<u32>> {
        chunk.values.iter().filter(|&&v| self.contains(v)).map(|&v| Some((v - self.lo) as u32)).collect()
    }
}

fn layout(file: &DicomFile) -> Result<Option<PixelLayout>> {
    file.pixel_layout().map_err(|e| WatermarkError::format(Format::Dicom, e))
}

/// Per-frame pixel chunks.
fn frames(file: &DicomFile, layout: &PixelLayout) -> Vec<ValueChunk> {
    let samples = file.pixel_samples(layout);
    let per_frame = layout.samples_per_frame().max(1);
    samples
        .chunks(per_frame)
        .enumerate()
        .map(|(i, s)| ValueChunk { base: i * per_frame, width: layout.columns, values: s.to_vec() })
        .collect()
}

fn pixel_carrier(
    file: &DicomFile,
    profile: &ConstraintProfile,
    max_pixel_delta: u16,
) -> Result<Option<(PixelLayout, PaddingSlots)>> {
    Ok(layout(file)?.and_then(|l| PaddingSlots::new(&l, profile, max_pixel_delta).map(|s| (l, s))))
}

/// The pixel carrier, if writing it would touch padding pixels only.
fn writable_pixel_carrier(
    file: &DicomFile,
    profile: &ConstraintProfile,
    max_pixel_delta: u16,
) -> Result<Option<(PixelLayout, PaddingSlots)>> {
    Ok(pixel_carrier(file, profile, max_pixel_delta)?
        .filter(|(layout, slots)| slots.window_is_padding_only(&file.pixel_samples(layout))))
}

pub(super) fn capacity(
    file: &DicomFile,
    profile: &ConstraintProfile,
    element_tag: DicomTag,
    max_pixel_delta: u16,
    stride: usize,
    ctx: &ExecContext,
) -> Result<usize> {
    if private_available(file, profile, element_tag) {
        return Ok(MAX_PRIVATE_BYTES * 8);
    }
    match writable_pixel_carrier(file, profile, max_pixel_delta)? {
        Some((layout, slots)) => plane::capacity(&slots, &frames(file, &layout), stride, ctx),
        None => Ok(0),
    }
}

pub(super) fn embed(
    file: &DicomFile,
    profile: &ConstraintProfile,
    element_tag: DicomTag,
    max_pixel_delta: u16,
    coded: &[u8],
    stride: usize,
    ctx: &ExecContext,
) -> Result<(DicomFile, Vec<Violation>)> {
    let mut out = file.clone();
    if private_available(file, profile, element_tag) && coded.len().div_ceil(8) <= MAX_PRIVATE_BYTES {
        if let Some(creator) = element_tag.creator() {
            let mut name = CREATOR.as_bytes().to_vec();
            if name.len() % 2 == 1 {
                name.push(b' ');
            }
            out.put_element(DataElement { tag: creator, vr: *b"LO", value: name });
            let mut value = bits_to_bytes(coded);
            if value.len() % 2 == 1 {
                value.push(0);
            }
            out.put_element(DataElement { tag: element_tag, vr: *b"OB", value });
            return Ok((out, Vec::new()));
        }
    }

    let Some((layout, slots)) = writable_pixel_carrier(file, profile, max_pixel_delta)? else {
        return Err(WatermarkError::InsufficientCapacity { needed: coded.len(), available: 0 });
    };
    let (written, violations) = plane::write(&slots, frames(file, &layout), coded, stride, ctx)?;
    let samples: Vec<i32> = written.into_iter().flat_map(|c| c.values).collect();
    out.set_pixel_samples(&layout, &samples);
    Ok((out, violations))
}

pub(super) fn read(
    file: &DicomFile,
    profile: &ConstraintProfile,
    element_tag: DicomTag,
    max_pixel_delta: u16,
    stride: usize,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    let owned = element_tag.creator().and_then(|c| file.element(c)).is_some_and(is_ours);
    if let (true, Some(e)) = (owned, file.element(element_tag)) {
        let mut bits = bytes_to_bits(&e.value);
        bits.truncate(limit_bits);
        return Ok(bits.into_iter().map(crate::ecc::repetition::bit_llr).collect());
    }
    match pixel_carrier(file, profile, max_pixel_delta)? {
        Some((layout, slots)) => plane::read(&slots, &frames(file, &layout), stride, limit_bits, ctx),
        None => Ok(Vec::new()),
    }
}
