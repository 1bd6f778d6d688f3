// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Generic byte-plane embedding: one bit per unprotected byte.

use super::integrity::Violation;
use super::plane::{self, SlotCodec, ValueChunk};
use crate::codec::raw::RawFile;
use crate::dispatch::ExecContext;
use crate::error::{Result, WatermarkError};
use crate::profile::ConstraintProfile;

pub(crate) struct ByteSlots<'a> {
    mask: i32,
    profile: &'a ConstraintProfile,
}

impl<'a> ByteSlots<'a> {
    pub(crate) fn new(bit_plane: u8, profile: &'a ConstraintProfile) -> Result<Self> {
        if bit_plane >= 8 || (1u32 << bit_plane) > profile.max_unit_delta {
            return Err(WatermarkError::InvalidParameters(format!(
                "bit plane {bit_plane} exceeds the per-byte delta of {}",
                profile.max_unit_delta
            )));
        }
        Ok(Self { mask: 1 << bit_plane, profile })
    }

    fn eligible(&self, offset: usize) -> bool {
        !self.profile.protects_byte(offset)
    }
}

impl SlotCodec for ByteSlots<'_> {
    type Chunk = ValueChunk;

    fn bits_per_slot(&self) -> usize {
        1
    }

    fn slot_count(&self, chunk: &ValueChunk) -> usize {
        (0..chunk.values.len()).filter(|i| self.eligible(chunk.base + i)).count()
    }

    fn write(&self, chunk: &mut ValueChunk, symbols: &[Option<u32>]) -> Vec<Violation> {
        let base = chunk.base;
        let slots = chunk.values.iter_mut().enumerate().filter(|(i, _)| self.eligible(base + i));
        for ((_, v), symbol) in slots.zip(symbols) {
            match symbol {
                Some(1) => *v |= self.mask,
                Some(_) => *v &= !self.mask,
                None => {}
            }
        }
        Vec::new()
    }

    fn read(&self, chunk: &ValueChunk) -> Vec<Option<u32>> {
        chunk
            .values
            .iter()
            .enumerate()
            .filter(|(i, _)| self.eligible(chunk.base + i))
            .map(|(_, v)| Some(u32::from(v & self.mask != 0)))
            .collect()
    }
}

fn chunks(file: &RawFile, chunk_units: usize) -> Vec<ValueChunk> {
    plane::ranges(file.bytes.len(), chunk_units)
        .into_iter()
        .map(|r| ValueChunk { base: r.start, width: 0, values: file.bytes[r].iter().map(|&b| b as i32).collect() })
        .collect()
}

pub(super) fn capacity(
    file: &RawFile,
    profile: &ConstraintProfile,
    bit_plane: u8,
    stride: usize,
    ctx: &ExecContext,
) -> Result<usize> {
    plane::capacity(&ByteSlots::new(bit_plane, profile)?, &chunks(file, ctx.chunk_units), stride, ctx)
}

pub(super) fn embed(
    file: &RawFile,
    profile: &ConstraintProfile,
    bit_plane: u8,
    coded: &[u8],
    stride: usize,
    ctx: &ExecContext,
) -> Result<(RawFile, Vec<Violation>)> {
    let codec = ByteSlots::new(bit_plane, profile)?;
    let (written, violations) = plane::write(&codec, chunks(file, ctx.chunk_units), coded, stride, ctx)?;
    let bytes = written.into_iter().flat_map(|c| c.values).map(|v| v as u8).collect();
    Ok((RawFile { bytes }, violations))
}

pub(super) fn read(
    file: &RawFile,
    profile: &ConstraintProfile,
    bit_plane: u8,
    stride: usize,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    plane::read(&ByteSlots::new(bit_plane, profile)?, &chunks(file, ctx.chunk_units), stride, limit_bits, ctx)
}
