// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! FASTQ quality-score embedding.
//!
//! Every quality unit at or above the profile's Phred floor is a slot of `k`
//! bits. A symbol `t` is written by moving the Phred value to the nearest
//! value congruent to `t` modulo `2^k` inside `[floor, 93]`; ties go
//! downwards so quality is never inflated when it does not have to be.
//! Units below the floor are never touched, and no written value drops
//! below it, so the reader sees exactly the writer's slots.

use std::ops::Range;

use super::integrity::{Violation, ViolationKind};
use super::plane::{self, SlotCodec, ValueChunk};
use crate::codec::fastq::{FastqFile, MAX_PHRED};
use crate::dispatch::ExecContext;
use crate::error::Result;
use crate::profile::ConstraintProfile;

pub(crate) struct QualitySlots {
    k: u32,
    floor: i32,
    limit: i32,
}

impl QualitySlots {
    pub(crate) fn new(bits_per_unit: u8, profile: &ConstraintProfile) -> Self {
        Self { k: bits_per_unit as u32, floor: profile.min_quality as i32, limit: profile.max_unit_delta as i32 }
    }

    fn eligible(&self, phred: i32) -> bool {
        phred >= self.floor
    }

    /// Closest in-range value encoding `symbol`, if it is within the delta bound.
    fn target(&self, phred: i32, symbol: u32) -> Option<i32> {
        let m = 1i32 << self.k;
        let c0 = phred - phred.rem_euclid(m) + symbol as i32;
        [c0 - m, c0, c0 + m]
            .into_iter()
            .filter(|c| (self.floor..=MAX_PHRED as i32).contains(c))
            .filter(|c| (c - phred).abs() <= self.limit)
            .min_by_key(|c| ((c - phred).abs(), *c))
    }
}

impl SlotCodec for QualitySlots {
    type Chunk = ValueChunk;

    fn bits_per_slot(&self) -> usize {
        self.k as usize
    }

    fn slot_count(&self, chunk: &ValueChunk) -> usize {
        chunk.values.iter().filter(|&&q| self.eligible(q)).count()
    }

    fn write(&self, chunk: &mut ValueChunk, symbols: &[Option<u32>]) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut slot = 0usize;
        for (i, q) in chunk.values.iter_mut().enumerate() {
            if !self.eligible(*q) {
                continue;
            }
            if let Some(symbol) = symbols[slot] {
                match self.target(*q, symbol) {
                    Some(v) => *q = v,
                    None => violations.push(Violation { unit: chunk.base + i, kind: ViolationKind::Unwritable }),
                }
            }
            slot += 1;
        }
        violations
    }

    fn read(&self, chunk: &ValueChunk) -> Vec<Option<u32>> {
        let mask = (1i32 << self.k) - 1;
        chunk.values.iter().filter(|&&q| self.eligible(q)).map(|&q| Some((q & mask) as u32)).collect()
    }
}

/// Group whole reads into chunks of roughly `chunk_units` quality values.
fn read_groups(file: &FastqFile, chunk_units: usize) -> Vec<Range<usize>> {
    let mut groups = Vec::new();
    let mut start = 0;
    let mut units = 0;
    for (i, r) in file.records.iter().enumerate() {
        units += r.quality.len();
        if units >= chunk_units {
            groups.push(start..i + 1);
            start = i + 1;
            units = 0;
        }
    }
    if start < file.records.len() {
        groups.push(start..file.records.len());
    }
    groups
}

fn chunks(file: &FastqFile, groups: &[Range<usize>]) -> Vec<ValueChunk> {
    let mut base = 0;
    groups
        .iter()
        .map(|g| {
            let values: Vec<i32> = file.records[g.clone()]
                .iter()
                .flat_map(|r| (0..r.quality.len()).map(move |i| r.phred(i) as i32))
                .collect();
            let chunk = ValueChunk { base, width: 0, values };
            base += chunk.values.len();
            chunk
        })
        .collect()
}

pub(super) fn capacity(
    file: &FastqFile,
    profile: &ConstraintProfile,
    k: u8,
    stride: usize,
    ctx: &ExecContext,
) -> Result<usize> {
    let groups = read_groups(file, ctx.chunk_units);
    plane::capacity(&QualitySlots::new(k, profile), &chunks(file, &groups), stride, ctx)
}

pub(super) fn embed(
    file: &FastqFile,
    profile: &ConstraintProfile,
    k: u8,
    coded: &[u8],
    stride: usize,
    ctx: &ExecContext,
) -> Result<(FastqFile, Vec<Violation>)> {
    let groups = read_groups(file, ctx.chunk_units);
    let codec = QualitySlots::new(k, profile);
    let (written, violations) = plane::write(&codec, chunks(file, &groups), coded, stride, ctx)?;

    let mut out = file.clone();
    for (group, chunk) in groups.iter().zip(written) {
        let mut values = chunk.values.into_iter();
        for record in &mut out.records[group.clone()] {
            for i in 0..record.quality.len() {
                if let Some(v) = values.next() {
                    record.set_phred(i, v as u8);
                }
            }
        }
    }
    Ok((out, violations))
}

pub(super) fn read(
    file: &FastqFile,
    profile: &ConstraintProfile,
    k: u8,
    stride: usize,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    let groups = read_groups(file, ctx.chunk_units);
    plane::read(&QualitySlots::new(k, profile), &chunks(file, &groups), stride, limit_bits, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::fastq::FastqRecord;
    use crate::codec::Format;
    use crate::profile::bounds_for;

    fn slots(k: u8) -> QualitySlots {
        QualitySlots::new(k, &bounds_for(Format::Fastq))
    }

    #[test]
    fn phred_40_two_bit_deltas() {
        let s = slots(2);
        let deltas: Vec<i32> = (0..4).map(|t| (s.target(40, t).unwrap() - 40).abs()).collect();
        assert_eq!(deltas, vec![0, 1, 2, 1]);
        // Tie between 38 and 42 goes down.
        assert_eq!(s.target(40, 2), Some(38));
    }

    #[test]
    fn never_crosses_floor_or_ceiling() {
        let s = slots(2);
        for t in 0..4 {
            let v = s.target(20, t).unwrap();
            assert!(v >= 20 && v % 4 == t as i32);
            let v = s.target(MAX_PHRED as i32, t).unwrap();
            assert!(v <= MAX_PHRED as i32 && v % 4 == t as i32);
        }
    }

    #[test]
    fn groups_keep_reads_whole() {
        let rec = |n| FastqRecord {
            header: b"@r".to_vec(),
            sequence: vec![b'A'; n],
            separator: b"+".to_vec(),
            quality: vec![b'I'; n],
        };
        let file = FastqFile::from_records(vec![rec(10), rec(10), rec(10), rec(3)]);
        assert_eq!(read_groups(&file, 15), vec![0..2, 2..4]);
        let c = chunks(&file, &read_groups(&file, 15));
        assert_eq!(c[1].base, 20);
        assert_eq!(c[1].values.len(), 13);
    }

    #[test]
    fn low_quality_units_are_skipped() {
        let s = slots(1);
        let mut chunk = ValueChunk { base: 0, width: 0, values: vec![2, 40, 10, 41] };
        assert_eq!(s.slot_count(&chunk), 2);
        let v = s.write(&mut chunk, &[Some(1), Some(0)]);
        assert!(v.is_empty());
        assert_eq!(chunk.values, vec![2, 39, 10, 40]);
        assert_eq!(s.read(&chunk), vec![Some(1), Some(0)]);
    }
}
