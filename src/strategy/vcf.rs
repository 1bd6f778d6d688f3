// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! VCF INFO-field embedding.
//!
//! Each record is one 32-bit slot stored as `KEY=xxxxxxxx` (lowercase hex) in
//! a free-form INFO key. The key must be declared `Type=String` in the
//! header, be listed by the strategy and not be protected; the first listed
//! key that qualifies is used. Without one, capacity is zero. No other INFO
//! entry, column or header line is touched.

use super::integrity::Violation;
use super::plane::{self, SlotCodec};
use crate::codec::vcf::{VcfFile, VcfRecord};
use crate::dispatch::ExecContext;
use crate::error::{Result, WatermarkError};
use crate::profile::ConstraintProfile;

/// Bits carried per record.
pub const BITS_PER_RECORD: usize = 32;

pub(crate) struct RecordChunk {
    records: Vec<VcfRecord>,
}

struct InfoSlots<'a> {
    key: &'a str,
}

impl SlotCodec for InfoSlots<'_> {
    type Chunk = RecordChunk;

    fn bits_per_slot(&self) -> usize {
        BITS_PER_RECORD
    }

    fn slot_count(&self, chunk: &RecordChunk) -> usize {
        chunk.records.len()
    }

    fn write(&self, chunk: &mut RecordChunk, symbols: &[Option<u32>]) -> Vec<Violation> {
        for (record, symbol) in chunk.records.iter_mut().zip(symbols) {
            if let Some(s) = symbol {
                record.set_info(self.key, format!("{s:08x}"));
            }
        }
        Vec::new()
    }

    fn read(&self, chunk: &RecordChunk) -> Vec<Option<u32>> {
        chunk
            .records
            .iter()
            .map(|r| match r.info_value(self.key) {
                Some(Some(v)) if v.len() == 8 => u32::from_str_radix(v, 16).ok(),
                _ => None,
            })
            .collect()
    }
}

/// The INFO key the strategy writes to, if any qualifies.
pub fn select_target<'a>(file: &VcfFile, profile: &ConstraintProfile, fields: &'a [String]) -> Option<&'a str> {
    fields
        .iter()
        .map(String::as_str)
        .find(|key| !profile.protects_info(key) && file.declared_info_type(key) == Some("String"))
}

/// Declared free-form keys of a file: `Type=String` and not protected.
pub fn free_form_keys(file: &VcfFile, profile: &ConstraintProfile) -> Vec<String> {
    file.declared_info_keys()
        .into_iter()
        .filter(|key| !profile.protects_info(key) && file.declared_info_type(key) == Some("String"))
        .map(str::to_string)
        .collect()
}

fn chunks(file: &VcfFile, chunk_units: usize) -> Vec<RecordChunk> {
    plane::ranges(file.records.len(), chunk_units)
        .into_iter()
        .map(|r| RecordChunk { records: file.records[r].to_vec() })
        .collect()
}

pub(super) fn capacity(
    file: &VcfFile,
    profile: &ConstraintProfile,
    fields: &[String],
    stride: usize,
    ctx: &ExecContext,
) -> Result<usize> {
    let Some(key) = select_target(file, profile, fields) else {
        return Ok(0);
    };
    plane::capacity(&InfoSlots { key }, &chunks(file, ctx.chunk_units), stride, ctx)
}

pub(super) fn embed(
    file: &VcfFile,
    profile: &ConstraintProfile,
    fields: &[String],
    coded: &[u8],
    stride: usize,
    ctx: &ExecContext,
) -> Result<(VcfFile, Vec<Violation>)> {
    let Some(key) = select_target(file, profile, fields) else {
        return Err(WatermarkError::InsufficientCapacity { needed: coded.len(), available: 0 });
    };
    let (written, violations) = plane::write(&InfoSlots { key }, chunks(file, ctx.chunk_units), coded, stride, ctx)?;
    let mut out = file.clone();
    out.records = written.into_iter().flat_map(|c| c.records).collect();
    Ok((out, violations))
}

pub(super) fn read(
    file: &VcfFile,
    profile: &ConstraintProfile,
    fields: &[String],
    stride: usize,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    let Some(key) = select_target(file, profile, fields) else {
        return Ok(Vec::new());
    };
    plane::read(&InfoSlots { key }, &chunks(file, ctx.chunk_units), stride, limit_bits, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Format;
    use crate::profile::bounds_for;

    const VCF: &[u8] = b"##fileformat=VCFv4.2\n\
##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n\
##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequency\">\n\
##INFO=<ID=WM,Number=1,Type=String,Description=\"Vendor tag\">\n\
##INFO=<ID=CNT,Number=1,Type=Integer,Description=\"Count\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
1\t100\t.\tA\tG\t50\tPASS\tDP=10;AF=0.5\n\
1\t200\t.\tC\tT\t60\tPASS\t.\n";

    fn fields(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn target_must_be_declared_string_and_unprotected() {
        let file = VcfFile::from_bytes(VCF).unwrap();
        let profile = bounds_for(Format::Vcf);
        assert_eq!(select_target(&file, &profile, &fields(&["DP", "CNT", "WM"])), Some("WM"));
        assert_eq!(select_target(&file, &profile, &fields(&["CNT", "XX"])), None);
        assert_eq!(free_form_keys(&file, &profile), vec!["WM".to_string()]);
    }

    #[test]
    fn writes_hex_token_and_reads_it_back() {
        let file = VcfFile::from_bytes(VCF).unwrap();
        let profile = bounds_for(Format::Vcf);
        let ctx = ExecContext::serial();
        let f = fields(&["WM"]);
        assert_eq!(capacity(&file, &profile, &f, 1, &ctx).unwrap(), 64);
        let coded: Vec<u8> = (0..64).map(|i| (i % 3 == 0) as u8).collect();
        let (out, v) = embed(&file, &profile, &f, &coded, 1, &ctx).unwrap();
        assert!(v.is_empty());
        assert_eq!(out.records[0].info_value("DP"), Some(Some("10")));
        assert_eq!(out.records[0].info_value("WM").map(|v| v.map(str::len)), Some(Some(8)));
        let llrs = read(&out, &profile, &f, 1, 64, &ctx).unwrap();
        let back: Vec<u8> = llrs.iter().map(|&l| (l < 0.0) as u8).collect();
        assert_eq!(back, coded);
    }

    #[test]
    fn no_target_is_insufficient_capacity() {
        let file = VcfFile::from_bytes(VCF).unwrap();
        let profile = bounds_for(Format::Vcf);
        let err = embed(&file, &profile, &fields(&["AF"]), &[0u8; 8], 1, &ExecContext::serial()).unwrap_err();
        assert!(matches!(err, WatermarkError::InsufficientCapacity { available: 0, .. }));
    }
}
