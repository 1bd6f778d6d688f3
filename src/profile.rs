// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Constraint profiles: per-format bounds on allowed mutation.
//!
//! A profile is looked up once per call and never changes during it. Every
//! strategy reads its limits from here and the integrity audit checks the
//! result against the same profile.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::codec::dicom::{self, DicomTag};
use crate::codec::Format;
use crate::error::{Result, WatermarkError};

/// A region of a file that embedding must never write to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRef {
    /// A VCF INFO key.
    InfoField { key: String },
    /// A DICOM data element.
    DicomElement { tag: DicomTag },
    /// FASTQ header and separator lines.
    FastqHeader,
    /// FASTQ base calls.
    FastqSequence,
    /// Half-open byte range of an opaque file.
    ByteRange { start: usize, end: usize },
}

impl FieldRef {
    pub fn info(key: &str) -> Self {
        FieldRef::InfoField { key: key.to_string() }
    }
}

/// The smallest addressable thing a strategy mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitGranularity {
    QualityScore,
    InfoField,
    PixelSample,
    Byte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProfile {
    pub format: Format,
    /// Largest absolute change allowed on any single unit.
    pub max_unit_delta: u32,
    pub protected_regions: BTreeSet<FieldRef>,
    pub unit_granularity: UnitGranularity,
    /// FASTQ: quality units below this Phred value are never written.
    #[serde(default)]
    pub min_quality: u8,
    /// TIFF: lowest acceptable mean SSIM per page after embedding.
    #[serde(default)]
    pub min_ssim: f64,
}

/// Default minimum Phred floor for FASTQ embedding.
pub const DEFAULT_MIN_QUALITY: u8 = 20;

/// Bytes at the start of a generic file that stay untouched (magic numbers, headers).
pub const GENERIC_PROTECTED_PREFIX: usize = 64;

/// Built-in constraint profile for `format`.
pub fn bounds_for(format: Format) -> ConstraintProfile {
    match format {
        Format::Fastq => ConstraintProfile {
            format,
            max_unit_delta: 3,
            protected_regions: [FieldRef::FastqHeader, FieldRef::FastqSequence].into_iter().collect(),
            unit_granularity: UnitGranularity::QualityScore,
            min_quality: DEFAULT_MIN_QUALITY,
            min_ssim: 0.0,
        },
        Format::Vcf => ConstraintProfile {
            format,
            // One INFO token per record.
            max_unit_delta: 1,
            protected_regions: ["AF", "AC", "DP"].into_iter().map(FieldRef::info).collect(),
            unit_granularity: UnitGranularity::InfoField,
            min_quality: 0,
            min_ssim: 0.0,
        },
        Format::Dicom => ConstraintProfile {
            format,
            max_unit_delta: 1,
            protected_regions: [
                dicom::TRANSFER_SYNTAX,
                dicom::SAMPLES_PER_PIXEL,
                dicom::NUMBER_OF_FRAMES,
                dicom::ROWS,
                dicom::COLUMNS,
                dicom::BITS_ALLOCATED,
                dicom::PIXEL_REPRESENTATION,
                dicom::PIXEL_PADDING_VALUE,
            ]
            .into_iter()
            .map(|tag| FieldRef::DicomElement { tag })
            .collect(),
            unit_granularity: UnitGranularity::PixelSample,
            min_quality: 0,
            min_ssim: 0.0,
        },
        Format::Tiff => ConstraintProfile {
            format,
            max_unit_delta: 1,
            protected_regions: BTreeSet::new(),
            unit_granularity: UnitGranularity::PixelSample,
            min_quality: 0,
            min_ssim: 0.98,
        },
        Format::Generic => ConstraintProfile {
            format,
            max_unit_delta: 1,
            protected_regions: [FieldRef::ByteRange { start: 0, end: GENERIC_PROTECTED_PREFIX }].into_iter().collect(),
            unit_granularity: UnitGranularity::Byte,
            min_quality: 0,
            min_ssim: 0.0,
        },
    }
}

impl ConstraintProfile {
    pub fn is_protected(&self, field: &FieldRef) -> bool {
        self.protected_regions.contains(field)
    }

    pub fn protects_info(&self, key: &str) -> bool {
        self.protected_regions.iter().any(|f| matches!(f, FieldRef::InfoField { key: k } if k == key))
    }

    pub fn protects_tag(&self, tag: DicomTag) -> bool {
        self.protected_regions.contains(&FieldRef::DicomElement { tag })
    }

    /// Whether `offset` falls inside a protected byte range.
    pub fn protects_byte(&self, offset: usize) -> bool {
        self.protected_regions
            .iter()
            .any(|f| matches!(*f, FieldRef::ByteRange { start, end } if (start..end).contains(&offset)))
    }

    /// Largest `k` such that writing `k` low bits stays within `max_unit_delta`.
    pub fn max_bits_per_unit(&self) -> u32 {
        (self.max_unit_delta.saturating_add(1)).ilog2()
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_unit_delta == 0 {
            return Err(WatermarkError::Config(format!("{} profile allows no change at all", self.format)));
        }
        if !(0.0..=1.0).contains(&self.min_ssim) {
            return Err(WatermarkError::Config(format!("min_ssim {} outside [0, 1]", self.min_ssim)));
        }
        if self.min_quality > crate::codec::fastq::MAX_PHRED {
            return Err(WatermarkError::Config(format!("min_quality {} above Phred maximum", self.min_quality)));
        }
        for region in &self.protected_regions {
            if let FieldRef::ByteRange { start, end } = region {
                if start > end {
                    return Err(WatermarkError::Config(format!("protected byte range {start}..{end} is inverted")));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vcf_protects_allele_and_depth_fields() {
        let p = bounds_for(Format::Vcf);
        for key in ["AF", "AC", "DP"] {
            assert!(p.protects_info(key), "{key}");
        }
        assert!(!p.protects_info("WM"));
    }

    #[test]
    fn fastq_allows_two_bits() {
        let p = bounds_for(Format::Fastq);
        assert_eq!(p.max_bits_per_unit(), 2);
        assert_eq!(p.min_quality, DEFAULT_MIN_QUALITY);
    }

    #[test]
    fn dicom_pixel_delta_is_bounded() {
        let p = bounds_for(Format::Dicom);
        assert_eq!(p.max_unit_delta, 1);
        assert!(p.protects_tag(dicom::ROWS));
    }

    #[test]
    fn generic_header_protected() {
        let p = bounds_for(Format::Generic);
        assert!(p.protects_byte(0));
        assert!(p.protects_byte(63));
        assert!(!p.protects_byte(64));
    }

    #[test]
    fn every_builtin_profile_is_valid() {
        for f in Format::ALL {
            bounds_for(f).validate().unwrap();
        }
    }

    #[test]
    fn json_roundtrip() {
        let p = bounds_for(Format::Vcf);
        let json = serde_json::to_string(&p).unwrap();
        let back: ConstraintProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
