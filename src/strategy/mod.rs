// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Embedding strategies.
//!
//! An [`EmbeddingStrategy`] names a carrier inside one format; the
//! [`StrategyParams`] around it add the forward error correction and the
//! slot stride. Dispatch happens once, by matching the strategy against the
//! decoded [`Document`].
//!
//! Every embed is audited against the original after a full encode/decode
//! round trip. A single violation rejects the whole embed.

pub mod coding;
pub mod dicom;
mod fastq;
pub mod integrity;
mod lsb;
pub(crate) mod plane;
pub mod vcf;
mod wavelet;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::dicom::DicomTag;
use crate::codec::{self, Document, Format};
use crate::dispatch::ExecContext;
use crate::ecc::reed_solomon::{self, PARITY_CHOICES};
use crate::error::{Result, WatermarkError};
use crate::profile::ConstraintProfile;
use coding::{Coding, Decoded};
use integrity::{IntegrityReport, Violation};

/// Repetition factors the verifier searches.
pub const REDUNDANCY_CHOICES: [u8; 6] = [1, 3, 5, 7, 11, 15];

/// Slot strides the verifier searches.
pub const STRIDE_CHOICES: [u8; 4] = [1, 2, 4, 8];

/// Where the bits go, per format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EmbeddingStrategy {
    /// `k` low-order bits of each Phred value at or above the floor.
    Fastq { bits_per_quality_unit: u8 },
    /// First eligible free-form INFO key from the list.
    Vcf { target_info_fields: Vec<String> },
    /// Private element at `element_tag`, else the pixel padding window.
    Dicom { element_tag: DicomTag, max_pixel_delta: u16 },
    /// Parity of a Haar detail band.
    TiffWavelet { band_index: u8 },
    /// One bit per unprotected byte.
    GenericLsb { bit_plane: u8 },
}

impl EmbeddingStrategy {
    pub fn format(&self) -> Format {
        match self {
            Self::Fastq { .. } => Format::Fastq,
            Self::Vcf { .. } => Format::Vcf,
            Self::Dicom { .. } => Format::Dicom,
            Self::TiffWavelet { .. } => Format::Tiff,
            Self::GenericLsb { .. } => Format::Generic,
        }
    }

    /// Check the carrier parameters against `profile`.
    pub fn validate(&self, profile: &ConstraintProfile) -> Result<()> {
        if self.format() != profile.format {
            return Err(invalid(format!("{} strategy used with a {} profile", self.format(), profile.format)));
        }
        match self {
            Self::Fastq { bits_per_quality_unit: k } => {
                let max = profile.max_bits_per_unit();
                if *k == 0 || u32::from(*k) > max {
                    return Err(invalid(format!("{k} bits per quality unit; the profile allows 1..={max}")));
                }
            }
            Self::Vcf { target_info_fields } if target_info_fields.is_empty() => {
                return Err(invalid("no target INFO fields".into()));
            }
            Self::Vcf { .. } => {}
            Self::Dicom { max_pixel_delta, .. } if *max_pixel_delta == 0 => {
                return Err(invalid("max pixel delta must be at least 1".into()));
            }
            Self::Dicom { .. } => {}
            Self::TiffWavelet { band_index } if !(1..=3).contains(band_index) => {
                return Err(invalid(format!("band index {band_index} is not a detail band")));
            }
            Self::TiffWavelet { .. } => {}
            Self::GenericLsb { bit_plane } => {
                if *bit_plane >= 8 || (1u32 << bit_plane) > profile.max_unit_delta {
                    return Err(invalid(format!("bit plane {bit_plane} exceeds the per-byte delta bound")));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for EmbeddingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fastq { bits_per_quality_unit } => write!(f, "fastq(k={bits_per_quality_unit})"),
            Self::Vcf { target_info_fields } => write!(f, "vcf({})", target_info_fields.join(",")),
            Self::Dicom { element_tag, max_pixel_delta } => write!(f, "dicom({element_tag}, d={max_pixel_delta})"),
            Self::TiffWavelet { band_index } => {
                let band = wavelet::BANDS.get((*band_index as usize).wrapping_sub(1)).copied().unwrap_or("?");
                write!(f, "tiff-wavelet({band})")
            }
            Self::GenericLsb { bit_plane } => write!(f, "lsb(plane={bit_plane})"),
        }
    }
}

fn invalid(msg: String) -> WatermarkError {
    WatermarkError::InvalidParameters(msg)
}

/// A carrier plus its coding and slot selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrategyParams {
    pub strategy: EmbeddingStrategy,
    /// Repetition copies of the Reed-Solomon codeword.
    pub redundancy: u8,
    /// Reed-Solomon parity bytes per block.
    pub parity_bytes: u8,
    /// Use every `stride`-th eligible slot.
    pub stride: u8,
}

impl StrategyParams {
    /// Single copy, 8 parity bytes, every slot.
    pub fn new(strategy: EmbeddingStrategy) -> Self {
        Self { strategy, redundancy: 1, parity_bytes: 8, stride: 1 }
    }

    pub fn with_redundancy(mut self, redundancy: u8) -> Self {
        self.redundancy = redundancy;
        self
    }

    pub fn with_parity(mut self, parity_bytes: u8) -> Self {
        self.parity_bytes = parity_bytes;
        self
    }

    pub fn with_stride(mut self, stride: u8) -> Self {
        self.stride = stride;
        self
    }

    pub fn coding(&self) -> Coding {
        Coding { redundancy: self.redundancy as usize, parity: self.parity_bytes as usize }
    }

    /// Everything the verifier can rediscover is valid; nothing else is.
    pub fn validate(&self, profile: &ConstraintProfile) -> Result<()> {
        self.strategy.validate(profile)?;
        if !REDUNDANCY_CHOICES.contains(&self.redundancy) {
            return Err(invalid(format!("redundancy {} not in {REDUNDANCY_CHOICES:?}", self.redundancy)));
        }
        if !reed_solomon::is_supported_parity(self.parity_bytes as usize) {
            return Err(invalid(format!("parity {} not in {PARITY_CHOICES:?}", self.parity_bytes)));
        }
        if !STRIDE_CHOICES.contains(&self.stride) {
            return Err(invalid(format!("stride {} not in {STRIDE_CHOICES:?}", self.stride)));
        }
        Ok(())
    }
}

impl fmt::Display for StrategyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} r={} rs={} stride={}", self.strategy, self.redundancy, self.parity_bytes, self.stride)
    }
}

fn mismatch(strategy: &EmbeddingStrategy, doc: &Document) -> WatermarkError {
    invalid(format!("{strategy} cannot address a {} document", doc.format()))
}

/// Carrier capacity in raw bits, before error correction.
pub fn capacity_bits(
    doc: &Document,
    profile: &ConstraintProfile,
    params: &StrategyParams,
    ctx: &ExecContext,
) -> Result<usize> {
    let stride = params.stride as usize;
    match (&params.strategy, doc) {
        (EmbeddingStrategy::Fastq { bits_per_quality_unit }, Document::Fastq(f)) => {
            fastq::capacity(f, profile, *bits_per_quality_unit, stride, ctx)
        }
        (EmbeddingStrategy::Vcf { target_info_fields }, Document::Vcf(f)) => {
            vcf::capacity(f, profile, target_info_fields, stride, ctx)
        }
        (EmbeddingStrategy::Dicom { element_tag, max_pixel_delta }, Document::Dicom(f)) => {
            dicom::capacity(f, profile, *element_tag, *max_pixel_delta, stride, ctx)
        }
        (EmbeddingStrategy::TiffWavelet { band_index }, Document::Tiff(f)) => {
            wavelet::capacity(f, profile, *band_index, stride, ctx)
        }
        (EmbeddingStrategy::GenericLsb { bit_plane }, Document::Generic(f)) => {
            lsb::capacity(f, profile, *bit_plane, stride, ctx)
        }
        (s, d) => Err(mismatch(s, d)),
    }
}

/// Write already coded bits into the carrier.
fn write_carrier(
    doc: &Document,
    profile: &ConstraintProfile,
    params: &StrategyParams,
    coded: &[u8],
    ctx: &ExecContext,
) -> Result<(Document, Vec<Violation>)> {
    let stride = params.stride as usize;
    Ok(match (&params.strategy, doc) {
        (EmbeddingStrategy::Fastq { bits_per_quality_unit }, Document::Fastq(f)) => {
            let (out, v) = fastq::embed(f, profile, *bits_per_quality_unit, coded, stride, ctx)?;
            (Document::Fastq(out), v)
        }
        (EmbeddingStrategy::Vcf { target_info_fields }, Document::Vcf(f)) => {
            let (out, v) = vcf::embed(f, profile, target_info_fields, coded, stride, ctx)?;
            (Document::Vcf(out), v)
        }
        (EmbeddingStrategy::Dicom { element_tag, max_pixel_delta }, Document::Dicom(f)) => {
            let (out, v) = dicom::embed(f, profile, *element_tag, *max_pixel_delta, coded, stride, ctx)?;
            (Document::Dicom(out), v)
        }
        (EmbeddingStrategy::TiffWavelet { band_index }, Document::Tiff(f)) => {
            let (out, v) = wavelet::embed(f, profile, *band_index, coded, stride, ctx)?;
            (Document::Tiff(out), v)
        }
        (EmbeddingStrategy::GenericLsb { bit_plane }, Document::Generic(f)) => {
            let (out, v) = lsb::embed(f, profile, *bit_plane, coded, stride, ctx)?;
            (Document::Generic(out), v)
        }
        (s, d) => return Err(mismatch(s, d)),
    })
}

/// Read up to `limit_bits` raw carrier bits as LLRs (positive = 0, zero = unreadable).
pub fn read_carrier(
    doc: &Document,
    profile: &ConstraintProfile,
    params: &StrategyParams,
    limit_bits: usize,
    ctx: &ExecContext,
) -> Result<Vec<f64>> {
    let stride = params.stride as usize;
    match (&params.strategy, doc) {
        (EmbeddingStrategy::Fastq { bits_per_quality_unit }, Document::Fastq(f)) => {
            fastq::read(f, profile, *bits_per_quality_unit, stride, limit_bits, ctx)
        }
        (EmbeddingStrategy::Vcf { target_info_fields }, Document::Vcf(f)) => {
            vcf::read(f, profile, target_info_fields, stride, limit_bits, ctx)
        }
        (EmbeddingStrategy::Dicom { element_tag, max_pixel_delta }, Document::Dicom(f)) => {
            dicom::read(f, profile, *element_tag, *max_pixel_delta, stride, limit_bits, ctx)
        }
        (EmbeddingStrategy::TiffWavelet { band_index }, Document::Tiff(f)) => {
            wavelet::read(f, profile, *band_index, stride, limit_bits, ctx)
        }
        (EmbeddingStrategy::GenericLsb { bit_plane }, Document::Generic(f)) => {
            lsb::read(f, profile, *bit_plane, stride, limit_bits, ctx)
        }
        (s, d) => Err(mismatch(s, d)),
    }
}

/// A successful embed.
#[derive(Debug, Clone)]
pub struct Embedded {
    /// The watermarked document as decoded back from `bytes`.
    pub document: Document,
    pub bytes: Vec<u8>,
    pub report: IntegrityReport,
}

/// Error-correct `payload_bits` and write them into `doc`.
///
/// The result is re-encoded, decoded again and audited against `doc`. Any
/// violation, whether the writer noticed it or only the audit did, fails the
/// embed with [`WatermarkError::ConstraintViolation`] and no bytes escape.
pub fn embed(
    doc: &Document,
    profile: &ConstraintProfile,
    params: &StrategyParams,
    payload_bits: &[u8],
    ctx: &ExecContext,
) -> Result<Embedded> {
    params.validate(profile)?;
    let coded = params.coding().encode(payload_bits);
    let (written, writer_violations) = write_carrier(doc, profile, params, &coded, ctx)?;

    let bytes = codec::encode(&written);
    let document = codec::decode(&bytes, doc.format()).map_err(|e| WatermarkError::format(doc.format(), e))?;
    let mut report = integrity::audit(doc, &document, profile, &params.strategy);
    report.absorb(writer_violations);

    if !report.is_clean() {
        warn!(params = %params, violations = report.violation_count, "embed rejected by integrity audit");
        return Err(WatermarkError::ConstraintViolation(Box::new(report)));
    }
    debug!(
        params = %params,
        coded_bits = coded.len(),
        changed = report.unit_deltas_summary.units_changed,
        max_delta = report.max_delta_observed,
        "carrier written"
    );
    Ok(Embedded { document, bytes, report })
}

/// Read and error-correct `payload_bits` bits.
pub fn extract(
    doc: &Document,
    profile: &ConstraintProfile,
    params: &StrategyParams,
    payload_bits: usize,
    ctx: &ExecContext,
) -> Result<Decoded> {
    let coding = params.coding();
    let llrs = read_carrier(doc, profile, params, coding.coded_bits(payload_bits), ctx)?;
    Ok(coding.decode(&llrs, payload_bits))
}

/// Every carrier of `doc`'s format worth trying: the optimizer's search axis
/// and the verifier's discovery order.
pub fn carriers(doc: &Document, profile: &ConstraintProfile) -> Vec<EmbeddingStrategy> {
    let max_bits = profile.max_bits_per_unit();
    match doc {
        Document::Fastq(_) => (1..=max_bits.min(8) as u8)
            .map(|k| EmbeddingStrategy::Fastq { bits_per_quality_unit: k })
            .collect(),
        Document::Vcf(f) => vcf::free_form_keys(f, profile)
            .into_iter()
            .map(|key| EmbeddingStrategy::Vcf { target_info_fields: vec![key] })
            .collect(),
        Document::Dicom(f) => {
            let widest = profile.max_unit_delta.min(u16::MAX as u32) as u16;
            let mut out: Vec<EmbeddingStrategy> = dicom::existing_elements(f)
                .into_iter()
                .map(|element_tag| EmbeddingStrategy::Dicom { element_tag, max_pixel_delta: widest })
                .collect();
            // Pixel windows narrower than the profile allows read differently.
            for k in 1..=max_bits.min(16) {
                let strategy = EmbeddingStrategy::Dicom {
                    element_tag: dicom::DEFAULT_ELEMENT_TAG,
                    max_pixel_delta: ((1u32 << k) - 1) as u16,
                };
                if !out.contains(&strategy) {
                    out.push(strategy);
                }
            }
            out
        }
        Document::Tiff(_) => (1..=3).map(|band_index| EmbeddingStrategy::TiffWavelet { band_index }).collect(),
        Document::Generic(_) => (0..max_bits.min(8) as u8)
            .map(|bit_plane| EmbeddingStrategy::GenericLsb { bit_plane })
            .collect(),
    }
}
