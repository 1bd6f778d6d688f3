// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Post-embed integrity audit.
//!
//! The audit compares the original document with the re-decoded watermarked
//! document unit by unit. It is independent of how the strategy wrote its
//! bits: whatever the strategy believes, a unit delta above the profile
//! bound or a changed protected field ends up in
//! [`IntegrityReport::constraint_violations`] and the embed is rejected.

use serde::{Deserialize, Serialize};

use super::{dicom as dicom_strategy, vcf as vcf_strategy, EmbeddingStrategy};
use crate::codec::dicom::{DicomFile, PIXEL_DATA};
use crate::codec::fastq::FastqFile;
use crate::codec::raw::RawFile;
use crate::codec::tiff::TiffFile;
use crate::codec::vcf::VcfFile;
use crate::codec::Document;
use crate::profile::{ConstraintProfile, FieldRef};

/// Violations beyond this count are counted but not listed.
pub const MAX_LISTED_VIOLATIONS: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// A unit moved further than the profile allows.
    DeltaExceeded { delta: u32, limit: u32 },
    /// A protected field or region changed.
    ProtectedRegion { field: FieldRef },
    /// A FASTQ quality below the floor was written.
    BelowQualityFloor { phred: u8 },
    /// No in-bounds value encodes the required symbol.
    Unwritable,
    /// Post-embed structural similarity fell below the profile minimum.
    FidelityBelowThreshold { page: usize, ssim: f64, min: f64 },
    /// Bytes outside the strategy's carrier changed.
    StructureChanged { detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Global unit index (quality score, record, sample or byte).
    pub unit: usize,
    #[serde(flatten)]
    pub kind: ViolationKind,
}

/// Aggregate unit deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeltaSummary {
    pub units_examined: usize,
    pub units_changed: usize,
    pub total_delta: u64,
    /// Mean absolute delta over all examined units.
    pub mean_delta: f64,
    /// Fraction of examined units that changed.
    pub change_rate: f64,
}

/// Output of every embed: what changed and whether it was allowed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub unit_deltas_summary: DeltaSummary,
    pub max_delta_observed: u32,
    /// At most [`MAX_LISTED_VIOLATIONS`] entries.
    pub constraint_violations: Vec<Violation>,
    /// Total violations including unlisted ones.
    pub violation_count: usize,
    /// Lowest per-page mean SSIM, for image formats with a fidelity check.
    pub min_ssim: Option<f64>,
}

impl IntegrityReport {
    /// No violation of any kind.
    pub fn is_clean(&self) -> bool {
        self.violation_count == 0
    }

    pub(crate) fn violate(&mut self, unit: usize, kind: ViolationKind) {
        self.violation_count += 1;
        if self.constraint_violations.len() < MAX_LISTED_VIOLATIONS {
            self.constraint_violations.push(Violation { unit, kind });
        }
    }

    /// Record one unit's delta against `limit`.
    pub(crate) fn observe(&mut self, unit: usize, delta: u32, limit: u32) {
        let s = &mut self.unit_deltas_summary;
        s.units_examined += 1;
        if delta > 0 {
            s.units_changed += 1;
            s.total_delta += delta as u64;
            self.max_delta_observed = self.max_delta_observed.max(delta);
        }
        if delta > limit {
            self.violate(unit, ViolationKind::DeltaExceeded { delta, limit });
        }
    }

    /// Fold in violations reported by the writer itself.
    pub(crate) fn absorb(&mut self, violations: Vec<Violation>) {
        for v in violations {
            self.violate(v.unit, v.kind);
        }
    }

    fn finish(mut self) -> Self {
        let s = &mut self.unit_deltas_summary;
        if s.units_examined > 0 {
            s.mean_delta = s.total_delta as f64 / s.units_examined as f64;
            s.change_rate = s.units_changed as f64 / s.units_examined as f64;
        }
        self
    }
}

fn structure(report: &mut IntegrityReport, unit: usize, detail: impl Into<String>) {
    report.violate(unit, ViolationKind::StructureChanged { detail: detail.into() });
}

/// Audit `after` against `before` under `profile`.
pub fn audit(
    before: &Document,
    after: &Document,
    profile: &ConstraintProfile,
    strategy: &EmbeddingStrategy,
) -> IntegrityReport {
    let mut report = IntegrityReport::default();
    match (before, after) {
        (Document::Fastq(a), Document::Fastq(b)) => audit_fastq(a, b, profile, &mut report),
        (Document::Vcf(a), Document::Vcf(b)) => audit_vcf(a, b, profile, strategy, &mut report),
        (Document::Dicom(a), Document::Dicom(b)) => audit_dicom(a, b, profile, strategy, &mut report),
        (Document::Tiff(a), Document::Tiff(b)) => audit_tiff(a, b, profile, &mut report),
        (Document::Generic(a), Document::Generic(b)) => audit_raw(a, b, profile, &mut report),
        _ => structure(&mut report, 0, "document format changed"),
    }
    report.finish()
}

fn audit_fastq(a: &FastqFile, b: &FastqFile, profile: &ConstraintProfile, report: &mut IntegrityReport) {
    if a.records.len() != b.records.len() {
        return structure(report, 0, "record count changed");
    }
    let mut unit = 0usize;
    for (ra, rb) in a.records.iter().zip(&b.records) {
        if ra.header != rb.header || ra.separator != rb.separator {
            report.violate(unit, ViolationKind::ProtectedRegion { field: FieldRef::FastqHeader });
        }
        if ra.sequence != rb.sequence {
            report.violate(unit, ViolationKind::ProtectedRegion { field: FieldRef::FastqSequence });
        }
        if ra.quality.len() != rb.quality.len() {
            structure(report, unit, "quality length changed");
            unit += ra.quality.len();
            continue;
        }
        for i in 0..ra.quality.len() {
            let (qa, qb) = (ra.phred(i), rb.phred(i));
            let delta = qa.abs_diff(qb) as u32;
            report.observe(unit + i, delta, profile.max_unit_delta);
            if delta > 0 && qa < profile.min_quality {
                report.violate(unit + i, ViolationKind::BelowQualityFloor { phred: qa });
            }
        }
        unit += ra.quality.len();
    }
}

fn audit_vcf(
    a: &VcfFile,
    b: &VcfFile,
    profile: &ConstraintProfile,
    strategy: &EmbeddingStrategy,
    report: &mut IntegrityReport,
) {
    if a.meta != b.meta || a.header != b.header {
        structure(report, 0, "header lines changed");
    }
    if a.records.len() != b.records.len() {
        return structure(report, 0, "record count changed");
    }
    let target = match strategy {
        EmbeddingStrategy::Vcf { target_info_fields } => vcf_strategy::select_target(a, profile, target_info_fields),
        _ => None,
    };
    for (unit, (ra, rb)) in a.records.iter().zip(&b.records).enumerate() {
        if ra.leading != rb.leading || ra.trailing != rb.trailing {
            structure(report, unit, "fixed or sample columns changed");
        }
        for field in &profile.protected_regions {
            if let FieldRef::InfoField { key } = field {
                if ra.info_value(key) != rb.info_value(key) {
                    report.violate(unit, ViolationKind::ProtectedRegion { field: field.clone() });
                }
            }
        }
        let is_target = |e: &&crate::codec::vcf::InfoEntry| Some(e.key.as_str()) == target;
        let others_a = ra.info.iter().filter(|e| !is_target(e));
        let others_b = rb.info.iter().filter(|e| !is_target(e));
        if !others_a.eq(others_b) {
            structure(report, unit, "non-target INFO entries changed");
        }
        let delta = match target {
            Some(key) if ra.info_value(key) != rb.info_value(key) => 1,
            _ => 0,
        };
        report.observe(unit, delta, profile.max_unit_delta);
    }
}

fn audit_dicom(
    a: &DicomFile,
    b: &DicomFile,
    profile: &ConstraintProfile,
    strategy: &EmbeddingStrategy,
    report: &mut IntegrityReport,
) {
    let (own, limit) = match strategy {
        EmbeddingStrategy::Dicom { element_tag, max_pixel_delta } => (
            dicom_strategy::owned_tags(*element_tag),
            profile.max_unit_delta.min(*max_pixel_delta as u32),
        ),
        _ => (Vec::new(), profile.max_unit_delta),
    };
    let keep = |e: &&crate::codec::dicom::DataElement| e.tag != PIXEL_DATA && !own.contains(&e.tag);
    let mut ea = a.elements.iter().filter(keep);
    let mut eb = b.elements.iter().filter(keep);
    loop {
        match (ea.next(), eb.next()) {
            (None, None) => break,
            (Some(x), Some(y)) if x == y => {}
            (x, y) => {
                let tag = x.or(y).map(|e| e.tag);
                match tag {
                    Some(tag) if profile.protects_tag(tag) => {
                        report.violate(0, ViolationKind::ProtectedRegion { field: FieldRef::DicomElement { tag } })
                    }
                    Some(tag) => structure(report, 0, format!("element {tag} changed")),
                    None => structure(report, 0, "element list changed"),
                }
                break;
            }
        }
    }

    let (Ok(la), Ok(lb)) = (a.pixel_layout(), b.pixel_layout()) else {
        return structure(report, 0, "pixel layout unreadable");
    };
    match (la, lb) {
        (Some(la), Some(lb)) if la == lb => {
            let (pa, pb) = (a.pixel_samples(&la), b.pixel_samples(&lb));
            for (unit, (x, y)) in pa.iter().zip(&pb).enumerate() {
                report.observe(unit, x.abs_diff(*y), limit);
                if x != y && la.padding.is_some_and(|pad| pad != *x) {
                    let field = FieldRef::DicomElement { tag: PIXEL_DATA };
                    report.violate(unit, ViolationKind::ProtectedRegion { field });
                }
            }
        }
        (None, None) => {}
        _ => structure(report, 0, "pixel layout changed"),
    }
}

fn audit_tiff(a: &TiffFile, b: &TiffFile, profile: &ConstraintProfile, report: &mut IntegrityReport) {
    if a.pages != b.pages {
        return structure(report, 0, "page geometry changed");
    }
    let mut base = 0usize;
    let mut min_ssim = f64::INFINITY;
    for (idx, page) in a.pages.iter().enumerate() {
        let (pa, pb) = (a.page_samples(idx), b.page_samples(idx));
        for (i, (x, y)) in pa.iter().zip(&pb).enumerate() {
            report.observe(base + i, x.abs_diff(*y), profile.max_unit_delta);
        }
        let ssim = mean_ssim(&pa, &pb, page.width, page.height, page.max_sample());
        min_ssim = min_ssim.min(ssim);
        if ssim < profile.min_ssim {
            report.violate(base, ViolationKind::FidelityBelowThreshold { page: idx, ssim, min: profile.min_ssim });
        }
        base += page.sample_count();
    }
    if min_ssim.is_finite() {
        report.min_ssim = Some(min_ssim);
    }
}

fn audit_raw(a: &RawFile, b: &RawFile, profile: &ConstraintProfile, report: &mut IntegrityReport) {
    if a.bytes.len() != b.bytes.len() {
        return structure(report, 0, "length changed");
    }
    for (unit, (&x, &y)) in a.bytes.iter().zip(&b.bytes).enumerate() {
        report.observe(unit, x.abs_diff(y) as u32, profile.max_unit_delta);
        if x != y {
            if let Some(field) = profile
                .protected_regions
                .iter()
                .find(|f| matches!(**f, FieldRef::ByteRange { start, end } if (start..end).contains(&unit)))
            {
                report.violate(unit, ViolationKind::ProtectedRegion { field: field.clone() });
            }
        }
    }
}

/// SSIM window edge length.
const SSIM_WINDOW: usize = 8;

/// Mean SSIM over non-overlapping 8x8 windows.
///
/// Images smaller than one window are compared as a single window.
pub fn mean_ssim(a: &[i32], b: &[i32], width: usize, height: usize, max_value: i32) -> f64 {
    if a.is_empty() || width == 0 || height == 0 {
        return 1.0;
    }
    let l = max_value as f64;
    let c1 = (0.01 * l).powi(2);
    let c2 = (0.03 * l).powi(2);
    let (ww, wh) = (SSIM_WINDOW.min(width), SSIM_WINDOW.min(height));

    let mut total = 0.0;
    let mut windows = 0usize;
    for wy in (0..=height - wh).step_by(wh) {
        for wx in (0..=width - ww).step_by(ww) {
            let n = (ww * wh) as f64;
            let (mut sa, mut sb) = (0.0, 0.0);
            for y in wy..wy + wh {
                for x in wx..wx + ww {
                    sa += a[y * width + x] as f64;
                    sb += b[y * width + x] as f64;
                }
            }
            let (ma, mb) = (sa / n, sb / n);
            let (mut va, mut vb, mut cov) = (0.0, 0.0, 0.0);
            for y in wy..wy + wh {
                for x in wx..wx + ww {
                    let da = a[y * width + x] as f64 - ma;
                    let db = b[y * width + x] as f64 - mb;
                    va += da * da;
                    vb += db * db;
                    cov += da * db;
                }
            }
            let (va, vb, cov) = (va / n, vb / n, cov / n);
            total += ((2.0 * ma * mb + c1) * (2.0 * cov + c2)) / ((ma * ma + mb * mb + c1) * (va + vb + c2));
            windows += 1;
        }
    }
    total / windows as f64
}
