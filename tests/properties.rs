// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Property tests over generated payloads, files and parameters.

mod common;

use aperture_watermark::codec::dicom::{synthetic_image, DataElement, DicomFile, DicomTag};
use aperture_watermark::codec::fastq::FastqFile;
use aperture_watermark::codec::tiff::{synthetic_stack, TiffFile};
use aperture_watermark::codec::vcf::VcfFile;
use aperture_watermark::strategy::dicom::DEFAULT_ELEMENT_TAG;
use aperture_watermark::dispatch::ExecContext;
use aperture_watermark::strategy::{self, STRIDE_CHOICES};
use aperture_watermark::{
    bounds_for, codec, EmbeddingStrategy, Format, StrategyParams, WatermarkError, WatermarkPayload,
};
use chrono::TimeZone;
use common::*;
use proptest::prelude::*;
use uuid::Uuid;

fn arb_payload() -> impl Strategy<Value = WatermarkPayload> {
    (any::<u128>(), any::<u128>(), any::<u128>(), 0i64..4_000_000_000, any::<u64>()).prop_map(|(r, d, i, t, nonce)| {
        WatermarkPayload {
            recipient_id: Uuid::from_u128(r),
            dataset_id: Uuid::from_u128(d),
            issuance_id: Uuid::from_u128(i),
            issued_at: chrono::Utc.timestamp_opt(t, 0).single().unwrap(),
            nonce,
        }
    })
}

fn arb_fastq_params() -> impl Strategy<Value = StrategyParams> {
    (1u8..=2, prop::sample::select(STRIDE_CHOICES.to_vec()), prop::sample::select(vec![1u8, 3]))
        .prop_map(|(k, stride, r)| {
            StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: k })
                .with_stride(stride)
                .with_redundancy(r)
        })
}

/// Reads with arbitrary qualities, some below the floor.
fn arb_fastq() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(prop::collection::vec(2u8..=41, 150), 60..90).prop_map(|reads| {
        let mut out = Vec::new();
        for (i, q) in reads.iter().enumerate() {
            let seq: String = q.iter().map(|p| ['A', 'C', 'G', 'T'][*p as usize % 4]).collect();
            let qual: String = q.iter().map(|p| (33 + p) as char).collect();
            out.extend_from_slice(format!("@read{i}\n{seq}\n+\n{qual}\n").as_bytes());
        }
        out
    })
}

/// A protected AF value: plain decimals, exponents or missing.
fn arb_af() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..1000).prop_map(|n| format!("0.{n:03}")),
        (1u32..10, 1u32..9).prop_map(|(m, e)| format!("{m}.5e-{e:02}")),
        Just(".".to_string()),
        Just("1".to_string()),
    ]
}

/// Records with random DP, AF and AC, and sometimes a stale `WM` entry.
fn arb_vcf() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec((any::<u32>(), arb_af(), 0u16..500, any::<bool>()), 30..70).prop_map(|records| {
        let mut out = String::from("##fileformat=VCFv4.2\n");
        out.push_str("##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Depth\">\n");
        out.push_str("##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequency\">\n");
        out.push_str("##INFO=<ID=AC,Number=A,Type=Integer,Description=\"Allele count\">\n");
        out.push_str("##INFO=<ID=WM,Number=1,Type=String,Description=\"Annotation\">\n");
        out.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n");
        for (i, (dp, af, ac, stale)) in records.into_iter().enumerate() {
            let info = if stale {
                format!("DP={dp};WM=old;AF={af};AC={ac}")
            } else {
                format!("AC={ac};DP={dp};AF={af}")
            };
            out.push_str(&format!("chr2\t{}\t.\tC\tT\t50\tPASS\t{info}\n", 1000 + i * 11));
        }
        out.into_bytes()
    })
}

/// One 64x64 8-bit page of noise, away from the sample range ends.
fn arb_tiff() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(16u16..240, 64 * 64).prop_map(|page| synthetic_stack(64, 64, 8, &[page]))
}

/// A 32x40 image, mostly padding (0) with tissue in 2..2000, whose private
/// group is taken. With `touch`, one tissue sample sits right next to the
/// padding value.
fn arb_padded_dicom() -> impl Strategy<Value = (Vec<i32>, bool)> {
    let sample = prop_oneof![5 => Just(0i32), 1 => 2i32..2000];
    (prop::collection::vec(sample, 32 * 40), any::<bool>(), any::<prop::sample::Index>()).prop_map(
        |(mut samples, touch, at)| {
            if touch {
                let i = at.index(samples.len());
                samples[i] = 1;
            }
            (samples, touch)
        },
    )
}

fn padded_dicom_bytes(samples: &[i32]) -> Vec<u8> {
    let mut file = synthetic_image(32, 40, samples, false, Some(0));
    file.put_element(DataElement { tag: DicomTag::new(0x0A71, 0x0010), vr: *b"LO", value: b"OTHER VENDOR".to_vec() });
    file.to_bytes()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn fastq_payload_roundtrips(payload in arb_payload(), bytes in arb_fastq(), params in arb_fastq_params()) {
        let wm = engine();
        let profile = bounds_for(Format::Fastq);
        let doc = codec::decode(&bytes, Format::Fastq).unwrap();
        let capacity = strategy::capacity_bits(&doc, &profile, &params, &ExecContext::serial()).unwrap();
        prop_assume!(params.coding().coded_bits(aperture_watermark::frame::FRAME_BITS) <= capacity);

        let out = wm.embed_with(&bytes, Format::Fastq, &payload, &key(), &params).unwrap();
        let found = wm.verify(&out.bytes, Format::Fastq, &key()).unwrap();
        prop_assert!(found.authenticated);
        prop_assert_eq!(found.payload, Some(payload));
    }

    #[test]
    fn fastq_changes_stay_bounded_and_protected(bytes in arb_fastq(), params in arb_fastq_params()) {
        let profile = bounds_for(Format::Fastq);
        let Ok(out) = engine().embed_with(&bytes, Format::Fastq, &payload(), &key(), &params) else {
            return Ok(());
        };
        let before = FastqFile::from_bytes(&bytes).unwrap();
        let after = FastqFile::from_bytes(&out.bytes).unwrap();
        prop_assert_eq!(before.records.len(), after.records.len());
        for (a, b) in before.records.iter().zip(&after.records) {
            prop_assert_eq!(&a.header, &b.header);
            prop_assert_eq!(&a.sequence, &b.sequence);
            for (&qa, &qb) in a.quality.iter().zip(&b.quality) {
                prop_assert!(u32::from(qa.abs_diff(qb)) <= profile.max_unit_delta);
                if qa < 33 + profile.min_quality {
                    prop_assert_eq!(qa, qb, "a unit below the floor was written");
                } else {
                    prop_assert!(qb >= 33 + profile.min_quality);
                }
            }
        }
    }

    #[test]
    fn extraction_is_idempotent(bytes in arb_fastq(), flip in any::<bool>()) {
        let wm = engine();
        let input = if flip {
            let params = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: 1 });
            match wm.embed_with(&bytes, Format::Fastq, &payload(), &key(), &params) {
                Ok(out) => out.bytes,
                Err(_) => bytes.clone(),
            }
        } else {
            bytes.clone()
        };
        let first = wm.verify(&input, Format::Fastq, &key()).unwrap();
        let second = wm.verify(&input, Format::Fastq, &key()).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn generic_header_is_never_written(len in 1200usize..3000) {
        let bytes = blob(len);
        let params = StrategyParams::new(EmbeddingStrategy::GenericLsb { bit_plane: 0 });
        if let Ok(out) = engine().embed_with(&bytes, Format::Generic, &payload(), &key(), &params) {
            prop_assert_eq!(&out.bytes[..64], &bytes[..64]);
            prop_assert_eq!(out.bytes.len(), bytes.len());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn capacity_grows_with_data(reads in 1usize..40, extra in 1usize..40, k in 1u8..=2) {
        let profile = bounds_for(Format::Fastq);
        let ctx = ExecContext::serial();
        let params = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: k });
        let small = codec::decode(&fastq(reads, 50), Format::Fastq).unwrap();
        let large = codec::decode(&fastq(reads + extra, 50), Format::Fastq).unwrap();
        let a = strategy::capacity_bits(&small, &profile, &params, &ctx).unwrap();
        let b = strategy::capacity_bits(&large, &profile, &params, &ctx).unwrap();
        prop_assert!(b >= a);
    }

    #[test]
    fn capacity_grows_with_bits_per_unit(
        bytes in arb_fastq(),
        stride in prop::sample::select(STRIDE_CHOICES.to_vec()),
    ) {
        let profile = bounds_for(Format::Fastq);
        let ctx = ExecContext::serial();
        let doc = codec::decode(&bytes, Format::Fastq).unwrap();
        let caps: Vec<usize> = (1..=profile.max_bits_per_unit() as u8)
            .map(|k| {
                let p = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: k }).with_stride(stride);
                strategy::capacity_bits(&doc, &profile, &p, &ctx).unwrap()
            })
            .collect();
        prop_assert!(caps.windows(2).all(|w| w[0] <= w[1]), "{:?}", caps);
    }

    #[test]
    fn capacity_shrinks_with_stride(reads in 1usize..60) {
        let profile = bounds_for(Format::Fastq);
        let ctx = ExecContext::serial();
        let doc = codec::decode(&fastq(reads, 64), Format::Fastq).unwrap();
        let caps: Vec<usize> = STRIDE_CHOICES
            .iter()
            .map(|&s| {
                let p = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: 1 }).with_stride(s);
                strategy::capacity_bits(&doc, &profile, &p, &ctx).unwrap()
            })
            .collect();
        prop_assert!(caps.windows(2).all(|w| w[0] >= w[1]), "{:?}", caps);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn vcf_protected_fields_survive_byte_for_byte(bytes in arb_vcf(), payload in arb_payload()) {
        let wm = engine();
        let params = StrategyParams::new(EmbeddingStrategy::Vcf { target_info_fields: vec!["WM".into()] });
        let out = wm.embed_with(&bytes, Format::Vcf, &payload, &key(), &params).unwrap();

        let before = VcfFile::from_bytes(&bytes).unwrap();
        let after = VcfFile::from_bytes(&out.bytes).unwrap();
        prop_assert_eq!(&before.meta, &after.meta);
        prop_assert_eq!(&before.header, &after.header);
        prop_assert_eq!(before.records.len(), after.records.len());
        for (a, b) in before.records.iter().zip(&after.records) {
            prop_assert_eq!(&a.leading, &b.leading);
            prop_assert_eq!(&a.trailing, &b.trailing);
            for key in ["DP", "AF", "AC"] {
                let value = a.info_value(key).flatten().unwrap();
                prop_assert_eq!(b.info_value(key).flatten(), Some(value));
                let entry = format!("{key}={value}");
                prop_assert!(b.info_string().split(';').any(|e| e == entry), "{} lost", entry);
            }
        }

        let found = wm.verify(&out.bytes, Format::Vcf, &key()).unwrap();
        prop_assert!(found.authenticated);
        prop_assert_eq!(found.payload, Some(payload));
    }

    #[test]
    fn tiff_pixels_move_by_one_and_roundtrip(bytes in arb_tiff(), band_index in 1u8..=3) {
        let wm = engine();
        let params = StrategyParams::new(EmbeddingStrategy::TiffWavelet { band_index });
        let out = wm.embed_with(&bytes, Format::Tiff, &payload(), &key(), &params).unwrap();
        prop_assert!(out.report.min_ssim.unwrap() >= 0.98);

        let (a, b) = (TiffFile::from_bytes(&bytes).unwrap(), TiffFile::from_bytes(&out.bytes).unwrap());
        let (pa, pb) = (a.page_samples(0), b.page_samples(0));
        prop_assert!(pa.iter().zip(&pb).all(|(x, y)| (x - y).abs() <= 1));

        let found = wm.verify(&out.bytes, Format::Tiff, &key()).unwrap();
        prop_assert!(found.authenticated);
        prop_assert_eq!(found.payload, Some(payload()));
    }

    #[test]
    fn dicom_fallback_writes_padding_only((samples, touch) in arb_padded_dicom()) {
        let wm = engine();
        let bytes = padded_dicom_bytes(&samples);
        let strategy = EmbeddingStrategy::Dicom { element_tag: DEFAULT_ELEMENT_TAG, max_pixel_delta: 1 };
        let result = wm.embed_with(&bytes, Format::Dicom, &payload(), &key(), &StrategyParams::new(strategy));
        if touch {
            let is_zero_capacity = matches!(result, Err(WatermarkError::InsufficientCapacity { available: 0, .. }));
            prop_assert!(is_zero_capacity);
            return Ok(());
        }
        let out = result.unwrap();
        let after = DicomFile::from_bytes(&out.bytes).unwrap();
        let layout = after.pixel_layout().unwrap().unwrap();
        for (x, y) in samples.iter().zip(after.pixel_samples(&layout)) {
            if *x == 0 {
                prop_assert!(y == 0 || y == 1);
            } else {
                prop_assert_eq!(*x, y, "tissue sample written");
            }
        }
        let found = wm.verify(&out.bytes, Format::Dicom, &key()).unwrap();
        prop_assert!(found.authenticated);
        prop_assert_eq!(found.payload, Some(payload()));
    }
}
