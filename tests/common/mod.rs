// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use aperture_watermark::codec::dicom::{synthetic_image, DataElement, DicomTag};
use aperture_watermark::codec::fastq::{FastqFile, FastqRecord};
use aperture_watermark::codec::tiff::synthetic_stack;
use aperture_watermark::{DatasetKey, EngineConfig, Watermarker, WatermarkPayload};
use chrono::TimeZone;
use uuid::Uuid;

pub fn key() -> DatasetKey {
    DatasetKey::from_bytes([0x5A; 32])
}

/// A fixed payload, so separate calls compare equal.
pub fn payload() -> WatermarkPayload {
    WatermarkPayload {
        recipient_id: Uuid::from_u128(0xA11CE),
        dataset_id: Uuid::from_u128(0xDA7A),
        issuance_id: Uuid::from_u128(0x0001_5500),
        issued_at: chrono::Utc.timestamp_opt(1_760_000_000, 0).single().unwrap(),
        nonce: 0x0123_4567_89AB_CDEF,
    }
}

/// Single-worker engine with small chunks so every dispatch splits.
pub fn engine() -> Watermarker {
    Watermarker::new(EngineConfig { worker_count: 1, chunk_units: 500, ..EngineConfig::default() }).unwrap()
}

/// Reads with qualities cycling through Phred 20..=39.
pub fn fastq(reads: usize, len: usize) -> Vec<u8> {
    let records = (0..reads)
        .map(|i| FastqRecord {
            header: format!("@SRR000001.{i} length={len}").into_bytes(),
            sequence: (0..len).map(|j| b"ACGT"[(i * 3 + j) % 4]).collect(),
            separator: b"+".to_vec(),
            quality: (0..len).map(|j| 33 + 20 + ((i * 7 + j) % 20) as u8).collect(),
        })
        .collect();
    FastqFile::from_records(records).to_bytes()
}

/// A VCF with one free-form `WM` key next to the protected DP and AF keys.
pub fn vcf(records: usize, with_free_key: bool) -> Vec<u8> {
    let mut out = String::from("##fileformat=VCFv4.2\n");
    out.push_str("##INFO=<ID=DP,Number=1,Type=Integer,Description=\"Total depth\">\n");
    out.push_str("##INFO=<ID=AF,Number=A,Type=Float,Description=\"Allele frequency\">\n");
    if with_free_key {
        out.push_str("##INFO=<ID=WM,Number=1,Type=String,Description=\"Annotation\">\n");
    }
    out.push_str("#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tS1\n");
    for i in 0..records {
        out.push_str(&format!(
            "chr1\t{}\trs{}\tA\tG\t{}\tPASS\tDP={};AF=0.{}\tGT:GQ\t0/1:{}\n",
            10_000 + i * 37,
            i,
            30 + i % 40,
            10 + i % 90,
            1 + i % 9,
            20 + i % 60
        ));
    }
    out.into_bytes()
}

/// A 16-bit DICOM image whose first `padded` samples hold the padding value 0.
pub fn dicom(rows: u16, columns: u16, padded: usize, padding: bool) -> Vec<u8> {
    let n = rows as usize * columns as usize;
    let samples: Vec<i32> = (0..n).map(|i| if i < padded { 0 } else { 400 + (i % 300) as i32 }).collect();
    synthetic_image(rows, columns, &samples, false, padding.then_some(0)).to_bytes()
}

/// Same image, with our private group already claimed by another vendor.
pub fn dicom_foreign_creator(rows: u16, columns: u16, padded: usize) -> Vec<u8> {
    let n = rows as usize * columns as usize;
    let samples: Vec<i32> = (0..n).map(|i| if i < padded { 0 } else { 400 + (i % 300) as i32 }).collect();
    let mut file = synthetic_image(rows, columns, &samples, false, Some(0));
    file.put_element(DataElement { tag: DicomTag::new(0x0A71, 0x0010), vr: *b"LO", value: b"OTHER VENDOR".to_vec() });
    file.to_bytes()
}

/// Textured 8-bit grayscale page.
pub fn tiff_page(width: u32, height: u32, seed: u32) -> Vec<u16> {
    (0..height)
        .flat_map(|y| (0..width).map(move |x| ((x * 13 + y * 7 + seed * 31) % 200 + 30) as u16))
        .collect()
}

pub fn tiff(width: u32, height: u32, pages: u32) -> Vec<u8> {
    let pages: Vec<Vec<u16>> = (0..pages).map(|p| tiff_page(width, height, p)).collect();
    synthetic_stack(width, height, 8, &pages)
}

/// Opaque bytes: a recognizable header followed by a pseudo-random body.
pub fn blob(len: usize) -> Vec<u8> {
    let mut out = b"BLOB\x00\x01".to_vec();
    let mut x = 0x1234_5678u32;
    while out.len() < len {
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        out.push(x as u8);
    }
    out
}
