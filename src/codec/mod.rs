// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Format codecs: scientific file bytes <-> addressable structure.
//!
//! Every codec is lossless for the bytes a strategy does not modify, and
//! rejects malformed input with a [`FormatError`] instead of guessing.

pub mod error;
pub mod fastq;
pub mod vcf;
pub mod dicom;
pub mod tiff;
pub mod raw;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use error::FormatError;
use dicom::DicomFile;
use fastq::FastqFile;
use raw::RawFile;
use tiff::TiffFile;
use vcf::VcfFile;

/// Supported file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Fastq,
    Vcf,
    Dicom,
    Tiff,
    Generic,
}

impl Format {
    pub const ALL: [Format; 5] = [Format::Fastq, Format::Vcf, Format::Dicom, Format::Tiff, Format::Generic];

    /// Stable one-byte tag bound into the AEAD associated data.
    pub fn tag_byte(self) -> u8 {
        match self {
            Format::Fastq => 0x01,
            Format::Vcf => 0x02,
            Format::Dicom => 0x03,
            Format::Tiff => 0x04,
            Format::Generic => 0x0F,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Fastq => "FASTQ",
            Format::Vcf => "VCF",
            Format::Dicom => "DICOM",
            Format::Tiff => "TIFF",
            Format::Generic => "generic",
        };
        f.write_str(name)
    }
}

/// A decoded file: the structured, addressable unit sequence of its format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    Fastq(FastqFile),
    Vcf(VcfFile),
    Dicom(DicomFile),
    Tiff(TiffFile),
    Generic(RawFile),
}

impl Document {
    pub fn format(&self) -> Format {
        match self {
            Document::Fastq(_) => Format::Fastq,
            Document::Vcf(_) => Format::Vcf,
            Document::Dicom(_) => Format::Dicom,
            Document::Tiff(_) => Format::Tiff,
            Document::Generic(_) => Format::Generic,
        }
    }
}

/// Decode file bytes as the given format.
pub fn decode(bytes: &[u8], format: Format) -> Result<Document, FormatError> {
    Ok(match format {
        Format::Fastq => Document::Fastq(FastqFile::from_bytes(bytes)?),
        Format::Vcf => Document::Vcf(VcfFile::from_bytes(bytes)?),
        Format::Dicom => Document::Dicom(DicomFile::from_bytes(bytes)?),
        Format::Tiff => Document::Tiff(TiffFile::from_bytes(bytes)?),
        Format::Generic => Document::Generic(RawFile::from_bytes(bytes)?),
    })
}

/// Re-encode a document to bytes.
pub fn encode(doc: &Document) -> Vec<u8> {
    match doc {
        Document::Fastq(f) => f.to_bytes(),
        Document::Vcf(f) => f.to_bytes(),
        Document::Dicom(f) => f.to_bytes(),
        Document::Tiff(f) => f.to_bytes(),
        Document::Generic(f) => f.to_bytes(),
    }
}

// --- Line-oriented text helpers shared by FASTQ and VCF ---

/// Line terminator convention of a text file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LineStyle {
    crlf: bool,
    trailing_newline: bool,
}

impl Default for LineStyle {
    fn default() -> Self {
        Self { crlf: false, trailing_newline: true }
    }
}

/// Split text into lines without terminators.
///
/// The convention is taken from the first line; any deviation returns the
/// 1-based number of the offending line.
pub(crate) fn split_lines(data: &[u8]) -> Result<(Vec<&[u8]>, LineStyle), usize> {
    if data.is_empty() {
        return Ok((Vec::new(), LineStyle::default()));
    }
    let crlf = match data.iter().position(|&b| b == b'\n') {
        Some(pos) => pos > 0 && data[pos - 1] == b'\r',
        None => false,
    };
    let trailing_newline = data.last() == Some(&b'\n');
    let body = if trailing_newline { &data[..data.len() - 1] } else { data };

    let raw_lines: Vec<&[u8]> = body.split(|&b| b == b'\n').collect();
    let last = raw_lines.len() - 1;
    let mut lines = Vec::with_capacity(raw_lines.len());
    for (idx, raw) in raw_lines.into_iter().enumerate() {
        let has_cr = raw.last() == Some(&b'\r');
        // The final line of a file without a trailing newline carries no terminator.
        let terminated = trailing_newline || idx != last;
        if has_cr != (crlf && terminated) {
            return Err(idx + 1);
        }
        lines.push(if has_cr { &raw[..raw.len() - 1] } else { raw });
    }
    Ok((lines, LineStyle { crlf, trailing_newline }))
}

/// Join lines with the given convention.
pub(crate) fn join_lines<'a>(lines: impl IntoIterator<Item = &'a [u8]>, style: LineStyle) -> Vec<u8> {
    let eol: &[u8] = if style.crlf { b"\r\n" } else { b"\n" };
    let mut out = Vec::new();
    let mut first = true;
    for line in lines {
        if !first {
            out.extend_from_slice(eol);
        }
        out.extend_from_slice(line);
        first = false;
    }
    if style.trailing_newline && !first {
        out.extend_from_slice(eol);
    }
    out
}
