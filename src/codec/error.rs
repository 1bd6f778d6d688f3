// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Error types for scientific file parsing and encoding.

use thiserror::Error;

/// Errors raised while decoding or re-encoding a scientific file.
///
/// Every variant is fatal: the codecs never attempt best-effort recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    /// Input data is too short or truncated.
    #[error("unexpected end of data")]
    UnexpectedEof,
    /// Input is empty where at least one record is required.
    #[error("input contains no records")]
    Empty,
    /// FASTQ structural problem at a 1-based line number.
    #[error("FASTQ line {line}: {reason}")]
    Fastq { line: usize, reason: &'static str },
    /// VCF structural problem at a 1-based line number.
    #[error("VCF line {line}: {reason}")]
    Vcf { line: usize, reason: &'static str },
    /// Missing `DICM` magic after the 128-byte preamble.
    #[error("missing DICM magic (not a DICOM Part 10 file)")]
    NotDicom,
    /// DICOM element table is inconsistent.
    #[error("invalid DICOM element ({group:04X},{element:04X}): {reason}")]
    DicomElement { group: u16, element: u16, reason: &'static str },
    /// TIFF header or IFD chain is invalid.
    #[error("invalid TIFF: {0}")]
    Tiff(&'static str),
    /// The file is well-formed but uses a feature this codec does not handle.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    /// The input is not valid UTF-8 where text is required.
    #[error("text content is not valid UTF-8")]
    InvalidUtf8,
}

pub type Result<T> = std::result::Result<T, FormatError>;
