// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! FASTQ reader/writer.
//!
//! Records are the classic four-line layout:
//!
//! ```text
//! @read-id description
//! ACGTN...
//! +[optional repeat of the id]
//! IIII#...            Phred+33 quality string
//! ```
//!
//! The quality string is the only part a strategy may touch. Everything else
//! (line endings, final newline, separator lines) is kept byte-for-byte.

use super::error::{FormatError, Result};
use super::{join_lines, split_lines, LineStyle};

/// ASCII offset of Phred+33 quality encoding.
pub const PHRED_OFFSET: u8 = 33;

/// Highest Phred value representable in printable ASCII (`~`).
pub const MAX_PHRED: u8 = b'~' - PHRED_OFFSET;

/// A single FASTQ record, stored without line terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqRecord {
    pub header: Vec<u8>,
    pub sequence: Vec<u8>,
    pub separator: Vec<u8>,
    pub quality: Vec<u8>,
}

impl FastqRecord {
    /// Phred value of the quality character at `idx`.
    pub fn phred(&self, idx: usize) -> u8 {
        self.quality[idx] - PHRED_OFFSET
    }

    /// Overwrite the quality at `idx` with a Phred value.
    pub fn set_phred(&mut self, idx: usize, phred: u8) {
        debug_assert!(phred <= MAX_PHRED);
        self.quality[idx] = phred + PHRED_OFFSET;
    }
}

/// A parsed FASTQ file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FastqFile {
    pub records: Vec<FastqRecord>,
    style: LineStyle,
}

impl FastqFile {
    /// Build a file from records, using `\n` endings and a final newline.
    pub fn from_records(records: Vec<FastqRecord>) -> Self {
        Self { records, style: LineStyle::default() }
    }

    /// Total number of quality units across all records.
    pub fn quality_units(&self) -> usize {
        self.records.iter().map(|r| r.quality.len()).sum()
    }

    /// Parse FASTQ bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(FormatError::Empty);
        }
        let (lines, style) = split_lines(data)
            .map_err(|line| FormatError::Fastq { line, reason: "mixed line endings" })?;

        if lines.len() % 4 != 0 {
            return Err(FormatError::Fastq {
                line: lines.len() + 1,
                reason: "line count is not a multiple of four",
            });
        }

        let mut records = Vec::with_capacity(lines.len() / 4);
        for (rec_idx, group) in lines.chunks_exact(4).enumerate() {
            let base_line = rec_idx * 4 + 1;
            if group[0].first() != Some(&b'@') {
                return Err(FormatError::Fastq { line: base_line, reason: "header must start with '@'" });
            }
            if group[2].first() != Some(&b'+') {
                return Err(FormatError::Fastq { line: base_line + 2, reason: "separator must start with '+'" });
            }
            if group[1].len() != group[3].len() {
                return Err(FormatError::Fastq {
                    line: base_line + 3,
                    reason: "sequence and quality lengths differ",
                });
            }
            if group[3].iter().any(|&q| !(b'!'..=b'~').contains(&q)) {
                return Err(FormatError::Fastq { line: base_line + 3, reason: "quality byte out of Phred+33 range" });
            }
            records.push(FastqRecord {
                header: group[0].to_vec(),
                sequence: group[1].to_vec(),
                separator: group[2].to_vec(),
                quality: group[3].to_vec(),
            });
        }

        if records.is_empty() {
            return Err(FormatError::Empty);
        }

        Ok(Self { records, style })
    }

    /// Serialize back to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        join_lines(
            self.records
                .iter()
                .flat_map(|r| [&r.header[..], &r.sequence[..], &r.separator[..], &r.quality[..]]),
            self.style,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] = b"@r1 desc\nACGT\n+\nIIII\n@r2\nNNAC\n+r2\n#!I5\n";

    #[test]
    fn roundtrip_lf() {
        let f = FastqFile::from_bytes(SAMPLE).unwrap();
        assert_eq!(f.records.len(), 2);
        assert_eq!(f.records[0].phred(0), 40);
        assert_eq!(f.records[1].phred(1), 0);
        assert_eq!(f.to_bytes(), SAMPLE);
    }

    #[test]
    fn roundtrip_crlf_without_final_newline() {
        let data = b"@r1\r\nAC\r\n+\r\nII\r\n@r2\r\nGG\r\n+\r\n55";
        let f = FastqFile::from_bytes(data).unwrap();
        assert_eq!(f.records.len(), 2);
        assert_eq!(f.records[1].quality, b"55");
        assert_eq!(f.to_bytes(), data.to_vec());
    }

    #[test]
    fn length_mismatch_rejected() {
        let err = FastqFile::from_bytes(b"@r1\nACGT\n+\nIII\n").unwrap_err();
        assert!(matches!(err, FormatError::Fastq { line: 4, .. }), "{err:?}");
    }

    #[test]
    fn truncated_record_rejected() {
        let err = FastqFile::from_bytes(b"@r1\nACGT\n+\n").unwrap_err();
        assert!(matches!(err, FormatError::Fastq { .. }));
    }

    #[test]
    fn bad_header_rejected() {
        assert!(FastqFile::from_bytes(b">r1\nACGT\n+\nIIII\n").is_err());
        assert!(FastqFile::from_bytes(b"@r1\nACGT\n-\nIIII\n").is_err());
    }

    #[test]
    fn mixed_line_endings_rejected() {
        assert!(FastqFile::from_bytes(b"@r1\r\nACGT\n+\r\nIIII\r\n").is_err());
    }

    #[test]
    fn empty_rejected() {
        assert_eq!(FastqFile::from_bytes(b"").unwrap_err(), FormatError::Empty);
    }

    #[test]
    fn set_phred_updates_ascii() {
        let mut f = FastqFile::from_bytes(SAMPLE).unwrap();
        f.records[0].set_phred(2, 37);
        assert_eq!(f.records[0].quality, b"IIFI");
    }
}
