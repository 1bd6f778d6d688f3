// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! VCF reader/writer.
//!
//! Only the INFO column is parsed into structure; all other columns are kept
//! as opaque strings so that re-encoding is byte-identical.

use super::error::{FormatError, Result};
use super::{join_lines, split_lines, LineStyle};

/// Minimum number of tab-separated columns in a VCF data line.
const MIN_COLUMNS: usize = 8;

/// Zero-based index of the INFO column.
const INFO_COLUMN: usize = 7;

/// One `KEY[=VALUE]` entry of an INFO column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoEntry {
    pub key: String,
    pub value: Option<String>,
}

/// A VCF data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfRecord {
    /// CHROM..FILTER.
    pub leading: Vec<String>,
    /// INFO entries in file order. Empty means `.`.
    pub info: Vec<InfoEntry>,
    /// FORMAT and sample columns.
    pub trailing: Vec<String>,
}

impl VcfRecord {
    /// Value of an INFO key. `Some(None)` for a present flag.
    pub fn info_value(&self, key: &str) -> Option<Option<&str>> {
        self.info.iter().find(|e| e.key == key).map(|e| e.value.as_deref())
    }

    /// Set (or append) an INFO key to a value, keeping all other entries in place.
    pub fn set_info(&mut self, key: &str, value: String) {
        match self.info.iter_mut().find(|e| e.key == key) {
            Some(entry) => entry.value = Some(value),
            None => self.info.push(InfoEntry { key: key.to_string(), value: Some(value) }),
        }
    }

    /// Render the INFO column as it appears in the file.
    pub fn info_string(&self) -> String {
        if self.info.is_empty() {
            return ".".to_string();
        }
        let parts: Vec<String> = self
            .info
            .iter()
            .map(|e| match &e.value {
                Some(v) => format!("{}={}", e.key, v),
                None => e.key.clone(),
            })
            .collect();
        parts.join(";")
    }

    fn to_line(&self) -> String {
        let mut cols: Vec<&str> = self.leading.iter().map(String::as_str).collect();
        let info = self.info_string();
        cols.push(&info);
        cols.extend(self.trailing.iter().map(String::as_str));
        cols.join("\t")
    }
}

/// A parsed VCF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfFile {
    /// `##` meta lines, verbatim.
    pub meta: Vec<String>,
    /// The `#CHROM` header line, verbatim.
    pub header: String,
    pub records: Vec<VcfRecord>,
    style: LineStyle,
}

impl VcfFile {
    /// Parse VCF bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| FormatError::InvalidUtf8)?;
        let (lines, style) = split_lines(text.as_bytes())
            .map_err(|line| FormatError::Vcf { line, reason: "mixed line endings" })?;

        let mut meta = Vec::new();
        let mut header = None;
        let mut records = Vec::new();

        for (idx, raw) in lines.iter().enumerate() {
            let line_no = idx + 1;
            // Line slices come from a validated &str split on ASCII bytes.
            let line = std::str::from_utf8(raw).map_err(|_| FormatError::InvalidUtf8)?;
            if header.is_none() {
                if line.starts_with("##") {
                    meta.push(line.to_string());
                    continue;
                }
                if line.starts_with("#CHROM") {
                    header = Some(line.to_string());
                    continue;
                }
                return Err(FormatError::Vcf { line: line_no, reason: "expected meta or #CHROM header line" });
            }
            records.push(parse_record(line, line_no)?);
        }

        let header = header.ok_or(FormatError::Vcf { line: lines.len(), reason: "missing #CHROM header line" })?;
        Ok(Self { meta, header, records, style })
    }

    /// Serialize back to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut lines: Vec<String> = Vec::with_capacity(self.meta.len() + 1 + self.records.len());
        lines.extend(self.meta.iter().cloned());
        lines.push(self.header.clone());
        lines.extend(self.records.iter().map(VcfRecord::to_line));
        join_lines(lines.iter().map(|l| l.as_bytes()), self.style)
    }

    /// IDs of all `##INFO=<...>` declarations, in header order.
    pub fn declared_info_keys(&self) -> Vec<&str> {
        self.meta
            .iter()
            .filter_map(|line| meta_attr(line.strip_prefix("##INFO=<")?.strip_suffix('>')?, "ID"))
            .collect()
    }

    /// The declared `Type=` of an INFO key from `##INFO=<...>` meta lines.
    pub fn declared_info_type(&self, key: &str) -> Option<&str> {
        self.meta.iter().find_map(|line| {
            let body = line.strip_prefix("##INFO=<")?.strip_suffix('>')?;
            let id = meta_attr(body, "ID")?;
            if id != key {
                return None;
            }
            meta_attr(body, "Type")
        })
    }
}

/// Extract `name=value` from a structured meta line body (values end at `,`).
fn meta_attr<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let mut rest = body;
    loop {
        let (item, tail) = match rest.find(',') {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };
        if let Some(v) = item.strip_prefix(name).and_then(|s| s.strip_prefix('=')) {
            return Some(v);
        }
        // Quoted descriptions may contain commas; they always come after ID and Type.
        if item.starts_with("Description=") {
            return None;
        }
        rest = tail?;
    }
}

fn parse_record(line: &str, line_no: usize) -> Result<VcfRecord> {
    let cols: Vec<&str> = line.split('\t').collect();
    if cols.len() < MIN_COLUMNS {
        return Err(FormatError::Vcf { line: line_no, reason: "fewer than eight columns" });
    }
    let info_col = cols[INFO_COLUMN];
    let info = if info_col == "." {
        Vec::new()
    } else {
        let mut entries = Vec::new();
        for part in info_col.split(';') {
            if part.is_empty() {
                return Err(FormatError::Vcf { line: line_no, reason: "empty INFO entry" });
            }
            let entry = match part.split_once('=') {
                Some((k, v)) => InfoEntry { key: k.to_string(), value: Some(v.to_string()) },
                None => InfoEntry { key: part.to_string(), value: None },
            };
            if entry.key.is_empty() {
                return Err(FormatError::Vcf { line: line_no, reason: "INFO entry without key" });
            }
            entries.push(entry);
        }
        entries
    };
    Ok(VcfRecord {
        leading: cols[..INFO_COLUMN].iter().map(|s| s.to_string()).collect(),
        info,
        trailing: cols[INFO_COLUMN + 1..].iter().map(|s| s.to_string()).collect(),
    })
}
