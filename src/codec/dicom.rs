// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! DICOM Part 10 reader/writer (explicit VR little endian).
//!
//! The data set is kept as a flat list of top-level elements. Sequence and
//! other nested values are opaque byte strings, which keeps re-encoding
//! byte-identical for every element that is not explicitly rewritten.
//!
//! Pixel Data is exposed as a sample vector (`i32` per sample) together with
//! the [`PixelLayout`] read from the image pixel module.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{FormatError, Result};

/// Length of the Part 10 preamble.
const PREAMBLE_LEN: usize = 128;

/// Magic following the preamble.
const MAGIC: &[u8; 4] = b"DICM";

/// Explicit VR little endian transfer syntax UID.
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";

/// VRs encoded with a 2-byte reserved field and 32-bit length.
const LONG_VRS: [&[u8; 2]; 10] = [b"OB", b"OD", b"OF", b"OL", b"OW", b"SQ", b"UC", b"UN", b"UR", b"UT"];

/// A DICOM attribute tag `(group, element)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DicomTag {
    pub group: u16,
    pub element: u16,
}

impl DicomTag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// Private tags live in odd groups above the command/file-meta range.
    pub fn is_private(&self) -> bool {
        self.group % 2 == 1 && self.group > 0x0008
    }

    /// Private creator tags reserve a block: `(gggg,0010)`..`(gggg,00FF)`.
    pub fn is_private_creator(&self) -> bool {
        self.is_private() && (0x0010..=0x00FF).contains(&self.element)
    }

    /// The private creator tag owning this private data element.
    pub fn creator(&self) -> Option<DicomTag> {
        if !self.is_private() || self.element < 0x1000 {
            return None;
        }
        Some(DicomTag::new(self.group, self.element >> 8))
    }
}

impl fmt::Display for DicomTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

pub const TRANSFER_SYNTAX: DicomTag = DicomTag::new(0x0002, 0x0010);
pub const SAMPLES_PER_PIXEL: DicomTag = DicomTag::new(0x0028, 0x0002);
pub const NUMBER_OF_FRAMES: DicomTag = DicomTag::new(0x0028, 0x0008);
pub const ROWS: DicomTag = DicomTag::new(0x0028, 0x0010);
pub const COLUMNS: DicomTag = DicomTag::new(0x0028, 0x0011);
pub const BITS_ALLOCATED: DicomTag = DicomTag::new(0x0028, 0x0100);
pub const PIXEL_REPRESENTATION: DicomTag = DicomTag::new(0x0028, 0x0103);
pub const PIXEL_PADDING_VALUE: DicomTag = DicomTag::new(0x0028, 0x0120);
pub const PIXEL_DATA: DicomTag = DicomTag::new(0x7FE0, 0x0010);

/// One top-level data element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub tag: DicomTag,
    pub vr: [u8; 2],
    pub value: Vec<u8>,
}

impl DataElement {
    fn is_long_form(&self) -> bool {
        LONG_VRS.iter().any(|vr| **vr == self.vr)
    }

    fn read_u16(&self) -> Option<u16> {
        let b = self.value.get(..2)?;
        Some(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn read_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok().map(|s| s.trim_matches(|c| c == ' ' || c == '\0'))
    }
}

/// Geometry and sample format of the Pixel Data element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub rows: usize,
    pub columns: usize,
    pub frames: usize,
    pub samples_per_pixel: usize,
    pub bits_allocated: u16,
    pub signed: bool,
    /// Pixel Padding Value, interpreted with the pixel representation.
    pub padding: Option<i32>,
}

impl PixelLayout {
    pub fn samples_per_frame(&self) -> usize {
        self.rows * self.columns * self.samples_per_pixel
    }

    pub fn total_samples(&self) -> usize {
        self.samples_per_frame() * self.frames
    }

    /// Inclusive range of representable sample values.
    pub fn sample_range(&self) -> (i32, i32) {
        match (self.bits_allocated, self.signed) {
            (8, false) => (0, u8::MAX as i32),
            (8, true) => (i8::MIN as i32, i8::MAX as i32),
            (_, false) => (0, u16::MAX as i32),
            (_, true) => (i16::MIN as i32, i16::MAX as i32),
        }
    }
}

/// A parsed DICOM file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DicomFile {
    preamble: Vec<u8>,
    pub elements: Vec<DataElement>,
}

impl DicomFile {
    /// Parse a Part 10 file.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < PREAMBLE_LEN + MAGIC.len() {
            return Err(FormatError::UnexpectedEof);
        }
        if &data[PREAMBLE_LEN..PREAMBLE_LEN + 4] != MAGIC {
            return Err(FormatError::NotDicom);
        }

        let mut elements = Vec::new();
        let mut pos = PREAMBLE_LEN + 4;
        while pos < data.len() {
            let (elem, next) = read_element(data, pos)?;
            if let Some(prev) = elements.last().map(|e: &DataElement| e.tag) {
                if elem.tag <= prev {
                    return Err(FormatError::DicomElement {
                        group: elem.tag.group,
                        element: elem.tag.element,
                        reason: "tags out of ascending order",
                    });
                }
            }
            elements.push(elem);
            pos = next;
        }

        let file = Self { preamble: data[..PREAMBLE_LEN].to_vec(), elements };
        if let Some(ts) = file.element(TRANSFER_SYNTAX) {
            if ts.read_text() != Some(EXPLICIT_VR_LE) {
                return Err(FormatError::Unsupported("transfer syntax other than explicit VR little endian"));
            }
        }
        // Validate the pixel module eagerly so strategies never see a broken layout.
        file.pixel_layout()?;
        Ok(file)
    }

    /// Serialize back to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body: usize = self.elements.iter().map(|e| 12 + e.value.len()).sum();
        let mut out = Vec::with_capacity(PREAMBLE_LEN + 4 + body);
        out.extend_from_slice(&self.preamble);
        out.extend_from_slice(MAGIC);
        for e in &self.elements {
            out.extend_from_slice(&e.tag.group.to_le_bytes());
            out.extend_from_slice(&e.tag.element.to_le_bytes());
            out.extend_from_slice(&e.vr);
            if e.is_long_form() {
                out.extend_from_slice(&[0, 0]);
                out.extend_from_slice(&(e.value.len() as u32).to_le_bytes());
            } else {
                out.extend_from_slice(&(e.value.len() as u16).to_le_bytes());
            }
            out.extend_from_slice(&e.value);
        }
        out
    }

    pub fn element(&self, tag: DicomTag) -> Option<&DataElement> {
        self.elements.binary_search_by(|e| e.tag.cmp(&tag)).ok().map(|i| &self.elements[i])
    }

    /// Insert or replace an element, keeping ascending tag order.
    pub fn put_element(&mut self, element: DataElement) {
        match self.elements.binary_search_by(|e| e.tag.cmp(&element.tag)) {
            Ok(i) => self.elements[i] = element,
            Err(i) => self.elements.insert(i, element),
        }
    }

    /// Layout of the Pixel Data element, or `None` when the file has no pixels.
    pub fn pixel_layout(&self) -> Result<Option<PixelLayout>> {
        let Some(pixel_data) = self.element(PIXEL_DATA) else {
            return Ok(None);
        };
        let bad = |tag: DicomTag, reason| FormatError::DicomElement { group: tag.group, element: tag.element, reason };
        let read_us = |tag: DicomTag| -> Result<u16> {
            self.element(tag).and_then(DataElement::read_u16).ok_or_else(|| bad(tag, "missing or short US value"))
        };

        let rows = read_us(ROWS)? as usize;
        let columns = read_us(COLUMNS)? as usize;
        let bits_allocated = read_us(BITS_ALLOCATED)?;
        if bits_allocated != 8 && bits_allocated != 16 {
            return Err(FormatError::Unsupported("bits allocated other than 8 or 16"));
        }
        let signed = match self.element(PIXEL_REPRESENTATION) {
            Some(e) => e.read_u16().ok_or_else(|| bad(PIXEL_REPRESENTATION, "short value"))? == 1,
            None => false,
        };
        let samples_per_pixel = match self.element(SAMPLES_PER_PIXEL) {
            Some(e) => e.read_u16().ok_or_else(|| bad(SAMPLES_PER_PIXEL, "short value"))? as usize,
            None => 1,
        };
        let frames = match self.element(NUMBER_OF_FRAMES) {
            Some(e) => e
                .read_text()
                .and_then(|s| s.parse::<usize>().ok())
                .ok_or_else(|| bad(NUMBER_OF_FRAMES, "not an integer string"))?,
            None => 1,
        };
        let padding = match self.element(PIXEL_PADDING_VALUE) {
            Some(e) => {
                let raw = e.read_u16().ok_or_else(|| bad(PIXEL_PADDING_VALUE, "short value"))?;
                Some(if signed { raw as i16 as i32 } else { raw as i32 })
            }
            None => None,
        };

        let layout = PixelLayout { rows, columns, frames, samples_per_pixel, bits_allocated, signed, padding };
        if rows == 0 || columns == 0 || frames == 0 || samples_per_pixel == 0 {
            return Err(bad(PIXEL_DATA, "empty pixel geometry"));
        }
        // Every later size computation is bounded by this one.
        let needed = [columns, samples_per_pixel, frames, bits_allocated as usize / 8]
            .into_iter()
            .try_fold(rows, usize::checked_mul)
            .ok_or_else(|| bad(NUMBER_OF_FRAMES, "pixel geometry overflows"))?;
        if pixel_data.value.len() < needed {
            return Err(bad(PIXEL_DATA, "pixel data shorter than rows x columns x frames"));
        }
        Ok(Some(layout))
    }

    /// All pixel samples in storage order.
    pub fn pixel_samples(&self, layout: &PixelLayout) -> Vec<i32> {
        let Some(pd) = self.element(PIXEL_DATA) else {
            return Vec::new();
        };
        let n = layout.total_samples();
        match (layout.bits_allocated, layout.signed) {
            (8, false) => pd.value[..n].iter().map(|&b| b as i32).collect(),
            (8, true) => pd.value[..n].iter().map(|&b| b as i8 as i32).collect(),
            (_, signed) => pd.value[..2 * n]
                .chunks_exact(2)
                .map(|c| {
                    let raw = u16::from_le_bytes([c[0], c[1]]);
                    if signed { raw as i16 as i32 } else { raw as i32 }
                })
                .collect(),
        }
    }

    /// Write pixel samples back. Samples must already be within the layout range.
    pub fn set_pixel_samples(&mut self, layout: &PixelLayout, samples: &[i32]) {
        let Ok(idx) = self.elements.binary_search_by(|e| e.tag.cmp(&PIXEL_DATA)) else {
            return;
        };
        let value = &mut self.elements[idx].value;
        match layout.bits_allocated {
            8 => {
                for (dst, &s) in value.iter_mut().zip(samples) {
                    *dst = s as u8;
                }
            }
            _ => {
                for (dst, &s) in value.chunks_exact_mut(2).zip(samples) {
                    dst.copy_from_slice(&(s as u16).to_le_bytes());
                }
            }
        }
    }
}

fn read_element(data: &[u8], pos: usize) -> Result<(DataElement, usize)> {
    let header = data.get(pos..pos + 8).ok_or(FormatError::UnexpectedEof)?;
    let tag = DicomTag::new(
        u16::from_le_bytes([header[0], header[1]]),
        u16::from_le_bytes([header[2], header[3]]),
    );
    let vr = [header[4], header[5]];
    if !vr.iter().all(u8::is_ascii_uppercase) {
        return Err(FormatError::DicomElement {
            group: tag.group,
            element: tag.element,
            reason: "invalid VR (implicit VR data sets are not supported)",
        });
    }

    let long = LONG_VRS.iter().any(|v| **v == vr);
    let (len, value_start) = if long {
        let l = data.get(pos + 8..pos + 12).ok_or(FormatError::UnexpectedEof)?;
        (u32::from_le_bytes([l[0], l[1], l[2], l[3]]), pos + 12)
    } else {
        (u16::from_le_bytes([header[6], header[7]]) as u32, pos + 8)
    };
    if len == u32::MAX {
        return Err(FormatError::Unsupported("undefined-length elements"));
    }
    let end = value_start.checked_add(len as usize).ok_or(FormatError::UnexpectedEof)?;
    let value = data.get(value_start..end).ok_or(FormatError::UnexpectedEof)?.to_vec();
    Ok((DataElement { tag, vr, value }, end))
}

/// Test and fixture helper: build a minimal single-frame image.
#[doc(hidden)]
pub fn synthetic_image(rows: u16, columns: u16, samples: &[i32], signed: bool, padding: Option<i32>) -> DicomFile {
    let us = |tag, v: u16| DataElement { tag, vr: *b"US", value: v.to_le_bytes().to_vec() };
    let mut ts = EXPLICIT_VR_LE.as_bytes().to_vec();
    ts.push(0);
    let mut elements = vec![
        DataElement { tag: TRANSFER_SYNTAX, vr: *b"UI", value: ts },
        DataElement { tag: DicomTag::new(0x0010, 0x0010), vr: *b"PN", value: b"DOE^JANE".to_vec() },
        us(SAMPLES_PER_PIXEL, 1),
        us(ROWS, rows),
        us(COLUMNS, columns),
        us(BITS_ALLOCATED, 16),
        us(PIXEL_REPRESENTATION, u16::from(signed)),
    ];
    if let Some(p) = padding {
        let vr = if signed { *b"SS" } else { *b"US" };
        elements.push(DataElement { tag: PIXEL_PADDING_VALUE, vr, value: (p as u16).to_le_bytes().to_vec() });
    }
    let mut pixel_bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        pixel_bytes.extend_from_slice(&(s as u16).to_le_bytes());
    }
    elements.push(DataElement { tag: PIXEL_DATA, vr: *b"OW", value: pixel_bytes });
    DicomFile { preamble: vec![0u8; PREAMBLE_LEN], elements }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DicomFile {
        let pixels: Vec<i32> = (0..16).map(|i| i * 100 - 800).collect();
        synthetic_image(4, 4, &pixels, true, Some(-2000))
    }

    #[test]
    fn roundtrip_is_lossless() {
        let bytes = sample().to_bytes();
        let parsed = DicomFile::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.to_bytes(), bytes);
    }

    #[test]
    fn pixel_layout_and_samples() {
        let f = DicomFile::from_bytes(&sample().to_bytes()).unwrap();
        let layout = f.pixel_layout().unwrap().unwrap();
        assert_eq!((layout.rows, layout.columns, layout.frames), (4, 4, 1));
        assert!(layout.signed);
        assert_eq!(layout.padding, Some(-2000));
        let px = f.pixel_samples(&layout);
        assert_eq!(px[0], -800);
        assert_eq!(px[15], 700);
    }

    #[test]
    fn set_pixels_roundtrip() {
        let mut f = sample();
        let layout = f.pixel_layout().unwrap().unwrap();
        let mut px = f.pixel_samples(&layout);
        px[3] = -1999;
        f.set_pixel_samples(&layout, &px);
        assert_eq!(f.pixel_samples(&layout)[3], -1999);
    }

    #[test]
    fn overflowing_frame_count_rejected() {
        let mut f = synthetic_image(1, 1, &[5], false, None);
        f.put_element(DataElement { tag: NUMBER_OF_FRAMES, vr: *b"IS", value: b"9223372036854775808 ".to_vec() });
        let overflow =
            |r: Result<()>| matches!(r, Err(FormatError::DicomElement { group: 0x0028, element: 0x0008, .. }));
        assert!(overflow(f.pixel_layout().map(|_| ())));
        assert!(overflow(DicomFile::from_bytes(&f.to_bytes()).map(|_| ())));
    }

    #[test]
    fn missing_magic_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[128] = b'X';
        assert_eq!(DicomFile::from_bytes(&bytes).unwrap_err(), FormatError::NotDicom);
    }

    #[test]
    fn truncated_element_rejected() {
        let bytes = sample().to_bytes();
        let cut = &bytes[..bytes.len() - 3];
        assert_eq!(DicomFile::from_bytes(cut).unwrap_err(), FormatError::UnexpectedEof);
    }

    #[test]
    fn implicit_vr_rejected() {
        let mut bytes = sample().to_bytes();
        // Lower-case VR bytes cannot be an explicit VR.
        bytes[132 + 4] = 0x08;
        assert!(matches!(DicomFile::from_bytes(&bytes), Err(FormatError::DicomElement { .. })));
    }

    #[test]
    fn private_tag_helpers() {
        let t = DicomTag::new(0x0029, 0x1010);
        assert!(t.is_private());
        assert!(!t.is_private_creator());
        assert_eq!(t.creator(), Some(DicomTag::new(0x0029, 0x0010)));
        assert!(!DicomTag::new(0x0010, 0x0010).is_private());
        assert!(DicomTag::new(0x0029, 0x0010).is_private_creator());
    }

    #[test]
    fn put_element_keeps_order() {
        let mut f = sample();
        f.put_element(DataElement { tag: DicomTag::new(0x0029, 0x0010), vr: *b"LO", value: b"X ".to_vec() });
        let tags: Vec<_> = f.elements.iter().map(|e| e.tag).collect();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
    }
}
