// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Classic TIFF reader/writer for uncompressed grayscale stacks.
//!
//! Each IFD is one page (a z-slice, time point or channel of a microscopy
//! stack). The original byte buffer is retained and pixel samples are written
//! back in place, so every non-pixel byte survives re-encoding unchanged.

use std::collections::HashSet;

use super::error::{FormatError, Result};

const TAG_IMAGE_WIDTH: u16 = 256;
const TAG_IMAGE_LENGTH: u16 = 257;
const TAG_BITS_PER_SAMPLE: u16 = 258;
const TAG_COMPRESSION: u16 = 259;
const TAG_PHOTOMETRIC: u16 = 262;
const TAG_STRIP_OFFSETS: u16 = 273;
const TAG_SAMPLES_PER_PIXEL: u16 = 277;
const TAG_ROWS_PER_STRIP: u16 = 278;
const TAG_STRIP_BYTE_COUNTS: u16 = 279;
const TAG_TILE_WIDTH: u16 = 322;

const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// Upper bound on pages to defend against IFD cycles that evade the visited set.
const MAX_PAGES: usize = 65_536;

/// Geometry of one uncompressed grayscale page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiffPage {
    pub width: usize,
    pub height: usize,
    pub bits_per_sample: u16,
    /// `(offset, byte_count)` of each strip in file order.
    strips: Vec<(usize, usize)>,
}

impl TiffPage {
    pub fn sample_count(&self) -> usize {
        self.width * self.height
    }

    pub fn max_sample(&self) -> i32 {
        if self.bits_per_sample == 8 { u8::MAX as i32 } else { u16::MAX as i32 }
    }

    fn bytes_per_sample(&self) -> usize {
        self.bits_per_sample as usize / 8
    }
}

/// A parsed TIFF file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TiffFile {
    data: Vec<u8>,
    big_endian: bool,
    pub pages: Vec<TiffPage>,
}

struct Reader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl Reader<'_> {
    fn u16_at(&self, pos: usize) -> Result<u16> {
        let b = self.data.get(pos..pos + 2).ok_or(FormatError::UnexpectedEof)?;
        Ok(if self.big_endian { u16::from_be_bytes([b[0], b[1]]) } else { u16::from_le_bytes([b[0], b[1]]) })
    }

    fn u32_at(&self, pos: usize) -> Result<u32> {
        let b = self.data.get(pos..pos + 4).ok_or(FormatError::UnexpectedEof)?;
        let arr = [b[0], b[1], b[2], b[3]];
        Ok(if self.big_endian { u32::from_be_bytes(arr) } else { u32::from_le_bytes(arr) })
    }

    /// Read the values of a SHORT or LONG IFD entry at `entry_pos`.
    fn entry_values(&self, entry_pos: usize) -> Result<Vec<u32>> {
        let typ = self.u16_at(entry_pos + 2)?;
        let count = self.u32_at(entry_pos + 4)? as usize;
        let size = match typ {
            TYPE_SHORT => 2,
            TYPE_LONG => 4,
            _ => return Err(FormatError::Tiff("unexpected field type for a required tag")),
        };
        let total = count.checked_mul(size).ok_or(FormatError::Tiff("field count overflow"))?;
        let base = if total <= 4 { entry_pos + 8 } else { self.u32_at(entry_pos + 8)? as usize };
        if base.checked_add(total).map_or(true, |end| end > self.data.len()) {
            return Err(FormatError::Tiff("field values out of bounds"));
        }
        (0..count)
            .map(|i| match typ {
                TYPE_SHORT => self.u16_at(base + 2 * i).map(u32::from),
                _ => self.u32_at(base + 4 * i),
            })
            .collect()
    }
}

impl TiffFile {
    /// Parse TIFF bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < 8 {
            return Err(FormatError::UnexpectedEof);
        }
        let big_endian = match &data[..2] {
            b"II" => false,
            b"MM" => true,
            _ => return Err(FormatError::Tiff("missing byte-order mark")),
        };
        let r = Reader { data, big_endian };
        if r.u16_at(2)? != 42 {
            return Err(FormatError::Tiff("bad magic number (BigTIFF is not supported)"));
        }

        let mut pages = Vec::new();
        let mut visited = HashSet::new();
        let mut ifd = r.u32_at(4)? as usize;
        while ifd != 0 {
            if !visited.insert(ifd) || pages.len() >= MAX_PAGES {
                return Err(FormatError::Tiff("IFD chain loops"));
            }
            let (page, next) = read_ifd(&r, ifd)?;
            pages.push(page);
            ifd = next;
        }
        if pages.is_empty() {
            return Err(FormatError::Empty);
        }
        Ok(Self { data: data.to_vec(), big_endian, pages })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.clone()
    }

    /// Samples of a page in raster order.
    pub fn page_samples(&self, page: usize) -> Vec<i32> {
        let p = &self.pages[page];
        let bps = p.bytes_per_sample();
        let mut out = Vec::with_capacity(p.sample_count());
        'strips: for &(offset, count) in &p.strips {
            for chunk in self.data[offset..offset + count].chunks_exact(bps) {
                if out.len() == p.sample_count() {
                    break 'strips;
                }
                out.push(self.decode_sample(chunk));
            }
        }
        out
    }

    /// Overwrite a page's samples in place. Values must fit the sample width.
    pub fn set_page_samples(&mut self, page: usize, samples: &[i32]) {
        let p = self.pages[page].clone();
        let bps = p.bytes_per_sample();
        let mut it = samples.iter();
        for &(offset, count) in &p.strips {
            for chunk in self.data[offset..offset + count].chunks_exact_mut(bps) {
                let Some(&s) = it.next() else {
                    return;
                };
                match bps {
                    1 => chunk[0] = s as u8,
                    _ => chunk.copy_from_slice(&if self.big_endian {
                        (s as u16).to_be_bytes()
                    } else {
                        (s as u16).to_le_bytes()
                    }),
                }
            }
        }
    }

    fn decode_sample(&self, b: &[u8]) -> i32 {
        match b.len() {
            1 => b[0] as i32,
            _ if self.big_endian => u16::from_be_bytes([b[0], b[1]]) as i32,
            _ => u16::from_le_bytes([b[0], b[1]]) as i32,
        }
    }
}

fn read_ifd(r: &Reader<'_>, ifd: usize) -> Result<(TiffPage, usize)> {
    let count = r.u16_at(ifd)? as usize;
    let mut width = None;
    let mut height = None;
    let mut bits = 1u32;
    let mut compression = 1u32;
    let mut spp = 1u32;
    let mut offsets = None;
    let mut byte_counts = None;

    for i in 0..count {
        let entry = ifd + 2 + 12 * i;
        let tag = r.u16_at(entry)?;
        match tag {
            TAG_IMAGE_WIDTH => width = r.entry_values(entry)?.first().copied(),
            TAG_IMAGE_LENGTH => height = r.entry_values(entry)?.first().copied(),
            TAG_BITS_PER_SAMPLE => bits = r.entry_values(entry)?.first().copied().unwrap_or(1),
            TAG_COMPRESSION => compression = r.entry_values(entry)?.first().copied().unwrap_or(1),
            TAG_SAMPLES_PER_PIXEL => spp = r.entry_values(entry)?.first().copied().unwrap_or(1),
            TAG_STRIP_OFFSETS => offsets = Some(r.entry_values(entry)?),
            TAG_STRIP_BYTE_COUNTS => byte_counts = Some(r.entry_values(entry)?),
            TAG_TILE_WIDTH => return Err(FormatError::Unsupported("tiled TIFF")),
            _ => {}
        }
    }
    let next = r.u32_at(ifd + 2 + 12 * count)? as usize;

    if compression != 1 {
        return Err(FormatError::Unsupported("compressed TIFF"));
    }
    if spp != 1 {
        return Err(FormatError::Unsupported("multi-sample TIFF pixels"));
    }
    if bits != 8 && bits != 16 {
        return Err(FormatError::Unsupported("bits per sample other than 8 or 16"));
    }
    let width = width.ok_or(FormatError::Tiff("missing ImageWidth"))? as usize;
    let height = height.ok_or(FormatError::Tiff("missing ImageLength"))? as usize;
    let offsets = offsets.ok_or(FormatError::Tiff("missing StripOffsets"))?;
    let byte_counts = byte_counts.ok_or(FormatError::Tiff("missing StripByteCounts"))?;
    if offsets.len() != byte_counts.len() {
        return Err(FormatError::Tiff("StripOffsets and StripByteCounts differ in length"));
    }

    let strips: Vec<(usize, usize)> =
        offsets.iter().zip(&byte_counts).map(|(&o, &c)| (o as usize, c as usize)).collect();
    for &(o, c) in &strips {
        if o.checked_add(c).map_or(true, |end| end > r.data.len()) {
            return Err(FormatError::Tiff("strip out of bounds"));
        }
    }
    let page = TiffPage { width, height, bits_per_sample: bits as u16, strips };
    let needed = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(page.bytes_per_sample()))
        .ok_or(FormatError::Tiff("image size overflow"))?;
    let available = page.strips.iter().try_fold(0usize, |acc, s| acc.checked_add(s.1)).unwrap_or(usize::MAX);
    if width == 0 || height == 0 || available < needed {
        return Err(FormatError::Tiff("strips hold fewer bytes than the image needs"));
    }
    Ok((page, next))
}

/// Test and fixture helper: build a little-endian single-strip stack.
#[doc(hidden)]
pub fn synthetic_stack(width: u32, height: u32, bits: u16, pages: &[Vec<u16>]) -> Vec<u8> {
    let mut out = b"II".to_vec();
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    let mut link_pos = 4usize;

    for page in pages {
        let pixel_offset = out.len() as u32;
        for &s in page {
            if bits == 8 {
                out.push(s as u8);
            } else {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        let byte_count = out.len() as u32 - pixel_offset;
        if out.len() % 2 == 1 {
            out.push(0);
        }
        let ifd_offset = out.len() as u32;
        out[link_pos..link_pos + 4].copy_from_slice(&ifd_offset.to_le_bytes());

        let entries: [(u16, u16, u32); 9] = [
            (TAG_IMAGE_WIDTH, TYPE_LONG, width),
            (TAG_IMAGE_LENGTH, TYPE_LONG, height),
            (TAG_BITS_PER_SAMPLE, TYPE_SHORT, bits as u32),
            (TAG_COMPRESSION, TYPE_SHORT, 1),
            (TAG_PHOTOMETRIC, TYPE_SHORT, 1),
            (TAG_STRIP_OFFSETS, TYPE_LONG, pixel_offset),
            (TAG_SAMPLES_PER_PIXEL, TYPE_SHORT, 1),
            (TAG_ROWS_PER_STRIP, TYPE_LONG, height),
            (TAG_STRIP_BYTE_COUNTS, TYPE_LONG, byte_count),
        ];
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        for (tag, typ, value) in entries {
            out.extend_from_slice(&tag.to_le_bytes());
            out.extend_from_slice(&typ.to_le_bytes());
            out.extend_from_slice(&1u32.to_le_bytes());
            if typ == TYPE_SHORT {
                out.extend_from_slice(&(value as u16).to_le_bytes());
                out.extend_from_slice(&[0, 0]);
            } else {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        link_pos = out.len();
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    out
}
