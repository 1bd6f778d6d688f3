// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Opaque byte container for formats without a dedicated codec.

use super::error::{FormatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFile {
    pub bytes: Vec<u8>,
}

impl RawFile {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(FormatError::Empty);
        }
        Ok(Self { bytes: data.to_vec() })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }
}
