// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Embedded frame construction and parsing.
//!
//! The frame is the fixed-size binary container that wraps the sealed
//! payload before scrambling and error correction:
//!
//! ```text
//! [ 1 byte ] frame version
//! [12 bytes] AES-GCM-SIV nonce
//! [80 bytes] ciphertext (64-byte payload + 16-byte tag)
//! [ 4 bytes] CRC-32 of everything above (big-endian)
//! ```
//!
//! The CRC lets the verifier discard wrong parameter guesses cheaply before
//! attempting authenticated decryption.

use thiserror::Error;

use crate::codec::Format;
use crate::crypto::{self, DatasetKey, NONCE_LEN, SEALED_LEN};
use crate::error::WatermarkError;
use crate::payload::WatermarkPayload;

/// Layout version written into every frame.
pub const FRAME_VERSION: u8 = 1;

/// Total frame size in bytes.
pub const FRAME_LEN: usize = 1 + NONCE_LEN + SEALED_LEN + 4;

/// Total frame size in bits; the payload bit length every strategy carries.
pub const FRAME_BITS: usize = FRAME_LEN * 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame has {0} bytes, expected {FRAME_LEN}")]
    Length(usize),
    #[error("unsupported frame version {0}")]
    Version(u8),
    #[error("frame CRC mismatch")]
    Crc,
}

/// A frame whose CRC and version checked out. Authenticity is not yet known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFrame {
    pub nonce: [u8; NONCE_LEN],
    pub ciphertext: Vec<u8>,
}

/// Seal `payload` and wrap it in a frame.
pub fn build_frame(key: &DatasetKey, payload: &WatermarkPayload, format: Format) -> Vec<u8> {
    let (nonce, ciphertext) = crypto::seal(key, payload, format);
    debug_assert_eq!(ciphertext.len(), SEALED_LEN);

    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.push(FRAME_VERSION);
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Check length, version and CRC.
pub fn parse_frame(data: &[u8]) -> Result<ParsedFrame, FrameError> {
    if data.len() != FRAME_LEN {
        return Err(FrameError::Length(data.len()));
    }
    let (body, crc_bytes) = data.split_at(FRAME_LEN - 4);
    let stored = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if stored != crc32fast::hash(body) {
        return Err(FrameError::Crc);
    }
    if body[0] != FRAME_VERSION {
        return Err(FrameError::Version(body[0]));
    }
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&body[1..1 + NONCE_LEN]);
    Ok(ParsedFrame { nonce, ciphertext: body[1 + NONCE_LEN..].to_vec() })
}

impl ParsedFrame {
    /// Authenticate and decrypt.
    pub fn open(&self, key: &DatasetKey, format: Format) -> Result<WatermarkPayload, WatermarkError> {
        crypto::open(key, &self.nonce, &self.ciphertext, format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn setup() -> (DatasetKey, WatermarkPayload) {
        (DatasetKey::from_bytes([5u8; 32]), WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4()))
    }

    #[test]
    fn frame_size_is_fixed() {
        let (key, p) = setup();
        let frame = build_frame(&key, &p, Format::Fastq);
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(FRAME_LEN, 97);
        assert_eq!(frame[0], FRAME_VERSION);
    }

    #[test]
    fn build_parse_open() {
        let (key, p) = setup();
        let frame = build_frame(&key, &p, Format::Vcf);
        let parsed = parse_frame(&frame).unwrap();
        assert_eq!(parsed.open(&key, Format::Vcf).unwrap(), p);
    }

    #[test]
    fn crc_catches_single_bit_flip() {
        let (key, p) = setup();
        let mut frame = build_frame(&key, &p, Format::Fastq);
        frame[40] ^= 0x10;
        assert_eq!(parse_frame(&frame).unwrap_err(), FrameError::Crc);
    }

    #[test]
    fn wrong_length_rejected() {
        assert_eq!(parse_frame(&[0u8; 10]).unwrap_err(), FrameError::Length(10));
    }

    #[test]
    fn unknown_version_rejected() {
        let (key, p) = setup();
        let mut frame = build_frame(&key, &p, Format::Fastq);
        frame[0] = 9;
        let crc = crc32fast::hash(&frame[..FRAME_LEN - 4]);
        frame[FRAME_LEN - 4..].copy_from_slice(&crc.to_be_bytes());
        assert_eq!(parse_frame(&frame).unwrap_err(), FrameError::Version(9));
    }
}
