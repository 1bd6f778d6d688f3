// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Key material and payload sealing.
//!
//! Each dataset has one 32-byte [`DatasetKey`], passed explicitly into every
//! embed and verify call. The key either comes from a secret store as raw
//! bytes or is derived with Argon2id from a passphrase salted by the dataset
//! id.
//!
//! Payloads are sealed with AES-256-GCM-SIV. The nonce is an HMAC of the
//! issuance id and payload nonce, so embedding the same request twice yields
//! byte-identical output, and nonce reuse across distinct payloads is
//! harmless under SIV anyway.

use std::fmt;

use aes_gcm_siv::aead::{Aead, Payload};
use aes_gcm_siv::{Aes256GcmSiv, KeyInit, Nonce};
use argon2::Argon2;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::codec::Format;
use crate::error::{Result, WatermarkError};
use crate::payload::{WatermarkPayload, PAYLOAD_LEN};

type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
/// AES-GCM-SIV nonce length in bytes.
pub const NONCE_LEN: usize = 12;
/// Authentication tag appended to the ciphertext.
pub const TAG_LEN: usize = 16;
/// Sealed payload length.
pub const SEALED_LEN: usize = PAYLOAD_LEN + TAG_LEN;

/// Domain prefix of the associated data.
const AAD_PREFIX: &[u8] = b"aperture-wm/v1";

/// Per-dataset secret key.
#[derive(Clone)]
pub struct DatasetKey(Zeroizing<[u8; KEY_LEN]>);

impl DatasetKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Derive a key from a passphrase with Argon2id, salted by the dataset id.
    pub fn derive(passphrase: &str, dataset_id: &Uuid) -> Result<Self> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::default()
            .hash_password_into(passphrase.as_bytes(), dataset_id.as_bytes(), &mut *key)
            .map_err(|_| WatermarkError::KeyDerivation)?;
        Ok(Self(key))
    }

    /// HMAC-SHA256 over the concatenation of `parts`.
    pub(crate) fn mac(&self, parts: &[&[u8]]) -> [u8; 32] {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&*self.0).expect("HMAC accepts any key length");
        for part in parts {
            mac.update(part);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    fn cipher(&self) -> Aes256GcmSiv {
        Aes256GcmSiv::new_from_slice(&*self.0).expect("valid key length")
    }
}

impl fmt::Debug for DatasetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DatasetKey(..)")
    }
}

fn aad(format: Format) -> Vec<u8> {
    let mut aad = AAD_PREFIX.to_vec();
    aad.push(format.tag_byte());
    aad
}

/// Deterministic nonce for a payload.
fn derive_nonce(key: &DatasetKey, payload: &WatermarkPayload) -> [u8; NONCE_LEN] {
    let digest = key.mac(&[payload.issuance_id.as_bytes(), &payload.nonce.to_be_bytes()]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&digest[..NONCE_LEN]);
    nonce
}

/// Encrypt and authenticate a payload, binding it to `format`.
///
/// Returns `(nonce, ciphertext_with_tag)`.
pub fn seal(key: &DatasetKey, payload: &WatermarkPayload, format: Format) -> ([u8; NONCE_LEN], Vec<u8>) {
    let nonce = derive_nonce(key, payload);
    let plaintext = Zeroizing::new(payload.to_bytes());
    let aad = aad(format);
    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), Payload { msg: &plaintext[..], aad: &aad })
        .expect("AES-GCM-SIV encrypt of a fixed-size payload should not fail");
    (nonce, ciphertext)
}

/// Verify and decrypt a sealed payload.
pub fn open(key: &DatasetKey, nonce: &[u8; NONCE_LEN], ciphertext: &[u8], format: Format) -> Result<WatermarkPayload> {
    let aad = aad(format);
    let plaintext = key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: &aad })
        .map(Zeroizing::new)
        .map_err(|_| WatermarkError::AuthenticationFailure)?;
    let bytes = <&[u8; PAYLOAD_LEN]>::try_from(&plaintext[..]).map_err(|_| WatermarkError::AuthenticationFailure)?;
    WatermarkPayload::from_bytes(bytes).ok_or(WatermarkError::AuthenticationFailure)
}
