// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! The forensic payload carried by every watermark.
//!
//! Serialized layout (64 bytes, big-endian integers):
//!
//! ```text
//! [16] recipient_id
//! [16] dataset_id
//! [16] issuance_id
//! [ 8] issued_at, seconds since the Unix epoch (i64)
//! [ 8] nonce (u64)
//! ```

use chrono::{DateTime, Timelike, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, WatermarkError};

/// Serialized payload length in bytes.
pub const PAYLOAD_LEN: usize = 64;

/// One access event: who received which dataset, when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatermarkPayload {
    pub recipient_id: Uuid,
    pub dataset_id: Uuid,
    pub issuance_id: Uuid,
    /// Whole seconds; sub-second precision is not carried.
    pub issued_at: DateTime<Utc>,
    pub nonce: u64,
}

impl WatermarkPayload {
    /// Issue a fresh payload for `recipient_id` downloading `dataset_id` now.
    pub fn issue(recipient_id: Uuid, dataset_id: Uuid) -> Self {
        Self::issue_at(recipient_id, dataset_id, Utc::now())
    }

    /// Issue a payload with an explicit timestamp and random issuance id.
    /// The timestamp is truncated to whole seconds.
    pub fn issue_at(recipient_id: Uuid, dataset_id: Uuid, issued_at: DateTime<Utc>) -> Self {
        Self {
            recipient_id,
            dataset_id,
            issuance_id: Uuid::new_v4(),
            issued_at: issued_at.with_nanosecond(0).unwrap_or(issued_at),
            nonce: rand::thread_rng().next_u64(),
        }
    }

    /// Rejects payloads that would not survive serialization unchanged.
    pub fn validate(&self) -> Result<()> {
        if self.issued_at.nanosecond() != 0 {
            return Err(WatermarkError::InvalidParameters(format!(
                "issued_at {} carries sub-second precision",
                self.issued_at
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; PAYLOAD_LEN] {
        let mut out = [0u8; PAYLOAD_LEN];
        out[0..16].copy_from_slice(self.recipient_id.as_bytes());
        out[16..32].copy_from_slice(self.dataset_id.as_bytes());
        out[32..48].copy_from_slice(self.issuance_id.as_bytes());
        out[48..56].copy_from_slice(&self.issued_at.timestamp().to_be_bytes());
        out[56..64].copy_from_slice(&self.nonce.to_be_bytes());
        out
    }

    /// Parse a serialized payload. `None` if the timestamp is out of range.
    pub fn from_bytes(bytes: &[u8; PAYLOAD_LEN]) -> Option<Self> {
        let uuid_at = |offset: usize| {
            let mut raw = [0u8; 16];
            raw.copy_from_slice(&bytes[offset..offset + 16]);
            Uuid::from_bytes(raw)
        };
        let mut secs = [0u8; 8];
        secs.copy_from_slice(&bytes[48..56]);
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&bytes[56..64]);
        Some(Self {
            recipient_id: uuid_at(0),
            dataset_id: uuid_at(16),
            issuance_id: uuid_at(32),
            issued_at: DateTime::from_timestamp(i64::from_be_bytes(secs), 0)?,
            nonce: u64::from_be_bytes(nonce),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_layout_roundtrip() {
        let p = WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4());
        let bytes = p.to_bytes();
        assert_eq!(&bytes[0..16], p.recipient_id.as_bytes());
        assert_eq!(WatermarkPayload::from_bytes(&bytes), Some(p));
    }

    #[test]
    fn issued_at_has_whole_seconds() {
        let p = WatermarkPayload::issue(Uuid::nil(), Uuid::nil());
        assert_eq!(p.issued_at.nanosecond(), 0);
    }

    #[test]
    fn sub_second_timestamps_are_truncated_or_rejected() {
        let at = DateTime::from_timestamp(1_760_000_000, 123_000_000).unwrap();
        let p = WatermarkPayload::issue_at(Uuid::nil(), Uuid::nil(), at);
        assert_eq!(p.issued_at.timestamp(), 1_760_000_000);
        assert_eq!(p.issued_at.nanosecond(), 0);
        p.validate().unwrap();
        assert_eq!(WatermarkPayload::from_bytes(&p.to_bytes()), Some(p));

        let raw = WatermarkPayload { issued_at: at, ..p };
        assert!(matches!(raw.validate(), Err(WatermarkError::InvalidParameters(_))));
    }

    #[test]
    fn issuance_ids_are_fresh() {
        let at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let a = WatermarkPayload::issue_at(Uuid::nil(), Uuid::nil(), at);
        let b = WatermarkPayload::issue_at(Uuid::nil(), Uuid::nil(), at);
        assert_ne!(a.issuance_id, b.issuance_id);
    }
}
