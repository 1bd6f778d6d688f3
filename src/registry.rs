// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Collaborator contracts: the watermark ledger and the byte store.
//!
//! The engine never calls either. Callers register each payload before
//! shipping watermarked bytes and look a verified payload up afterwards.
//! The in-memory implementations back tests and single-process tools.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::payload::WatermarkPayload;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A different payload already uses this issuance id.
    #[error("issuance id {0} is already registered")]
    DuplicateIssuance(Uuid),
    /// The (recipient, dataset, issued_at) tuple already has an issuance id.
    #[error("access event already registered as issuance {existing}")]
    ConflictingEvent { existing: Uuid },
    #[error("storage backend failed: {0}")]
    Backend(String),
}

/// Maps issuance ids back to the access event they were issued for.
pub trait WatermarkRegistry: Send + Sync {
    /// Record a payload. Registering the identical payload again is a no-op.
    fn register(&self, payload: &WatermarkPayload) -> Result<(), RegistryError>;

    fn lookup(&self, issuance_id: &Uuid) -> Result<Option<WatermarkPayload>, RegistryError>;
}

type EventKey = (Uuid, Uuid, DateTime<Utc>);

#[derive(Debug, Default)]
struct Ledger {
    by_issuance: HashMap<Uuid, WatermarkPayload>,
    by_event: HashMap<EventKey, Uuid>,
}

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    ledger: RwLock<Ledger>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.ledger.read().unwrap_or_else(PoisonError::into_inner).by_issuance.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl WatermarkRegistry for MemoryRegistry {
    fn register(&self, payload: &WatermarkPayload) -> Result<(), RegistryError> {
        let mut ledger = self.ledger.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = ledger.by_issuance.get(&payload.issuance_id) {
            return if existing == payload {
                Ok(())
            } else {
                Err(RegistryError::DuplicateIssuance(payload.issuance_id))
            };
        }
        let event = (payload.recipient_id, payload.dataset_id, payload.issued_at);
        if let Some(&existing) = ledger.by_event.get(&event) {
            return Err(RegistryError::ConflictingEvent { existing });
        }
        ledger.by_event.insert(event, payload.issuance_id);
        ledger.by_issuance.insert(payload.issuance_id, *payload);
        Ok(())
    }

    fn lookup(&self, issuance_id: &Uuid) -> Result<Option<WatermarkPayload>, RegistryError> {
        Ok(self.ledger.read().unwrap_or_else(PoisonError::into_inner).by_issuance.get(issuance_id).copied())
    }
}

/// Reads originals and stores watermarked copies.
pub trait ByteStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError>;

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), RegistryError>;
}

#[derive(Debug, Default)]
pub struct MemoryByteStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryByteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ByteStore for MemoryByteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        Ok(self.objects.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), RegistryError> {
        self.objects.write().unwrap_or_else(PoisonError::into_inner).insert(key.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let reg = MemoryRegistry::new();
        let p = WatermarkPayload::issue_at(Uuid::new_v4(), Uuid::new_v4(), at(1_700_000_000));
        reg.register(&p).unwrap();
        reg.register(&p).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.lookup(&p.issuance_id).unwrap(), Some(p));
        assert_eq!(reg.lookup(&Uuid::new_v4()).unwrap(), None);
    }

    #[test]
    fn issuance_id_never_reused() {
        let reg = MemoryRegistry::new();
        let p = WatermarkPayload::issue_at(Uuid::new_v4(), Uuid::new_v4(), at(1));
        reg.register(&p).unwrap();
        let other = WatermarkPayload { recipient_id: Uuid::new_v4(), ..p };
        assert_eq!(reg.register(&other), Err(RegistryError::DuplicateIssuance(p.issuance_id)));
    }

    #[test]
    fn one_issuance_per_access_event() {
        let reg = MemoryRegistry::new();
        let p = WatermarkPayload::issue_at(Uuid::new_v4(), Uuid::new_v4(), at(2));
        reg.register(&p).unwrap();
        let again = WatermarkPayload::issue_at(p.recipient_id, p.dataset_id, p.issued_at);
        assert_ne!(again.issuance_id, p.issuance_id);
        assert_eq!(reg.register(&again), Err(RegistryError::ConflictingEvent { existing: p.issuance_id }));
        let later = WatermarkPayload::issue_at(p.recipient_id, p.dataset_id, at(3));
        reg.register(&later).unwrap();
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn byte_store_roundtrip() {
        let store = MemoryByteStore::new();
        assert_eq!(store.get("a").unwrap(), None);
        store.put("a", vec![1, 2, 3]).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(vec![1, 2, 3]));
    }
}
