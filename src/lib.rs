// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! # aperture-watermark
//!
//! Forensic watermarking for scientific data files. Each copy of a dataset
//! handed to a recipient carries an authenticated record of that access
//! event, hidden in the file's own redundancy:
//!
//! - **FASTQ**: low-order bits of Phred quality scores above a floor.
//! - **VCF**: a free-form INFO key, never the genotype or site columns.
//! - **DICOM**: a private data element, or padding pixels as a fallback.
//! - **TIFF**: integer Haar wavelet detail bands of 8/16-bit images.
//! - **Generic**: a low bit plane past a protected header.
//!
//! A payload is sealed with AES-256-GCM-SIV under a per-dataset key,
//! framed with a CRC, scrambled, and spread with Reed-Solomon parity plus
//! repetition. An optimizer picks the carrier and coding that best trade
//! stealth, capacity use and fidelity. Verification needs only the file and
//! the key.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use aperture_watermark::{DatasetKey, EngineConfig, Format, Watermarker, WatermarkPayload};
//! use aperture_watermark::{Budget, OptimizationObjective};
//!
//! let wm = Watermarker::new(EngineConfig::from_env()?)?;
//! let key = DatasetKey::derive("dataset passphrase", &dataset_id)?;
//! let payload = WatermarkPayload::issue(recipient_id, dataset_id);
//! let out = wm.embed(&fastq, Format::Fastq, &payload, &key,
//!                    &OptimizationObjective::default(), &Budget::default())?;
//! let found = wm.verify(&out.bytes, Format::Fastq, &key)?;
//! assert_eq!(found.payload, Some(payload));
//! ```

pub mod cancel;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod ecc;
pub mod error;
pub mod frame;
pub mod optimize;
pub mod payload;
pub mod pipeline;
pub mod profile;
pub mod registry;
pub mod scramble;
pub mod strategy;

pub use cancel::CancelToken;
pub use codec::{Document, Format, FormatError};
pub use config::EngineConfig;
pub use crypto::DatasetKey;
pub use dispatch::{ComputeBackend, ScopedThreadBackend, SerialBackend};
#[cfg(feature = "parallel")]
pub use dispatch::RayonBackend;
pub use error::{Result, WatermarkError};
pub use frame::FRAME_VERSION;
pub use optimize::{
    Budget, EvolutionarySearch, GridSearch, OptimizationObjective, OptimizationResult, Optimizer, OptimizerKind,
    RandomSearch, SearchMode, SearchOutcome,
};
pub use payload::WatermarkPayload;
pub use pipeline::{EmbedOutcome, ExtractionResult, Watermarker};
pub use profile::{bounds_for, ConstraintProfile, FieldRef, UnitGranularity};
pub use registry::{ByteStore, MemoryByteStore, MemoryRegistry, RegistryError, WatermarkRegistry};
pub use strategy::integrity::{DeltaSummary, IntegrityReport, Violation, ViolationKind};
pub use strategy::{EmbeddingStrategy, StrategyParams};

/// Crate version, recorded alongside issued watermarks by callers.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
