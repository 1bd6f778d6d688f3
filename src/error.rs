// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the watermarking engine.
//!
//! [`WatermarkError`] covers every fatal outcome of embed, extract and
//! dispatch. Two outcomes are deliberately absent: an optimizer running out
//! of budget reports `timed_out` on its result, and a payload failing
//! authentication turns into `ExtractionResult { authenticated: false, .. }`.

use thiserror::Error;

use crate::codec::{Format, FormatError};
use crate::strategy::integrity::IntegrityReport;

#[derive(Debug, Error)]
pub enum WatermarkError {
    /// The input could not be parsed as the declared format.
    #[error("malformed {format} input: {source}")]
    Format {
        format: Format,
        #[source]
        source: FormatError,
    },
    /// The file cannot carry the coded payload under the active constraints.
    #[error("insufficient capacity: {needed} bits needed, {available} available")]
    InsufficientCapacity { needed: usize, available: usize },
    /// An embed would have broken a declared constraint; nothing was written.
    #[error("constraint violation ({} unit(s) affected)", .0.constraint_violations.len())]
    ConstraintViolation(Box<IntegrityReport>),
    /// A dispatch chunk failed; no partial result was merged.
    #[error("worker failed on chunk {chunk}: {reason}")]
    WorkerFailure { chunk: usize, reason: String },
    #[error("dispatch exceeded its deadline")]
    DispatchTimeout,
    /// Structurally valid frame whose AEAD tag did not verify.
    #[error("payload failed authentication")]
    AuthenticationFailure,
    #[error("operation cancelled")]
    Cancelled,
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("key derivation failed")]
    KeyDerivation,
}

pub type Result<T> = std::result::Result<T, WatermarkError>;

impl WatermarkError {
    pub(crate) fn format(format: Format, source: FormatError) -> Self {
        Self::Format { format, source }
    }

    /// Whether retrying with the same input can ever succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DispatchTimeout | Self::Cancelled | Self::WorkerFailure { .. })
    }
}
