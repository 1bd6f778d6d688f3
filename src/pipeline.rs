// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Embed and verify entry points.
//!
//! Embedding:
//!
//! 1. decode the bytes and look up the format's constraint profile,
//! 2. seal the payload into a frame and scramble its bits under the key,
//! 3. pick strategy parameters (caller-supplied, or by optimizer search),
//! 4. error-correct, write, re-encode and audit.
//!
//! Verification brute-forces the small parameter space every embed draws
//! from. Each carrier and stride is read once; codings are then tried on
//! the same bits. The frame CRC discards wrong guesses and AEAD decides
//! authenticity.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::codec::{self, Document, Format};
use crate::config::EngineConfig;
use crate::crypto::DatasetKey;
use crate::dispatch::{default_backend, ComputeBackend, DispatchControl, ExecContext};
use crate::ecc::reed_solomon::PARITY_CHOICES;
use crate::ecc::{bits_to_bytes, bytes_to_bits};
use crate::error::{Result, WatermarkError};
use crate::frame::{build_frame, parse_frame, FRAME_BITS};
use crate::optimize::{Budget, OptimizationObjective, Optimizer, SearchMode, SearchOutcome, SearchSpace, TrialScorer};
use crate::payload::WatermarkPayload;
use crate::profile::ConstraintProfile;
use crate::scramble::Scrambler;
use crate::strategy::coding::Coding;
use crate::strategy::integrity::IntegrityReport;
use crate::strategy::{self, StrategyParams, REDUNDANCY_CHOICES, STRIDE_CHOICES};

/// Optimizer candidates tried in order when the best one fails to embed.
const EMBED_CANDIDATES: usize = 4;

/// Watermarked bytes and how they were produced.
#[derive(Debug, Clone)]
pub struct EmbedOutcome {
    pub bytes: Vec<u8>,
    pub report: IntegrityReport,
    pub params: StrategyParams,
    /// The search that chose `params`, when the optimizer ran.
    pub search: Option<SearchOutcome>,
}

/// Result of [`Watermarker::verify`]. Absence of a watermark or a failed
/// authentication is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Only set when `authenticated`.
    pub payload: Option<WatermarkPayload>,
    pub authenticated: bool,
    /// `1 - 2 * bit_error_rate` of the best frame found, `0` when none.
    pub confidence: f64,
    /// Parameters the frame was found with.
    pub params: Option<StrategyParams>,
    pub bit_error_rate: Option<f64>,
}

impl ExtractionResult {
    fn absent() -> Self {
        Self { payload: None, authenticated: false, confidence: 0.0, params: None, bit_error_rate: None }
    }
}

fn confidence(ber: f64) -> f64 {
    (1.0 - 2.0 * ber).clamp(0.0, 1.0)
}

/// The engine: configuration, compute backend and optimizer.
#[derive(Debug)]
pub struct Watermarker {
    config: EngineConfig,
    backend: Arc<dyn ComputeBackend>,
    optimizer: Box<dyn Optimizer>,
    cancel: Option<CancelToken>,
}

impl Watermarker {
    pub fn new(config: EngineConfig) -> Result<Self> {
        let backend = default_backend(config.worker_count);
        Self::with_backend(config, backend)
    }

    pub fn with_backend(config: EngineConfig, backend: Arc<dyn ComputeBackend>) -> Result<Self> {
        config.validate()?;
        let optimizer = config.optimizer.build();
        Ok(Self { config, backend, optimizer, cancel: None })
    }

    /// Replace the configured optimizer.
    pub fn with_optimizer(mut self, optimizer: Box<dyn Optimizer>) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Cancel in-flight and future calls through `token`.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self, format: Format) -> ConstraintProfile {
        self.config.profile(format)
    }

    /// A fresh context per call so the dispatch timeout starts now.
    fn context(&self) -> ExecContext {
        let mut control = DispatchControl::new();
        if let Some(t) = &self.cancel {
            control = control.with_cancel(t.clone());
        }
        if let Some(timeout) = self.config.dispatch_timeout() {
            control = control.with_timeout(timeout);
        }
        ExecContext::new(self.backend.clone()).with_chunk_units(self.config.chunk_units).with_control(control)
    }

    fn open(&self, bytes: &[u8], format: Format) -> Result<(Document, ConstraintProfile)> {
        let doc = codec::decode(bytes, format).map_err(|e| WatermarkError::format(format, e))?;
        Ok((doc, self.profile(format)))
    }

    /// Raw carrier capacity of every candidate carrier, in bits at stride 1.
    pub fn capacity(&self, bytes: &[u8], format: Format) -> Result<Vec<(StrategyParams, usize)>> {
        let (doc, profile) = self.open(bytes, format)?;
        let ctx = self.context();
        strategy::carriers(&doc, &profile)
            .into_iter()
            .map(|s| {
                let params = StrategyParams::new(s);
                let bits = strategy::capacity_bits(&doc, &profile, &params, &ctx)?;
                Ok((params, bits))
            })
            .collect()
    }

    /// Run the configured optimizer without embedding.
    #[instrument(skip_all, fields(format = %format, bytes = bytes.len(), optimizer = self.optimizer.name()))]
    pub fn search(
        &self,
        bytes: &[u8],
        format: Format,
        objective: &OptimizationObjective,
        budget: &Budget,
        mode: SearchMode,
    ) -> Result<SearchOutcome> {
        let (doc, profile) = self.open(bytes, format)?;
        self.search_document(&doc, &profile, objective, budget, mode)
    }

    fn search_document(
        &self,
        doc: &Document,
        profile: &ConstraintProfile,
        objective: &OptimizationObjective,
        budget: &Budget,
        mode: SearchMode,
    ) -> Result<SearchOutcome> {
        objective.validate()?;
        profile.validate()?;
        let space = SearchSpace::for_document(doc, profile, self.config.min_redundancy);
        let scorer = TrialScorer::new(doc, profile, FRAME_BITS, self.config.optimizer_seed);
        // The search budget is the only wall-clock limit here.
        let mut ctx = ExecContext::new(self.backend.clone()).with_chunk_units(self.config.chunk_units);
        if let Some(t) = &self.cancel {
            ctx = ctx.with_control(DispatchControl::new().with_cancel(t.clone()));
        }
        let seed = self.config.optimizer_seed;
        let outcome = self.optimizer.search(&space, &scorer, objective, budget, mode, seed, &ctx)?;
        if outcome.timed_out {
            warn!(evaluations = outcome.evaluations, "optimizer timed out, using best result so far");
        }
        info!(
            space = space.size(),
            evaluations = outcome.evaluations,
            found = outcome.results.len(),
            best = ?outcome.best().map(|r| r.strategy_params.to_string()),
            "parameter search done"
        );
        Ok(outcome)
    }

    fn scrambled_frame(&self, key: &DatasetKey, payload: &WatermarkPayload, format: Format) -> Vec<u8> {
        let frame = build_frame(key, payload, format);
        Scrambler::new(key, FRAME_BITS).scramble(&bytes_to_bits(&frame))
    }

    /// Embed `payload` with parameters chosen by the optimizer.
    #[instrument(skip_all, fields(format = %format, bytes = bytes.len(), issuance = %payload.issuance_id))]
    pub fn embed(
        &self,
        bytes: &[u8],
        format: Format,
        payload: &WatermarkPayload,
        key: &DatasetKey,
        objective: &OptimizationObjective,
        budget: &Budget,
    ) -> Result<EmbedOutcome> {
        payload.validate()?;
        let (doc, profile) = self.open(bytes, format)?;
        let mode = SearchMode::Pareto { max_front: EMBED_CANDIDATES };
        let search = self.search_document(&doc, &profile, objective, budget, mode)?;

        let mut candidates: Vec<StrategyParams> = search.results.iter().map(|r| r.strategy_params.clone()).collect();
        if candidates.is_empty() {
            // Nothing scored in time: fall back to the plainest coding per carrier.
            let min_r = self.config.min_redundancy;
            let r = REDUNDANCY_CHOICES.iter().copied().find(|&c| c >= min_r).unwrap_or(min_r);
            candidates = strategy::carriers(&doc, &profile)
                .into_iter()
                .map(|s| StrategyParams::new(s).with_redundancy(r))
                .collect();
        }

        let bits = self.scrambled_frame(key, payload, format);
        let ctx = self.context();
        let mut last_error = None;
        for params in candidates {
            match strategy::embed(&doc, &profile, &params, &bits, &ctx) {
                Ok(embedded) => {
                    let changed = embedded.report.unit_deltas_summary.units_changed;
                    info!(params = %params, changed, "watermark embedded");
                    return Ok(EmbedOutcome {
                        bytes: embedded.bytes,
                        report: embedded.report,
                        params,
                        search: Some(search),
                    });
                }
                Err(
                    e @ (WatermarkError::Cancelled
                    | WatermarkError::DispatchTimeout
                    | WatermarkError::WorkerFailure { .. }),
                ) => return Err(e),
                Err(e) => {
                    debug!(params = %params, error = %e, "candidate failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e @ WatermarkError::ConstraintViolation(_)) => Err(e),
            _ => Err(self.insufficient(&doc, &profile)?),
        }
    }

    fn insufficient(&self, doc: &Document, profile: &ConstraintProfile) -> Result<WatermarkError> {
        let ctx = self.context();
        let mut available = 0;
        for s in strategy::carriers(doc, profile) {
            available = available.max(strategy::capacity_bits(doc, profile, &StrategyParams::new(s), &ctx)?);
        }
        let needed = Coding { redundancy: self.config.min_redundancy as usize, parity: 0 }.coded_bits(FRAME_BITS);
        warn!(needed, available, "no carrier can hold the watermark");
        Ok(WatermarkError::InsufficientCapacity { needed, available })
    }

    /// Embed `payload` with explicit parameters.
    #[instrument(skip_all, fields(format = %format, bytes = bytes.len(), params = %params))]
    pub fn embed_with(
        &self,
        bytes: &[u8],
        format: Format,
        payload: &WatermarkPayload,
        key: &DatasetKey,
        params: &StrategyParams,
    ) -> Result<EmbedOutcome> {
        payload.validate()?;
        let (doc, profile) = self.open(bytes, format)?;
        profile.validate()?;
        let bits = self.scrambled_frame(key, payload, format);
        let embedded = strategy::embed(&doc, &profile, params, &bits, &self.context())?;
        info!(changed = embedded.report.unit_deltas_summary.units_changed, "watermark embedded");
        Ok(EmbedOutcome { bytes: embedded.bytes, report: embedded.report, params: params.clone(), search: None })
    }

    /// Find, correct and authenticate a watermark.
    ///
    /// Only malformed input, cancellation and dispatch failures are errors.
    #[instrument(skip_all, fields(format = %format, bytes = bytes.len()))]
    pub fn verify(&self, bytes: &[u8], format: Format, key: &DatasetKey) -> Result<ExtractionResult> {
        let (doc, profile) = self.open(bytes, format)?;
        let ctx = self.context();
        let scrambler = Scrambler::new(key, FRAME_BITS);
        let max_parity = PARITY_CHOICES[PARITY_CHOICES.len() - 1];
        let max_r = REDUNDANCY_CHOICES[REDUNDANCY_CHOICES.len() - 1] as usize;
        let limit = Coding { redundancy: max_r, parity: max_parity }.coded_bits(FRAME_BITS);

        let mut best = ExtractionResult::absent();
        let mut tried = 0usize;
        for carrier in strategy::carriers(&doc, &profile) {
            for &stride in &STRIDE_CHOICES {
                let base = StrategyParams::new(carrier.clone()).with_stride(stride);
                let llrs = match strategy::read_carrier(&doc, &profile, &base, limit, &ctx) {
                    Ok(l) => l,
                    Err(
                        e @ (WatermarkError::Cancelled
                        | WatermarkError::DispatchTimeout
                        | WatermarkError::WorkerFailure { .. }),
                    ) => return Err(e),
                    Err(e) => {
                        debug!(params = %base, error = %e, "carrier unreadable");
                        continue;
                    }
                };
                if llrs.iter().all(|&l| l == 0.0) {
                    continue;
                }
                for &parity in &PARITY_CHOICES {
                    for &redundancy in &REDUNDANCY_CHOICES {
                        let params = base.clone().with_parity(parity as u8).with_redundancy(redundancy);
                        let coding = params.coding();
                        if llrs.len() < coding.codeword_bits(FRAME_BITS) {
                            continue;
                        }
                        tried += 1;
                        let decoded = coding.decode(&llrs, FRAME_BITS);
                        let frame = bits_to_bytes(&scrambler.unscramble(&decoded.bits));
                        let Ok(parsed) = parse_frame(&frame) else {
                            continue;
                        };
                        let ber = decoded.bit_error_rate;
                        match parsed.open(key, format) {
                            Ok(payload) if ber <= self.config.max_bit_error_rate => {
                                info!(params = %params, ber, tried, "watermark authenticated");
                                return Ok(ExtractionResult {
                                    payload: Some(payload),
                                    authenticated: true,
                                    confidence: confidence(ber),
                                    params: Some(params),
                                    bit_error_rate: Some(ber),
                                });
                            }
                            Ok(_) => {
                                warn!(params = %params, ber, "frame authenticated but bit-error rate above threshold")
                            }
                            Err(_) => debug!(params = %params, "frame CRC matched but authentication failed"),
                        }
                        if best.bit_error_rate.map_or(true, |b| ber < b) {
                            best = ExtractionResult {
                                payload: None,
                                authenticated: false,
                                confidence: confidence(ber),
                                params: Some(params),
                                bit_error_rate: Some(ber),
                            };
                        }
                    }
                }
            }
        }
        info!(tried, frame_found = best.params.is_some(), "no authenticated watermark");
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::codec::fastq::{FastqFile, FastqRecord};
    use crate::strategy::EmbeddingStrategy;

    fn fastq(reads: usize, len: usize) -> Vec<u8> {
        let records = (0..reads)
            .map(|i| FastqRecord {
                header: format!("@read{i}").into_bytes(),
                sequence: vec![b'G'; len],
                separator: b"+".to_vec(),
                quality: (0..len).map(|j| b'5' + ((i + j) % 10) as u8).collect(),
            })
            .collect();
        FastqFile::from_records(records).to_bytes()
    }

    fn engine() -> Watermarker {
        let config = EngineConfig { worker_count: 1, chunk_units: 1000, ..EngineConfig::default() };
        Watermarker::new(config).unwrap()
    }

    fn key() -> DatasetKey {
        DatasetKey::from_bytes([3u8; 32])
    }

    #[test]
    fn explicit_params_roundtrip() {
        let bytes = fastq(40, 100);
        let payload = WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4());
        let params = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: 2 })
            .with_redundancy(3)
            .with_stride(2);
        let wm = engine();
        let out = wm.embed_with(&bytes, Format::Fastq, &payload, &key(), &params).unwrap();
        assert!(out.report.is_clean());
        assert_ne!(out.bytes, bytes);

        let result = wm.verify(&out.bytes, Format::Fastq, &key()).unwrap();
        assert!(result.authenticated);
        assert_eq!(result.payload, Some(payload));
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn wrong_key_is_not_authenticated() {
        let bytes = fastq(20, 100);
        let payload = WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4());
        let params = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: 1 });
        let wm = engine();
        let out = wm.embed_with(&bytes, Format::Fastq, &payload, &key(), &params).unwrap();
        let result = wm.verify(&out.bytes, Format::Fastq, &DatasetKey::from_bytes([4u8; 32])).unwrap();
        assert!(!result.authenticated);
        assert!(result.payload.is_none());
    }

    #[test]
    fn unmarked_file_reports_absence() {
        let result = engine().verify(&fastq(20, 100), Format::Fastq, &key()).unwrap();
        assert_eq!(result, ExtractionResult::absent());
    }

    #[test]
    fn optimizer_embed_roundtrip() {
        let bytes = fastq(60, 100);
        let payload = WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4());
        let wm = engine();
        let out = wm
            .embed(&bytes, Format::Fastq, &payload, &key(), &OptimizationObjective::default(), &Budget::evaluations(24))
            .unwrap();
        let search = out.search.as_ref().unwrap();
        assert!(search.evaluations <= 24);
        let result = wm.verify(&out.bytes, Format::Fastq, &key()).unwrap();
        assert!(result.authenticated);
        assert_eq!(result.payload, Some(payload));
        assert_eq!(result.params.as_ref().map(|p| &p.strategy), Some(&out.params.strategy));
    }

    #[test]
    fn tiny_file_is_insufficient() {
        let payload = WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4());
        let objective = OptimizationObjective::default();
        let err =
            engine().embed(&fastq(2, 10), Format::Fastq, &payload, &key(), &objective, &Budget::default()).unwrap_err();
        assert!(matches!(err, WatermarkError::InsufficientCapacity { available: 40, .. }), "{err}");
    }

    #[test]
    fn sub_second_payload_is_refused() {
        let mut payload = WatermarkPayload::issue(Uuid::new_v4(), Uuid::new_v4());
        payload.issued_at += chrono::Duration::milliseconds(123);
        let params = StrategyParams::new(EmbeddingStrategy::Fastq { bits_per_quality_unit: 1 });
        let err = engine().embed_with(&fastq(40, 100), Format::Fastq, &payload, &key(), &params).unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidParameters(_)), "{err}");
    }

    #[test]
    fn malformed_input_is_format_error() {
        let err = engine().verify(b"@r\nAC\n+\n", Format::Fastq, &key()).unwrap_err();
        assert!(matches!(err, WatermarkError::Format { format: Format::Fastq, .. }));
    }

    #[test]
    fn cancelled_engine_refuses_work() {
        let token = CancelToken::new();
        let wm = engine().with_cancel_token(token.clone());
        token.cancel();
        let err = wm.verify(&fastq(20, 100), Format::Fastq, &key()).unwrap_err();
        assert!(matches!(err, WatermarkError::Cancelled));
    }
}
