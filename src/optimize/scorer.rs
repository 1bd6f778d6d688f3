// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Black-box candidate scoring.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::Document;
use crate::dispatch::ExecContext;
use crate::profile::ConstraintProfile;
use crate::strategy::{self, StrategyParams};

/// Raw measurements of one trial embed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Share of units left unchanged.
    pub stealth: f64,
    /// Coded bits over carrier capacity.
    pub capacity_used_fraction: f64,
    /// Mean unit delta over the profile bound, clamped to `[0, 1]`.
    pub fidelity_delta: f64,
}

impl Scores {
    /// The three objectives, each to be maximized: stealth, capacity, fidelity.
    pub fn objectives(&self) -> [f64; 3] {
        [self.stealth, self.capacity_used_fraction, 1.0 - self.fidelity_delta]
    }
}

/// Scores a candidate; `None` when it cannot be embedded at all.
pub trait Scorer: Sync {
    fn score(&self, params: &StrategyParams) -> Option<Scores>;
}

/// Scores by embedding pseudo-random bits into a private copy of the document.
///
/// The real payload is scrambled before embedding, so random bits of the
/// same length change the carrier the way the real one will.
pub struct TrialScorer<'a> {
    doc: &'a Document,
    profile: &'a ConstraintProfile,
    trial_bits: Vec<u8>,
    ctx: ExecContext,
}

impl<'a> TrialScorer<'a> {
    pub fn new(doc: &'a Document, profile: &'a ConstraintProfile, payload_bits: usize, seed: u64) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let trial_bits = (0..payload_bits).map(|_| rng.gen_range(0..2u8)).collect();
        // Trials already run in parallel; each one stays on its own thread.
        Self { doc, profile, trial_bits, ctx: ExecContext::serial() }
    }
}

impl Scorer for TrialScorer<'_> {
    fn score(&self, params: &StrategyParams) -> Option<Scores> {
        let capacity = match strategy::capacity_bits(self.doc, self.profile, params, &self.ctx) {
            Ok(c) => c,
            Err(e) => {
                debug!(params = %params, error = %e, "candidate rejected");
                return None;
            }
        };
        let coded = params.coding().coded_bits(self.trial_bits.len());
        if capacity == 0 || coded > capacity {
            return None;
        }
        let embedded = match strategy::embed(self.doc, self.profile, params, &self.trial_bits, &self.ctx) {
            Ok(e) => e,
            Err(e) => {
                debug!(params = %params, error = %e, "trial embed failed");
                return None;
            }
        };
        let summary = &embedded.report.unit_deltas_summary;
        let bound = self.profile.max_unit_delta.max(1) as f64;
        Some(Scores {
            stealth: 1.0 - summary.change_rate,
            capacity_used_fraction: coded as f64 / capacity as f64,
            fidelity_delta: (summary.mean_delta / bound).clamp(0.0, 1.0),
        })
    }
}
