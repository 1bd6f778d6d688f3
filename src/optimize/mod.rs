// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Strategy parameter search.
//!
//! An [`Optimizer`] explores a [`SearchSpace`] of [`StrategyParams`] and
//! asks a [`Scorer`] how each candidate fares on three objectives in
//! `[0, 1]`:
//!
//! - stealth: share of units left unchanged,
//! - capacity: share of the carrier the coded payload occupies,
//! - fidelity: one minus the mean unit delta relative to the profile bound.
//!
//! Search algorithms only differ in which candidates they propose. The
//! shared [`Evaluator`] scores proposals in parallel batches through the
//! dispatcher, memoizes them, enforces the budget and assembles the outcome.
//! Proposals depend only on the seed, so a search without a wall-clock
//! deadline is reproducible.

pub mod evolve;
pub mod grid;
pub mod pareto;
pub mod random;
pub mod scorer;

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codec::Document;
use crate::dispatch::{dispatch, DispatchControl, ExecContext};
use crate::ecc::reed_solomon::PARITY_CHOICES;
use crate::error::{Result, WatermarkError};
use crate::profile::ConstraintProfile;
use crate::strategy::{self, EmbeddingStrategy, StrategyParams, REDUNDANCY_CHOICES, STRIDE_CHOICES};

pub use evolve::EvolutionarySearch;
pub use grid::GridSearch;
pub use random::RandomSearch;
pub use scorer::{Scorer, Scores, TrialScorer};

/// Candidates scored per dispatch batch. Fixed so the outcome does not
/// depend on the worker count.
pub const BATCH_SIZE: usize = 16;

/// Weights over the three objectives.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationObjective {
    pub stealth_weight: f64,
    pub capacity_weight: f64,
    pub fidelity_weight: f64,
}

impl Default for OptimizationObjective {
    fn default() -> Self {
        Self { stealth_weight: 0.4, capacity_weight: 0.2, fidelity_weight: 0.4 }
    }
}

impl OptimizationObjective {
    pub fn new(stealth_weight: f64, capacity_weight: f64, fidelity_weight: f64) -> Self {
        Self { stealth_weight, capacity_weight, fidelity_weight }
    }

    pub fn validate(&self) -> Result<()> {
        let w = [self.stealth_weight, self.capacity_weight, self.fidelity_weight];
        if w.iter().any(|x| !x.is_finite() || *x < 0.0) || w.iter().sum::<f64>() <= 0.0 {
            return Err(WatermarkError::InvalidParameters(format!(
                "objective weights {w:?} must be non-negative with a positive sum"
            )));
        }
        Ok(())
    }

    pub fn weighted(&self, scores: &Scores) -> f64 {
        let [s, c, f] = scores.objectives();
        s * self.stealth_weight + c * self.capacity_weight + f * self.fidelity_weight
    }
}

/// Evaluation and wall-clock limits. A search always has at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budget {
    pub max_evaluations: usize,
    pub deadline: Option<Duration>,
}

impl Default for Budget {
    fn default() -> Self {
        Self { max_evaluations: 64, deadline: None }
    }
}

impl Budget {
    pub fn evaluations(max_evaluations: usize) -> Self {
        Self { max_evaluations, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchMode {
    /// Arg-max of the weighted objective.
    Single,
    /// Non-dominated candidates, best weighted first, at most `max_front`.
    Pareto { max_front: usize },
}

/// One scored candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub strategy_params: StrategyParams,
    pub stealth_score: f64,
    pub capacity_used_fraction: f64,
    /// Mean unit delta relative to the profile bound, in `[0, 1]`.
    pub fidelity_delta: f64,
    pub weighted_score: f64,
}

impl OptimizationResult {
    pub fn scores(&self) -> Scores {
        Scores {
            stealth: self.stealth_score,
            capacity_used_fraction: self.capacity_used_fraction,
            fidelity_delta: self.fidelity_delta,
        }
    }
}

/// What a search returns. `timed_out` means the deadline cut it short and
/// `results` hold the best found until then.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<OptimizationResult>,
    pub evaluations: usize,
    pub timed_out: bool,
}

impl SearchOutcome {
    pub fn best(&self) -> Option<&OptimizationResult> {
        self.results.first()
    }
}

/// The axes a search may combine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchSpace {
    pub carriers: Vec<EmbeddingStrategy>,
    pub redundancy: Vec<u8>,
    pub parity: Vec<u8>,
    pub stride: Vec<u8>,
}

/// Index into each axis of a [`SearchSpace`].
pub type Genome = [usize; 4];

impl SearchSpace {
    /// Every carrier of `doc` combined with every coding and stride the
    /// verifier can rediscover.
    pub fn for_document(doc: &Document, profile: &ConstraintProfile, min_redundancy: u8) -> Self {
        Self {
            carriers: strategy::carriers(doc, profile),
            redundancy: REDUNDANCY_CHOICES.iter().copied().filter(|&r| r >= min_redundancy).collect(),
            parity: PARITY_CHOICES.iter().map(|&p| p as u8).collect(),
            stride: STRIDE_CHOICES.to_vec(),
        }
    }

    fn axes(&self) -> [usize; 4] {
        [self.carriers.len(), self.redundancy.len(), self.parity.len(), self.stride.len()]
    }

    pub fn size(&self) -> usize {
        self.axes().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Mixed-radix decoding of `index` with the stride axis varying fastest.
    pub fn genome(&self, index: usize) -> Genome {
        let axes = self.axes();
        let mut g = [0; 4];
        let mut rest = index;
        for i in (0..4).rev() {
            g[i] = rest % axes[i];
            rest /= axes[i];
        }
        g
    }

    pub fn params(&self, g: Genome) -> StrategyParams {
        StrategyParams {
            strategy: self.carriers[g[0]].clone(),
            redundancy: self.redundancy[g[1]],
            parity_bytes: self.parity[g[2]],
            stride: self.stride[g[3]],
        }
    }

    pub fn random_genome<R: Rng>(&self, rng: &mut R) -> Genome {
        let axes = self.axes();
        [0, 1, 2, 3].map(|i| rng.gen_range(0..axes[i]))
    }

    pub(crate) fn axis_len(&self, axis: usize) -> usize {
        self.axes()[axis]
    }
}

/// A pluggable search algorithm.
pub trait Optimizer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Search `space` until the budget runs out or nothing is left to try.
    /// Cancellation through `ctx` is an error; running out of time is not.
    fn search(
        &self,
        space: &SearchSpace,
        scorer: &dyn Scorer,
        objective: &OptimizationObjective,
        budget: &Budget,
        mode: SearchMode,
        seed: u64,
        ctx: &ExecContext,
    ) -> Result<SearchOutcome>;
}

/// Optimizer selection by configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Grid,
    Random,
    #[default]
    Evolutionary,
}

impl OptimizerKind {
    pub fn build(self) -> Box<dyn Optimizer> {
        match self {
            Self::Grid => Box::new(GridSearch),
            Self::Random => Box::new(RandomSearch),
            Self::Evolutionary => Box::new(EvolutionarySearch::default()),
        }
    }
}

impl std::str::FromStr for OptimizerKind {
    type Err = WatermarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "random" => Ok(Self::Random),
            "evolutionary" | "evolve" | "genetic" => Ok(Self::Evolutionary),
            other => Err(WatermarkError::Config(format!("unknown optimizer '{other}'"))),
        }
    }
}

/// Budgeted, memoized batch scoring shared by every optimizer.
pub struct Evaluator<'a> {
    space: &'a SearchSpace,
    scorer: &'a dyn Scorer,
    objective: OptimizationObjective,
    max_evaluations: usize,
    control: DispatchControl,
    ctx: &'a ExecContext,
    memo: HashMap<Genome, Option<OptimizationResult>>,
    /// Genomes in first-evaluation order; breaks score ties deterministically.
    order: Vec<Genome>,
    timed_out: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        space: &'a SearchSpace,
        scorer: &'a dyn Scorer,
        objective: &OptimizationObjective,
        budget: &Budget,
        ctx: &'a ExecContext,
    ) -> Self {
        let mut control = DispatchControl { cancel: ctx.control.cancel.clone(), deadline: ctx.control.deadline };
        if let Some(d) = budget.deadline {
            let at = Instant::now() + d;
            control.deadline = Some(control.deadline.map_or(at, |c| c.min(at)));
        }
        Self {
            space,
            scorer,
            objective: *objective,
            max_evaluations: budget.max_evaluations.min(space.size()),
            control,
            ctx,
            memo: HashMap::new(),
            order: Vec::new(),
            timed_out: false,
        }
    }

    pub fn space(&self) -> &SearchSpace {
        self.space
    }

    pub fn evaluations(&self) -> usize {
        self.order.len()
    }

    /// Nothing more will be evaluated.
    pub fn exhausted(&self) -> bool {
        self.timed_out || self.order.len() >= self.max_evaluations
    }

    pub fn seen(&self, g: &Genome) -> bool {
        self.memo.contains_key(g)
    }

    /// Known result for `g`: `None` if unseen, `Some(None)` if infeasible.
    pub fn result(&self, g: &Genome) -> Option<Option<&OptimizationResult>> {
        self.memo.get(g).map(Option::as_ref)
    }

    /// Weighted score of `g`, `-inf` when infeasible or unseen.
    pub fn fitness(&self, g: &Genome) -> f64 {
        match self.memo.get(g) {
            Some(Some(r)) => r.weighted_score,
            _ => f64::NEG_INFINITY,
        }
    }

    /// Score the unseen genomes of `batch`, truncated to the remaining budget.
    pub fn evaluate(&mut self, batch: &[Genome]) -> Result<()> {
        if self.exhausted() {
            return Ok(());
        }
        let mut fresh: Vec<Genome> = Vec::new();
        for g in batch {
            if !self.memo.contains_key(g) && !fresh.contains(g) {
                fresh.push(*g);
            }
        }
        fresh.truncate(self.max_evaluations - self.order.len());
        if fresh.is_empty() {
            return Ok(());
        }

        let params: Vec<StrategyParams> = fresh.iter().map(|g| self.space.params(*g)).collect();
        let scorer = self.scorer;
        let backend = self.ctx.backend.as_ref();
        let scored = match dispatch(params.clone(), |_, p| Ok(scorer.score(&p)), backend, &self.control) {
            Ok(s) => s,
            Err(WatermarkError::DispatchTimeout) => {
                warn!(evaluations = self.order.len(), "optimizer deadline reached, keeping best so far");
                self.timed_out = true;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        for ((g, p), s) in fresh.into_iter().zip(params).zip(scored) {
            let result = s.map(|scores| OptimizationResult {
                weighted_score: self.objective.weighted(&scores),
                strategy_params: p,
                stealth_score: scores.stealth,
                capacity_used_fraction: scores.capacity_used_fraction,
                fidelity_delta: scores.fidelity_delta,
            });
            self.memo.insert(g, result);
            self.order.push(g);
        }
        Ok(())
    }

    /// Feasible results, best weighted first; ties keep evaluation order.
    fn ranked(&self) -> Vec<OptimizationResult> {
        let mut feasible: Vec<(usize, &OptimizationResult)> = self
            .order
            .iter()
            .enumerate()
            .filter_map(|(i, g)| self.memo.get(g).and_then(Option::as_ref).map(|r| (i, r)))
            .collect();
        feasible.sort_by(|a, b| b.1.weighted_score.total_cmp(&a.1.weighted_score).then(a.0.cmp(&b.0)));
        feasible.into_iter().map(|(_, r)| r.clone()).collect()
    }

    pub fn finish(self, mode: SearchMode) -> SearchOutcome {
        let ranked = self.ranked();
        let results = match mode {
            SearchMode::Single => ranked.into_iter().take(1).collect(),
            SearchMode::Pareto { max_front } => {
                let mut front = pareto::front(&ranked);
                front.truncate(max_front);
                front
            }
        };
        debug!(evaluations = self.order.len(), kept = results.len(), timed_out = self.timed_out, "search finished");
        SearchOutcome { results, evaluations: self.order.len(), timed_out: self.timed_out }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::codec::Format;

    /// Deterministic synthetic landscape over a FASTQ-shaped space.
    pub(crate) struct Synthetic;

    impl Scorer for Synthetic {
        fn score(&self, p: &StrategyParams) -> Option<Scores> {
            let EmbeddingStrategy::Fastq { bits_per_quality_unit: k } = p.strategy else {
                return None;
            };
            if p.redundancy > 7 {
                return None;
            }
            let used =
                (p.redundancy as f64 * (1.0 + p.parity_bytes as f64 / 32.0)) / (8.0 * k as f64 * p.stride as f64);
            Some(Scores {
                stealth: 1.0 - used.min(1.0) / 2.0,
                capacity_used_fraction: used.min(1.0),
                fidelity_delta: (k as f64 - 1.0) / 2.0,
            })
        }
    }

    pub(crate) fn space() -> SearchSpace {
        SearchSpace {
            carriers: vec![
                EmbeddingStrategy::Fastq { bits_per_quality_unit: 1 },
                EmbeddingStrategy::Fastq { bits_per_quality_unit: 2 },
            ],
            redundancy: REDUNDANCY_CHOICES.to_vec(),
            parity: PARITY_CHOICES.iter().map(|&p| p as u8).collect(),
            stride: STRIDE_CHOICES.to_vec(),
        }
    }

    #[test]
    fn genome_decoding_covers_space() {
        let s = space();
        assert_eq!(s.size(), 2 * 6 * 6 * 4);
        let all: std::collections::HashSet<Genome> = (0..s.size()).map(|i| s.genome(i)).collect();
        assert_eq!(all.len(), s.size());
        assert_eq!(s.genome(1), [0, 0, 0, 1]);
    }

    #[test]
    fn evaluator_respects_budget_and_memoizes() {
        let s = space();
        let ctx = ExecContext::serial();
        let objective = OptimizationObjective::default();
        let mut ev = Evaluator::new(&s, &Synthetic, &objective, &Budget::evaluations(5), &ctx);
        let batch: Vec<Genome> = (0..10).map(|i| s.genome(i)).collect();
        ev.evaluate(&batch[..3]).unwrap();
        ev.evaluate(&batch[..3]).unwrap();
        assert_eq!(ev.evaluations(), 3);
        ev.evaluate(&batch).unwrap();
        assert_eq!(ev.evaluations(), 5);
        assert!(ev.exhausted());
        let out = ev.finish(SearchMode::Single);
        assert_eq!(out.results.len(), 1);
        assert_eq!(out.evaluations, 5);
        assert!(!out.timed_out);
    }

    #[test]
    fn expired_deadline_is_a_timeout_not_an_error() {
        let s = space();
        let ctx = ExecContext::serial();
        let budget = Budget::evaluations(100).with_deadline(Duration::ZERO);
        let mut ev = Evaluator::new(&s, &Synthetic, &OptimizationObjective::default(), &budget, &ctx);
        std::thread::sleep(Duration::from_millis(2));
        ev.evaluate(&[s.genome(0)]).unwrap();
        let out = ev.finish(SearchMode::Single);
        assert!(out.timed_out);
        assert!(out.results.is_empty());
    }

    #[test]
    fn cancellation_propagates() {
        let s = space();
        let token = crate::cancel::CancelToken::new();
        token.cancel();
        let ctx = ExecContext::serial().with_control(DispatchControl::new().with_cancel(token));
        let mut ev = Evaluator::new(&s, &Synthetic, &OptimizationObjective::default(), &Budget::default(), &ctx);
        let err = ev.evaluate(&[s.genome(0)]).unwrap_err();
        assert!(matches!(err, WatermarkError::Cancelled));
    }

    #[test]
    fn objective_weights_validated() {
        assert!(OptimizationObjective::default().validate().is_ok());
        assert!(OptimizationObjective::new(-1.0, 1.0, 1.0).validate().is_err());
        assert!(OptimizationObjective::new(0.0, 0.0, 0.0).validate().is_err());
        assert!(OptimizationObjective::new(f64::NAN, 1.0, 1.0).validate().is_err());
    }

    #[test]
    fn optimizer_kind_parses() {
        assert_eq!("grid".parse::<OptimizerKind>().unwrap(), OptimizerKind::Grid);
        assert_eq!("Evolutionary".parse::<OptimizerKind>().unwrap(), OptimizerKind::Evolutionary);
        assert!("annealing".parse::<OptimizerKind>().is_err());
        let json = serde_json::to_string(&OptimizerKind::Random).unwrap();
        assert_eq!(json, "\"random\"");
    }

    #[test]
    fn space_for_document_honours_min_redundancy() {
        let doc = crate::codec::decode(b"@r\nAC\n+\nII\n", Format::Fastq).unwrap();
        let s = SearchSpace::for_document(&doc, &crate::profile::bounds_for(Format::Fastq), 5);
        assert_eq!(s.redundancy, vec![5, 7, 11, 15]);
        assert_eq!(s.carriers.len(), 2);
    }
}
