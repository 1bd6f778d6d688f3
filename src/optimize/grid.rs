// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Exhaustive search.
//!
//! Walks the whole space with a fixed step coprime to its size, so a budget
//! smaller than the space still samples every axis instead of only the
//! first carrier. The seed is not used.

use super::{
    Budget, Evaluator, OptimizationObjective, Optimizer, Scorer, SearchMode, SearchOutcome, SearchSpace, BATCH_SIZE,
};
use crate::dispatch::ExecContext;
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct GridSearch;

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Step near `n / phi` sharing no factor with `n`.
pub(crate) fn coprime_step(n: usize) -> usize {
    if n <= 2 {
        return 1;
    }
    let mut step = ((n as f64) * 0.618_033_988_75) as usize;
    while gcd(step.max(1), n) != 1 {
        step += 1;
    }
    step.max(1)
}

impl Optimizer for GridSearch {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn search(
        &self,
        space: &SearchSpace,
        scorer: &dyn Scorer,
        objective: &OptimizationObjective,
        budget: &Budget,
        mode: SearchMode,
        _seed: u64,
        ctx: &ExecContext,
    ) -> Result<SearchOutcome> {
        let mut ev = Evaluator::new(space, scorer, objective, budget, ctx);
        let n = space.size();
        let step = coprime_step(n);
        let order: Vec<usize> = (0..n).map(|i| (i * step) % n).collect();
        for batch in order.chunks(BATCH_SIZE) {
            if ev.exhausted() {
                break;
            }
            let genomes: Vec<_> = batch.iter().map(|&i| space.genome(i)).collect();
            ev.evaluate(&genomes)?;
        }
        Ok(ev.finish(mode))
    }
}
