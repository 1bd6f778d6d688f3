// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Uniform random sampling with a seeded ChaCha stream.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::{
    Budget, Evaluator, Genome, OptimizationObjective, Optimizer, Scorer, SearchMode, SearchOutcome, SearchSpace,
    BATCH_SIZE,
};
use crate::dispatch::ExecContext;
use crate::error::Result;

/// Draws beyond this many consecutive duplicates end the search.
const MAX_STALE_DRAWS: usize = 64;

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSearch;

impl Optimizer for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn search(
        &self,
        space: &SearchSpace,
        scorer: &dyn Scorer,
        objective: &OptimizationObjective,
        budget: &Budget,
        mode: SearchMode,
        seed: u64,
        ctx: &ExecContext,
    ) -> Result<SearchOutcome> {
        let mut ev = Evaluator::new(space, scorer, objective, budget, ctx);
        if space.is_empty() {
            return Ok(ev.finish(mode));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut stale = 0;
        while !ev.exhausted() && stale < MAX_STALE_DRAWS {
            let mut batch: Vec<Genome> = Vec::with_capacity(BATCH_SIZE);
            while batch.len() < BATCH_SIZE && stale < MAX_STALE_DRAWS {
                let g = space.random_genome(&mut rng);
                if ev.seen(&g) || batch.contains(&g) {
                    stale += 1;
                } else {
                    stale = 0;
                    batch.push(g);
                }
            }
            ev.evaluate(&batch)?;
        }
        Ok(ev.finish(mode))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimize::tests::{space, Synthetic};

    #[test]
    fn same_seed_same_outcome() {
        let s = space();
        let objective = OptimizationObjective::default();
        let run = |seed| {
            let mode = SearchMode::Pareto { max_front: 5 };
            RandomSearch
                .search(&s, &Synthetic, &objective, &Budget::evaluations(40), mode, seed, &ExecContext::serial())
                .unwrap()
        };
        let a = run(11);
        assert_eq!(a, run(11));
        assert_eq!(a.evaluations, 40);
        assert!(a.results.len() <= 5);
    }

    #[test]
    fn tiny_space_is_exhausted_without_looping() {
        let mut s = space();
        s.carriers.truncate(1);
        s.redundancy.truncate(1);
        s.parity.truncate(1);
        let objective = OptimizationObjective::default();
        let ctx = ExecContext::serial();
        let budget = Budget::evaluations(1000);
        let out = RandomSearch.search(&s, &Synthetic, &objective, &budget, SearchMode::Single, 3, &ctx).unwrap();
        assert_eq!(out.evaluations, 4);
    }
}
