// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Elitist genetic search over parameter genomes.
//!
//! Each generation breeds a batch of children from the current population
//! by binary tournament, uniform crossover and per-gene mutation (a random
//! reset or a step to a neighbouring choice). Children are scored as one
//! dispatch batch; the population keeps the best of parents and children.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::{
    Budget, Evaluator, Genome, OptimizationObjective, Optimizer, Scorer, SearchMode, SearchOutcome, SearchSpace,
};
use crate::dispatch::ExecContext;
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct EvolutionarySearch {
    pub population: usize,
    pub mutation_rate: f64,
    /// Generations without improvement before giving up.
    pub patience: usize,
}

impl Default for EvolutionarySearch {
    fn default() -> Self {
        Self { population: 12, mutation_rate: 0.25, patience: 6 }
    }
}

impl EvolutionarySearch {
    fn tournament<'p, R: Rng>(&self, ev: &Evaluator<'_>, pop: &'p [Genome], rng: &mut R) -> &'p Genome {
        let a = &pop[rng.gen_range(0..pop.len())];
        let b = &pop[rng.gen_range(0..pop.len())];
        if ev.fitness(b) > ev.fitness(a) {
            b
        } else {
            a
        }
    }

    fn mutate<R: Rng>(&self, space: &SearchSpace, g: &mut Genome, rng: &mut R) {
        for (axis, gene) in g.iter_mut().enumerate() {
            let len = space.axis_len(axis);
            if len < 2 || !rng.gen_bool(self.mutation_rate) {
                continue;
            }
            *gene = if rng.gen_bool(0.5) {
                rng.gen_range(0..len)
            } else if rng.gen_bool(0.5) {
                (*gene + 1).min(len - 1)
            } else {
                gene.saturating_sub(1)
            };
        }
    }
}

impl Optimizer for EvolutionarySearch {
    fn name(&self) -> &'static str {
        "evolutionary"
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
        let size = self.population.max(2);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut population: Vec<Genome> = Vec::with_capacity(size);
        for _ in 0..size * 4 {
            if population.len() == size.min(space.size()) {
                break;
            }
            let g = space.random_genome(&mut rng);
            if !population.contains(&g) {
                population.push(g);
            }
        }
        ev.evaluate(&population)?;

        let mut best = population.iter().map(|g| ev.fitness(g)).fold(f64::NEG_INFINITY, f64::max);
        let mut idle = 0;
        let mut generation = 0;
        while !ev.exhausted() && idle < self.patience {
            generation += 1;
            let mut children: Vec<Genome> = Vec::with_capacity(size);
            let mut attempts = 0;
            while children.len() < size && attempts < size * 8 {
                attempts += 1;
                let a = *self.tournament(&ev, &population, &mut rng);
                let b = *self.tournament(&ev, &population, &mut rng);
                let mut child: Genome = [0, 1, 2, 3].map(|i| if rng.gen_bool(0.5) { a[i] } else { b[i] });
                self.mutate(space, &mut child, &mut rng);
                if !ev.seen(&child) && !children.contains(&child) {
                    children.push(child);
                }
            }
            if children.is_empty() {
                break;
            }
            ev.evaluate(&children)?;

            population.extend(children.into_iter().filter(|g| ev.seen(g)));
            // Stable sort keeps earlier genomes ahead on ties.
            population.sort_by(|x, y| ev.fitness(y).total_cmp(&ev.fitness(x)));
            population.truncate(size);
            population.shuffle(&mut rng);

            let top = population.iter().map(|g| ev.fitness(g)).fold(f64::NEG_INFINITY, f64::max);
            if top > best {
                best = top;
                idle = 0;
            } else {
                idle += 1;
            }
            debug!(generation, best, evaluations = ev.evaluations(), "generation done");
        }
        Ok(ev.finish(mode))
    }
}
