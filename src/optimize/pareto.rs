// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Pareto dominance over the three objectives.

use super::OptimizationResult;

/// `a` is at least as good everywhere and strictly better somewhere.
pub fn dominates(a: &[f64; 3], b: &[f64; 3]) -> bool {
    a.iter().zip(b).all(|(x, y)| x >= y) && a.iter().zip(b).any(|(x, y)| x > y)
}

/// Non-dominated subset of `results`, keeping their order.
///
/// Candidates with identical objectives are all kept; they differ only in
/// parameters the objectives cannot see.
pub fn front(results: &[OptimizationResult]) -> Vec<OptimizationResult> {
    let objectives: Vec<[f64; 3]> = results.iter().map(|r| r.scores().objectives()).collect();
    results
        .iter()
        .enumerate()
        .filter(|(i, _)| !objectives.iter().any(|o| dominates(o, &objectives[*i])))
        .map(|(_, r)| r.clone())
        .collect()
}
