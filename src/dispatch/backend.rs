// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Compute backends.
//!
//! A backend only knows how to run `n` independent index-addressed tasks.
//! It never sees chunk data or embedding logic, so a GPU context, a thread
//! pool or the calling thread are interchangeable behind one trait object.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
#[cfg(feature = "parallel")]
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "parallel")]
use crate::error::{Result, WatermarkError};

/// Executes independent tasks, possibly in parallel.
pub trait ComputeBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Upper bound on tasks running at once.
    fn workers(&self) -> usize;

    /// Run `task(i)` once for every `i` in `0..tasks` and return when all are done.
    ///
    /// `task` never panics; the dispatcher catches panics before they reach
    /// the backend.
    fn execute(&self, tasks: usize, task: &(dyn Fn(usize) + Sync));
}

/// Runs every task on the calling thread, in index order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn name(&self) -> &'static str {
        "serial"
    }

    fn workers(&self) -> usize {
        1
    }

    fn execute(&self, tasks: usize, task: &(dyn Fn(usize) + Sync)) {
        for i in 0..tasks {
            task(i);
        }
    }
}

/// Spawns scoped OS threads that pull task indices from a shared counter.
#[derive(Debug, Clone, Copy)]
pub struct ScopedThreadBackend {
    workers: usize,
}

impl ScopedThreadBackend {
    pub fn new(workers: usize) -> Self {
        Self { workers: workers.max(1) }
    }
}

impl ComputeBackend for ScopedThreadBackend {
    fn name(&self) -> &'static str {
        "scoped-threads"
    }

    fn workers(&self) -> usize {
        self.workers
    }

    fn execute(&self, tasks: usize, task: &(dyn Fn(usize) + Sync)) {
        let threads = self.workers.min(tasks);
        if threads <= 1 {
            return SerialBackend.execute(tasks, task);
        }
        let next = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..threads {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::Relaxed);
                    if i >= tasks {
                        break;
                    }
                    task(i);
                });
            }
        });
    }
}

/// Work-stealing execution on a rayon thread pool.
#[cfg(feature = "parallel")]
#[derive(Debug, Clone)]
pub struct RayonBackend {
    /// `None` runs on rayon's global pool.
    pool: Option<Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "parallel")]
impl RayonBackend {
    /// Use rayon's global pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Build a dedicated pool with `workers` threads.
    pub fn with_workers(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("aperture-wm-{i}"))
            .build()
            .map_err(|e| WatermarkError::Config(format!("cannot build thread pool: {e}")))?;
        Ok(Self { pool: Some(Arc::new(pool)) })
    }
}

#[cfg(feature = "parallel")]
impl ComputeBackend for RayonBackend {
    fn name(&self) -> &'static str {
        "rayon"
    }

    fn workers(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    fn execute(&self, tasks: usize, task: &(dyn Fn(usize) + Sync)) {
        let run = || (0..tasks).into_par_iter().for_each(task);
        match &self.pool {
            Some(pool) => pool.install(run),
            None => run(),
        }
    }
}

/// The default backend for `workers` threads (`0` = every core): rayon when
/// available.
pub fn default_backend(workers: usize) -> std::sync::Arc<dyn ComputeBackend> {
    #[cfg(feature = "parallel")]
    {
        if workers == 0 {
            return std::sync::Arc::new(RayonBackend::global());
        }
        if workers > 1 {
            if let Ok(backend) = RayonBackend::with_workers(workers) {
                return std::sync::Arc::new(backend);
            }
        }
    }
    let workers = if workers == 0 { std::thread::available_parallelism().map_or(1, |n| n.get()) } else { workers };
    if workers > 1 {
        std::sync::Arc::new(ScopedThreadBackend::new(workers))
    } else {
        std::sync::Arc::new(SerialBackend)
    }
}
