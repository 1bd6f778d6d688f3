// Copyright (c) 2026 The aperture-watermark authors
// Portions derived from phasm-core, Copyright (c) 2026 Christoph Gaffga
// SPDX-License-Identifier: GPL-3.0-only

//! Compute dispatcher.
//!
//! [`dispatch`] applies a chunk function to independent, order-preserving
//! chunks on a [`ComputeBackend`] and returns the results in chunk order.
//! Merging is a pure index-ordered collection, so the output does not depend
//! on the backend or its worker count.
//!
//! Failure is all-or-nothing: the first failing chunk stops new chunks from
//! starting and the whole dispatch returns an error. Cancellation and the
//! deadline are checked at chunk boundaries.

pub mod backend;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

pub use backend::{default_backend, ComputeBackend, ScopedThreadBackend, SerialBackend};
#[cfg(feature = "parallel")]
pub use backend::RayonBackend;

use crate::cancel::CancelToken;
use crate::error::{Result, WatermarkError};

/// Cancellation and wall-clock limits for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct DispatchControl {
    pub cancel: Option<CancelToken>,
    pub deadline: Option<Instant>,
}

impl DispatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Error if cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if let Some(token) = &self.cancel {
            token.check()?;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(WatermarkError::DispatchTimeout),
            _ => Ok(()),
        }
    }
}

/// Everything a strategy needs to run chunked work.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub backend: Arc<dyn ComputeBackend>,
    pub control: DispatchControl,
    /// Target number of units per chunk. Fixes chunk boundaries independently
    /// of the worker count.
    pub chunk_units: usize,
}

/// Default units per chunk.
pub const DEFAULT_CHUNK_UNITS: usize = 64 * 1024;

impl ExecContext {
    pub fn new(backend: Arc<dyn ComputeBackend>) -> Self {
        Self { backend, control: DispatchControl::default(), chunk_units: DEFAULT_CHUNK_UNITS }
    }

    /// Single-threaded context.
    pub fn serial() -> Self {
        Self::new(Arc::new(SerialBackend))
    }

    pub fn with_chunk_units(mut self, chunk_units: usize) -> Self {
        self.chunk_units = chunk_units.max(1);
        self
    }

    pub fn with_control(mut self, control: DispatchControl) -> Self {
        self.control = control;
        self
    }

    /// Run `chunk_fn` over `chunks` on this context's backend.
    pub fn dispatch<T, R, F>(&self, chunks: Vec<T>, chunk_fn: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> Result<R> + Sync,
    {
        dispatch(chunks, chunk_fn, self.backend.as_ref(), &self.control)
    }
}

fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Apply `chunk_fn(index, chunk)` to every chunk and collect results in order.
pub fn dispatch<T, R, F>(
    chunks: Vec<T>,
    chunk_fn: F,
    backend: &dyn ComputeBackend,
    control: &DispatchControl,
) -> Result<Vec<R>>
where
    T: Send,
    R: Send,
    F: Fn(usize, T) -> Result<R> + Sync,
{
    control.check()?;
    let n = chunks.len();
    debug!(chunks = n, backend = backend.name(), workers = backend.workers(), "dispatch");

    let inputs: Vec<Mutex<Option<T>>> = chunks.into_iter().map(|c| Mutex::new(Some(c))).collect();
    let outputs: Vec<Mutex<Option<Result<R>>>> = (0..n).map(|_| Mutex::new(None)).collect();
    let failed = AtomicBool::new(false);

    let task = |i: usize| {
        if failed.load(Ordering::Relaxed) {
            return;
        }
        let outcome = match control.check() {
            Err(e) => Err(e),
            Ok(()) => {
                let input = inputs[i].lock().unwrap_or_else(PoisonError::into_inner).take();
                match input {
                    None => Err(WatermarkError::WorkerFailure { chunk: i, reason: "chunk taken twice".into() }),
                    Some(chunk) => match panic::catch_unwind(AssertUnwindSafe(|| chunk_fn(i, chunk))) {
                        Ok(result) => result,
                        Err(payload) => {
                            Err(WatermarkError::WorkerFailure { chunk: i, reason: panic_reason(&*payload) })
                        }
                    },
                }
            }
        };
        if outcome.is_err() {
            failed.store(true, Ordering::Relaxed);
        }
        *outputs[i].lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    };
    backend.execute(n, &task);

    let mut results = Vec::with_capacity(n);
    let mut first_error: Option<WatermarkError> = None;
    for (i, slot) in outputs.into_iter().enumerate() {
        match slot.into_inner().unwrap_or_else(PoisonError::into_inner) {
            Some(Ok(r)) => results.push(r),
            Some(Err(e)) => {
                let e = match e {
                    e @ (WatermarkError::Cancelled
                    | WatermarkError::DispatchTimeout
                    | WatermarkError::WorkerFailure { .. }) => e,
                    other => WatermarkError::WorkerFailure { chunk: i, reason: other.to_string() },
                };
                let replace = match (&first_error, &e) {
                    (None, _) => true,
                    // Cancellation and timeouts explain every other failure.
                    (
                        Some(WatermarkError::WorkerFailure { .. }),
                        WatermarkError::Cancelled | WatermarkError::DispatchTimeout,
                    ) => true,
                    _ => false,
                };
                if replace {
                    first_error = Some(e);
                }
            }
            None => {}
        }
    }
    if let Some(e) = first_error {
        warn!(error = %e, "dispatch failed, discarding all chunk results");
        return Err(e);
    }
    if results.len() != n {
        return Err(WatermarkError::WorkerFailure { chunk: results.len(), reason: "chunk produced no result".into() });
    }
    // The wall-clock limit covers the whole dispatch, not just chunk starts.
    control.check()?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backends() -> Vec<Arc<dyn ComputeBackend>> {
        let mut v: Vec<Arc<dyn ComputeBackend>> = vec![Arc::new(SerialBackend), Arc::new(ScopedThreadBackend::new(4))];
        #[cfg(feature = "parallel")]
        v.push(Arc::new(RayonBackend::with_workers(3).unwrap()));
        v
    }

    #[test]
    fn preserves_order() {
        for backend in backends() {
            let chunks: Vec<Vec<u32>> = (0..50).map(|i| vec![i; 3]).collect();
            let out = dispatch(chunks, |i, c| Ok((i, c.iter().sum::<u32>())), backend.as_ref(), &DispatchControl::new())
                .unwrap();
            let expected: Vec<(usize, u32)> = (0..50).map(|i| (i, 3 * i as u32)).collect();
            assert_eq!(out, expected, "{}", backend.name());
        }
    }

    #[test]
    fn chunk_error_becomes_worker_failure() {
        for backend in backends() {
            let err = dispatch(
                (0..20).collect::<Vec<u32>>(),
                |_, c| if c == 7 { Err(WatermarkError::InvalidParameters("bad".into())) } else { Ok(c) },
                backend.as_ref(),
                &DispatchControl::new(),
            )
            .unwrap_err();
            assert!(matches!(err, WatermarkError::WorkerFailure { chunk: 7, .. }), "{err:?}");
        }
    }

    #[test]
    fn panic_is_caught() {
        let err = dispatch(
            vec![1u8, 2, 3],
            |_, c| {
                if c == 2 {
                    panic!("boom");
                }
                Ok(c)
            },
            &ScopedThreadBackend::new(2),
            &DispatchControl::new(),
        )
        .unwrap_err();
        match err {
            WatermarkError::WorkerFailure { chunk, reason } => {
                assert_eq!(chunk, 1);
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancelled_before_start() {
        let token = CancelToken::new();
        token.cancel();
        let control = DispatchControl::new().with_cancel(token);
        let err = dispatch(vec![1, 2], |_, c: i32| Ok(c), &SerialBackend, &control).unwrap_err();
        assert!(matches!(err, WatermarkError::Cancelled));
    }

    #[test]
    fn cancel_mid_dispatch_discards_results() {
        let token = CancelToken::new();
        let control = DispatchControl::new().with_cancel(token.clone());
        let err = dispatch(
            (0..10).collect::<Vec<i32>>(),
            |i, c| {
                if i == 3 {
                    token.cancel();
                }
                Ok(c)
            },
            &SerialBackend,
            &control,
        )
        .unwrap_err();
        assert!(matches!(err, WatermarkError::Cancelled));
    }

    #[test]
    fn expired_deadline_times_out() {
        let control = DispatchControl { cancel: None, deadline: Some(Instant::now()) };
        let err = dispatch(vec![1], |_, c: i32| Ok(c), &SerialBackend, &control).unwrap_err();
        assert!(matches!(err, WatermarkError::DispatchTimeout));
    }

    #[test]
    fn empty_input() {
        let out: Vec<i32> = dispatch(Vec::<i32>::new(), |_, c| Ok(c), &SerialBackend, &DispatchControl::new()).unwrap();
        assert!(out.is_empty());
    }
}
