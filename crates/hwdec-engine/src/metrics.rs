use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tracing::info;

/// Lock-free decode counters, shared between the engine and its callers.
#[derive(Debug, Default)]
pub struct DecodeMetrics {
    /// Submissions the backend accepted with a sync point.
    pub frames_submitted: AtomicU64,
    /// Frames wrapped and pushed to the ready queue.
    pub frames_ready: AtomicU64,
    /// Working-surface replacements.
    pub surface_swaps: AtomicU64,
    /// `get_free_surface` calls that found the pool exhausted.
    pub no_free_surface: AtomicU64,
    /// Synchronous resubmissions after MORE_SURFACE / DEVICE_BUSY.
    pub submit_retries: AtomicU64,
    pub sessions_processed: AtomicU64,
    pub sessions_failed: AtomicU64,
}

/// Point-in-time copy of [`DecodeMetrics`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_submitted: u64,
    pub frames_ready: u64,
    pub surface_swaps: u64,
    pub no_free_surface: u64,
    pub submit_retries: u64,
    pub sessions_processed: u64,
    pub sessions_failed: u64,
}

impl DecodeMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_ready: self.frames_ready.load(Ordering::Relaxed),
            surface_swaps: self.surface_swaps.load(Ordering::Relaxed),
            no_free_surface: self.no_free_surface.load(Ordering::Relaxed),
            submit_retries: self.submit_retries.load(Ordering::Relaxed),
            sessions_processed: self.sessions_processed.load(Ordering::Relaxed),
            sessions_failed: self.sessions_failed.load(Ordering::Relaxed),
        }
    }

    pub fn report(&self) {
        let s = self.snapshot();
        info!(
            submitted = s.frames_submitted,
            ready = s.frames_ready,
            surface_swaps = s.surface_swaps,
            no_free_surface = s.no_free_surface,
            submit_retries = s.submit_retries,
            processed = s.sessions_processed,
            failed = s.sessions_failed,
            "Decode metrics"
        );
    }

    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
