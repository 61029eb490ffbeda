//! Shared health state for the /health endpoint.
//! Updated by the pipeline after each run, read by the API.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared health metrics. Updated by the pipeline, read by API.
#[derive(Default)]
pub struct HealthState {
    /// False after a run found the store unreachable.
    pub store_ok: AtomicBool,
    /// Unix millisecond timestamp of the last finished run (0 = none).
    pub last_run_at_ms: AtomicU64,
    pub runs_completed: AtomicU64,
    /// Stories queued by the last finished run.
    pub last_run_queued: AtomicU64,
    /// True if the last run's ranker call succeeded.
    pub last_run_scored: AtomicBool,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_store_ok(&self, v: bool) {
        self.store_ok.store(v, Ordering::Relaxed);
    }

    pub fn record_run(&self, finished_at_ms: i64, queued: usize, scored: bool) {
        self.last_run_at_ms.store(finished_at_ms.max(0) as u64, Ordering::Relaxed);
        self.last_run_queued.store(queued as u64, Ordering::Relaxed);
        self.last_run_scored.store(scored, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_ok(&self) -> bool {
        self.store_ok.load(Ordering::Relaxed)
    }

    pub fn last_run_at_ms(&self) -> u64 {
        self.last_run_at_ms.load(Ordering::Relaxed)
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed.load(Ordering::Relaxed)
    }

    pub fn last_run_queued(&self) -> u64 {
        self.last_run_queued.load(Ordering::Relaxed)
    }

    pub fn last_run_scored(&self) -> bool {
        self.last_run_scored.load(Ordering::Relaxed)
    }
}
