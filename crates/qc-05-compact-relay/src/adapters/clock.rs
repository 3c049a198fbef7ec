//! Manually driven clock.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::ports::TimeSource;

/// Time source that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    time: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(initial_ms: u64) -> Self {
        Self {
            time: AtomicU64::new(initial_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.time.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, time_ms: u64) {
        self.time.store(time_ms, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}
