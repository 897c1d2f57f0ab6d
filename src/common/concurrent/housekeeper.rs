use super::constants::{HOUSEKEEPING_INTERVAL_MILLIS, READ_LOG_FLUSH_POINT};
use crate::common::time::Instant;

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

pub(crate) trait InnerSync {
    /// Runs a bounded round of maintenance on every segment that is not
    /// currently locked by another thread.
    fn run_pending_tasks(&self);

    fn now(&self) -> Instant;
}

/// Decides when reads should pay for maintenance. Writes always clean up
/// their own segment, so only read-mostly workloads need the housekeeper.
pub(crate) struct Housekeeper {
    is_sync_running: AtomicBool,
    run_after: AtomicU64,
    auto_run_enabled: AtomicBool,
}

impl Housekeeper {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            is_sync_running: Default::default(),
            run_after: AtomicU64::new(Self::sync_after(now).as_nanos()),
            auto_run_enabled: AtomicBool::new(true),
        }
    }

    /// Returns `true` when a segment's read log is long enough to be applied.
    pub(crate) fn should_apply_reads(&self, ch_len: usize) -> bool {
        self.auto_run_enabled.load(Ordering::Relaxed) && ch_len >= READ_LOG_FLUSH_POINT
    }

    /// Returns `true` when the periodic maintenance of the whole cache is due.
    pub(crate) fn should_run(&self, now: Instant) -> bool {
        self.auto_run_enabled.load(Ordering::Relaxed)
            && now.as_nanos() >= self.run_after.load(Ordering::Acquire)
    }

    pub(crate) fn try_run_pending_tasks<T: InnerSync>(&self, cache: &T) -> bool {
        // Try to flip the value of sync_scheduled from false to true.
        match self.is_sync_running.compare_exchange(
            false,
            true,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                let now = cache.now();
                self.run_after
                    .store(Self::sync_after(now).as_nanos(), Ordering::Release);
                cache.run_pending_tasks();
                self.is_sync_running.store(false, Ordering::Release);
                true
            }
            Err(_) => false,
        }
    }

    fn sync_after(now: Instant) -> Instant {
        now.saturating_add(Duration::from_millis(HOUSEKEEPING_INTERVAL_MILLIS))
    }
}

#[cfg(test)]
impl Housekeeper {
    pub(crate) fn disable_auto_run(&self) {
        self.auto_run_enabled.store(false, Ordering::Relaxed);
    }
}
