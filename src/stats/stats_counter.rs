use super::CacheStats;
use crate::notification::RemovalCause;

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{atomic::AtomicCell, CachePadded};
use once_cell::sync::Lazy;

fn saturating_add(counter: &AtomicCell<u64>, value: u64) {
    let mut v0 = counter.load();
    loop {
        let v1 = v0.saturating_add(value);
        match counter.compare_exchange(v0, v1) {
            Ok(_) => break,
            Err(v2) => v0 = v2,
        }
    }
}

/// Accumulates cache events. Every method must be cheap and non-blocking as
/// they are called on the hot paths, sometimes while a segment lock is held.
pub(crate) trait StatsCounter: Send + Sync {
    #[allow(unused_variables)]
    fn record_hits(&self, count: u32) {}

    #[allow(unused_variables)]
    fn record_misses(&self, count: u32) {}

    #[allow(unused_variables)]
    fn record_load_success(&self, load_time_nanos: u64) {}

    #[allow(unused_variables)]
    fn record_load_failure(&self, load_time_nanos: u64) {}

    #[allow(unused_variables)]
    fn record_eviction(&self, weight: u32, cause: RemovalCause) {}

    fn snapshot(&self) -> CacheStats;
}

/// A `StatsCounter` that does not record any cache events.
#[derive(Default)]
pub(crate) struct DisabledStatsCounter;

impl StatsCounter for DisabledStatsCounter {
    fn snapshot(&self) -> CacheStats {
        CacheStats::default()
    }
}

#[derive(Default)]
pub(crate) struct DefaultStatsCounter {
    hit_count: AtomicCell<u64>,
    miss_count: AtomicCell<u64>,
    load_success_count: AtomicCell<u64>,
    load_failure_count: AtomicCell<u64>,
    total_load_time: AtomicCell<u64>,
    eviction_count: AtomicCell<u64>,
    eviction_weight: AtomicCell<u64>,
}

impl DefaultStatsCounter {
    pub(crate) fn striped() -> StripedStatsCounter<Self> {
        Default::default()
    }
}

impl StatsCounter for DefaultStatsCounter {
    fn record_hits(&self, count: u32) {
        saturating_add(&self.hit_count, count as u64);
    }

    fn record_misses(&self, count: u32) {
        saturating_add(&self.miss_count, count as u64);
    }

    fn record_load_success(&self, load_time_nanos: u64) {
        saturating_add(&self.load_success_count, 1);
        saturating_add(&self.total_load_time, load_time_nanos);
    }

    fn record_load_failure(&self, load_time_nanos: u64) {
        saturating_add(&self.load_failure_count, 1);
        saturating_add(&self.total_load_time, load_time_nanos);
    }

    /// Counts only the automatic removals: `Size`, `Expired` and `Collected`.
    fn record_eviction(&self, weight: u32, cause: RemovalCause) {
        if cause.was_evicted() {
            saturating_add(&self.eviction_count, 1);
            saturating_add(&self.eviction_weight, weight as u64);
        }
    }

    fn snapshot(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        stats
            .set_req_counts(self.hit_count.load(), self.miss_count.load())
            .set_load_counts(
                self.load_success_count.load(),
                self.load_failure_count.load(),
                self.total_load_time.load(),
            )
            .set_eviction_counts(self.eviction_count.load(), self.eviction_weight.load());
        stats
    }
}

/// A `StatsCounter` that wraps an array of another `StatsCounter` type to
/// reduce the contention between threads.
pub(crate) struct StripedStatsCounter<C> {
    // Each counter is padded to its own cache line.
    counters: Box<[CachePadded<C>]>,
}

// One counter per processor. A thread picks its counter once, round-robin.
static NUM_COUNTERS: Lazy<usize> = Lazy::new(crate::common::available_parallelism);

impl<C: Default> Default for StripedStatsCounter<C> {
    fn default() -> Self {
        let counters = std::iter::repeat_with(C::default)
            .map(CachePadded::new)
            .take(*NUM_COUNTERS)
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { counters }
    }
}

impl<C> StripedStatsCounter<C> {
    /// Returns the counter `C` for the current thread.
    fn counter(&self) -> &C {
        thread_local! { static MY_INDEX: usize = next_index() };
        MY_INDEX.with(|i| &self.counters[*i % self.counters.len()])
    }
}

impl<C: StatsCounter> StatsCounter for StripedStatsCounter<C> {
    fn record_hits(&self, count: u32) {
        self.counter().record_hits(count);
    }

    fn record_misses(&self, count: u32) {
        self.counter().record_misses(count);
    }

    fn record_load_success(&self, load_time_nanos: u64) {
        self.counter().record_load_success(load_time_nanos);
    }

    fn record_load_failure(&self, load_time_nanos: u64) {
        self.counter().record_load_failure(load_time_nanos)
    }

    fn record_eviction(&self, weight: u32, cause: RemovalCause) {
        self.counter().record_eviction(weight, cause);
    }

    fn snapshot(&self) -> CacheStats {
        self.counters
            .iter()
            .fold(CacheStats::default(), |acc, counter| {
                &acc + &counter.snapshot()
            })
    }
}

fn next_index() -> usize {
    static INDEX: AtomicUsize = AtomicUsize::new(0);

    let mut i0 = INDEX.load(Ordering::Acquire);
    loop {
        let i1 = (i0 + 1) % *NUM_COUNTERS;
        match INDEX.compare_exchange_weak(i0, i1, Ordering::Acquire, Ordering::Relaxed) {
            Ok(_) => return i0,
            Err(i2) => i0 = i2,
        }
    }
}
