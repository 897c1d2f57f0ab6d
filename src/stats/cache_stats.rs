use std::{
    fmt::{self, Debug},
    ops::{Add, Sub},
};

/// An immutable snapshot of the statistics of a cache.
///
/// Cache statistics are incremented according to the following rules:
///
/// - When `get_if_present` or `get_all_present` finds a valid entry, `hit_count`
///   is incremented; otherwise `miss_count` is incremented once per key.
/// - When `get_or_compute` (or `get_with`) returns a value found in the cache,
///   including a stale value returned while a refresh is running, `hit_count` is
///   incremented. Otherwise `miss_count` is incremented, whether the caller runs
///   the computation or waits for another caller's computation.
///    - The caller that runs the computation increments `load_success_count`
///      or `load_failure_count`, and adds the elapsed time, in nanoseconds, to
///      `total_load_time_nanos`. Refreshes are recorded the same way.
/// - When an entry is removed with a cause `Size`, `Expired` or `Collected`,
///   `eviction_count` is incremented and the weight added to `eviction_weight`.
/// - No stats are modified when an entry is invalidated or replaced (removal
///   causes `Explicit` and `Replaced`), or read through the map view.
///
/// Derived rates are computed from the snapshot on demand.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    hit_count: u64,
    miss_count: u64,
    load_success_count: u64,
    load_failure_count: u64,
    total_load_time_nanos: u64,
    eviction_count: u64,
    eviction_weight: u64,
}

impl Debug for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStats")
            .field("request_count", &self.request_count())
            .field("hit_count", &self.hit_count)
            .field("hit_rate", &self.hit_rate())
            .field("miss_count", &self.miss_count)
            .field("miss_rate", &self.miss_rate())
            .field("load_count", &self.load_count())
            .field("load_success_count", &self.load_success_count)
            .field("load_failure_count", &self.load_failure_count)
            .field("load_failure_rate", &self.load_failure_rate())
            .field("total_load_time_nanos", &self.total_load_time_nanos)
            .field(
                "average_load_penalty_nanos",
                &self.average_load_penalty_nanos(),
            )
            .field("eviction_count", &self.eviction_count)
            .field("eviction_weight", &self.eviction_weight)
            .finish()
    }
}

impl CacheStats {
    pub(crate) fn set_req_counts(&mut self, hit_count: u64, miss_count: u64) -> &mut Self {
        self.hit_count = hit_count;
        self.miss_count = miss_count;
        self
    }

    pub(crate) fn set_load_counts(
        &mut self,
        load_success_count: u64,
        load_failure_count: u64,
        total_load_time_nanos: u64,
    ) -> &mut Self {
        self.load_success_count = load_success_count;
        self.load_failure_count = load_failure_count;
        self.total_load_time_nanos = total_load_time_nanos;
        self
    }

    pub(crate) fn set_eviction_counts(
        &mut self,
        eviction_count: u64,
        eviction_weight: u64,
    ) -> &mut Self {
        self.eviction_count = eviction_count;
        self.eviction_weight = eviction_weight;
        self
    }

    /// The number of lookups, `hit_count + miss_count`.
    pub fn request_count(&self) -> u64 {
        self.hit_count.saturating_add(self.miss_count)
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// The ratio of hits to requests, or `1.0` when there were no requests.
    pub fn hit_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            1.0
        } else {
            self.hit_count as f64 / req_count as f64
        }
    }

    pub fn miss_count(&self) -> u64 {
        self.miss_count
    }

    /// The ratio of misses to requests, or `0.0` when there were no requests.
    pub fn miss_rate(&self) -> f64 {
        let req_count = self.request_count();
        if req_count == 0 {
            0.0
        } else {
            self.miss_count as f64 / req_count as f64
        }
    }

    pub fn load_count(&self) -> u64 {
        self.load_success_count
            .saturating_add(self.load_failure_count)
    }

    pub fn load_success_count(&self) -> u64 {
        self.load_success_count
    }

    pub fn load_failure_count(&self) -> u64 {
        self.load_failure_count
    }

    pub fn load_failure_rate(&self) -> f64 {
        let load_count = self.load_count();
        if load_count == 0 {
            0.0
        } else {
            self.load_failure_count as f64 / load_count as f64
        }
    }

    pub fn total_load_time_nanos(&self) -> u64 {
        self.total_load_time_nanos
    }

    /// The average time spent computing values, in nanoseconds.
    pub fn average_load_penalty_nanos(&self) -> f64 {
        let load_count = self.load_count();
        if load_count == 0 {
            0.0
        } else {
            self.total_load_time_nanos as f64 / load_count as f64
        }
    }

    pub fn eviction_count(&self) -> u64 {
        self.eviction_count
    }

    pub fn eviction_weight(&self) -> u64 {
        self.eviction_weight
    }
}

// NOTES:
// - We are implementing `Add` for `&CacheStats` instead of `CacheStats` so that
//   summing snapshots does not consume them.
impl Add for &CacheStats {
    type Output = CacheStats;

    fn add(self, rhs: Self) -> Self::Output {
        CacheStats {
            hit_count: self.hit_count.saturating_add(rhs.hit_count),
            miss_count: self.miss_count.saturating_add(rhs.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_add(rhs.load_success_count),
            load_failure_count: self
                .load_failure_count
                .saturating_add(rhs.load_failure_count),
            total_load_time_nanos: self
                .total_load_time_nanos
                .saturating_add(rhs.total_load_time_nanos),
            eviction_count: self.eviction_count.saturating_add(rhs.eviction_count),
            eviction_weight: self.eviction_weight.saturating_add(rhs.eviction_weight),
        }
    }
}

/// Returns the difference of two snapshots, e.g. the activity between them.
impl Sub for CacheStats {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            hit_count: self.hit_count.saturating_sub(rhs.hit_count),
            miss_count: self.miss_count.saturating_sub(rhs.miss_count),
            load_success_count: self
                .load_success_count
                .saturating_sub(rhs.load_success_count),
            load_failure_count: self
                .load_failure_count
                .saturating_sub(rhs.load_failure_count),
            total_load_time_nanos: self
                .total_load_time_nanos
                .saturating_sub(rhs.total_load_time_nanos),
            eviction_count: self.eviction_count.saturating_sub(rhs.eviction_count),
            eviction_weight: self.eviction_weight.saturating_sub(rhs.eviction_weight),
        }
    }
}
