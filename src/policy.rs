use std::time::Duration;

/// The reclamation strength of the keys or the values held by a cache.
///
/// Holders that are not `Strong` are collected with
/// [`RemovalCause::Collected`][collected] once the cache holds the only
/// strong reference to them.
///
/// [collected]: ./notification/enum.RemovalCause.html#variant.Collected
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strength {
    /// Held until removed by the cache. The default.
    #[default]
    Strong,
    /// Collected only when the cache is told that memory is scarce, with
    /// [`Cache::reclaim_unreferenced`][reclaim].
    ///
    /// [reclaim]: ./sync/struct.Cache.html#method.reclaim_unreferenced
    Soft,
    /// Collected during the housekeeping that follows cache operations.
    Weak,
}

#[derive(Clone, Debug)]
/// The policy of a cache.
pub struct Policy {
    pub(crate) max_capacity: Option<u64>,
    pub(crate) max_weight: Option<u64>,
    pub(crate) num_segments: usize,
    pub(crate) expire_after_write: Option<Duration>,
    pub(crate) expire_after_access: Option<Duration>,
    pub(crate) refresh_after_write: Option<Duration>,
    pub(crate) key_strength: Strength,
    pub(crate) value_strength: Strength,
}

impl Policy {
    /// Returns the maximum number of entries, if the cache is bounded by count.
    pub fn max_capacity(&self) -> Option<u64> {
        self.max_capacity
    }

    /// Returns the maximum total weight, if the cache is bounded by weight.
    pub fn max_weight(&self) -> Option<u64> {
        self.max_weight
    }

    /// Returns the number of internal segments of the cache.
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    pub fn expire_after_write(&self) -> Option<Duration> {
        self.expire_after_write
    }

    pub fn expire_after_access(&self) -> Option<Duration> {
        self.expire_after_access
    }

    pub fn refresh_after_write(&self) -> Option<Duration> {
        self.refresh_after_write
    }

    pub fn key_strength(&self) -> Strength {
        self.key_strength
    }

    pub fn value_strength(&self) -> Strength {
        self.value_strength
    }
}
