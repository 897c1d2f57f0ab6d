use std::time::Duration;

/// The largest representable instant.
pub(crate) const MAX_NANOS: u64 = u64::MAX - 1;

/// Nanoseconds on a [`Clock`](super::Clock)'s time line. With the built-in
/// clocks the origin is the clock's creation; with a custom ticker it is
/// whatever the ticker counts from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Instant(u64);

/// Converts a duration to nanoseconds, clamped to [`MAX_NANOS`].
pub(crate) fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).map_or(MAX_NANOS, |n| n.min(MAX_NANOS))
}

impl Instant {
    pub(crate) fn from_nanos(nanos: u64) -> Self {
        debug_assert!(nanos <= MAX_NANOS);
        Self(nanos)
    }

    /// Clamps a raw ticker reading, which may use the whole `u64` range.
    pub(crate) fn from_ticker_nanos(nanos: u64) -> Self {
        Self(nanos.min(MAX_NANOS))
    }

    pub(crate) fn from_elapsed(elapsed: Duration) -> Self {
        Self(saturating_nanos(elapsed))
    }

    pub(crate) fn as_nanos(self) -> u64 {
        self.0
    }

    pub(crate) fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(saturating_nanos(duration)).min(MAX_NANOS))
    }

    pub(crate) fn saturating_duration_since(self, earlier: Self) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    /// Whether `duration` or more separates `earlier` from `self`. Expiration
    /// and refresh deadlines are inclusive.
    pub(crate) fn has_elapsed(self, earlier: Self, duration: Duration) -> bool {
        self.saturating_duration_since(earlier) >= duration
    }
}
