use std::{fmt, time::Instant as StdInstant};

mod clock;
mod instant;

pub(crate) use clock::Clock;
pub(crate) use instant::{saturating_nanos, Instant};

#[cfg(test)]
pub(crate) use clock::Mock;

/// A source of monotonic time, in nanoseconds from an arbitrary fixed origin.
///
/// The cache reads its ticker to decide whether entries have expired or are
/// due for a refresh, and to measure load times. Supply a custom ticker with
/// [`CacheBuilder::ticker`][ticker] to control time in tests.
///
/// [ticker]: ./sync/struct.CacheBuilder.html#method.ticker
pub trait Ticker: Send + Sync + 'static {
    /// Returns the number of nanoseconds elapsed since this ticker's origin.
    fn read(&self) -> u64;
}

/// A [`Ticker`] backed by `std::time::Instant`.
pub struct SystemTicker {
    origin: StdInstant,
}

impl SystemTicker {
    pub fn new() -> Self {
        Self {
            origin: StdInstant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SystemTicker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemTicker").finish()
    }
}

impl Ticker for SystemTicker {
    fn read(&self) -> u64 {
        saturating_nanos(self.origin.elapsed())
    }
}
