use std::{sync::Arc, time::Instant as StdInstant};

#[cfg(test)]
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use super::{Instant, Ticker};

#[cfg(test)]
use super::saturating_nanos;

#[derive(Default, Clone)]
pub(crate) struct Clock {
    ty: ClockType,
}

#[derive(Clone)]
enum ClockType {
    /// A clock that uses `std::time::Instant` as the source of time.
    Standard { origin: StdInstant },
    #[cfg(feature = "quanta")]
    /// A clock that uses both `std::time::Instant` and `quanta::Instant` as the
    /// sources of time.
    Hybrid {
        std_origin: StdInstant,
        quanta_origin: quanta::Instant,
    },
    /// A clock driven by a user supplied ticker.
    Custom { ticker: Arc<dyn Ticker> },
}

impl Default for ClockType {
    /// Create a new `ClockType` with the current time as the origin.
    ///
    /// If the `quanta` feature is enabled, `Hybrid` will be used. Otherwise,
    /// `Standard` will be used.
    fn default() -> Self {
        #[cfg(feature = "quanta")]
        {
            return ClockType::Hybrid {
                std_origin: StdInstant::now(),
                quanta_origin: quanta::Instant::now(),
            };
        }

        #[allow(unreachable_code)]
        ClockType::Standard {
            origin: StdInstant::now(),
        }
    }
}

impl Clock {
    pub(crate) fn with_ticker(ticker: Arc<dyn Ticker>) -> Self {
        Self {
            ty: ClockType::Custom { ticker },
        }
    }

    #[cfg(test)]
    /// Creates a new `Clock` with a mocked source of time.
    pub(crate) fn mock() -> (Clock, Arc<Mock>) {
        let mock = Arc::new(Mock::default());
        let clock = Clock::with_ticker(Arc::clone(&mock) as Arc<dyn Ticker>);
        (clock, mock)
    }

    /// Returns the current time using a reliable source of time.
    pub(crate) fn now(&self) -> Instant {
        match &self.ty {
            ClockType::Standard { origin } => {
                Instant::from_elapsed(origin.elapsed())
            }
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { std_origin, .. } => {
                Instant::from_elapsed(std_origin.elapsed())
            }
            ClockType::Custom { ticker } => Instant::from_ticker_nanos(ticker.read()),
        }
    }

    /// Returns the current time _maybe_ using a fast but less reliable source of
    /// time. Used to measure load times.
    ///
    /// When the type is `Hybrid`, the time is based on `quanta::Instant`, which can
    /// be faster than `std::time::Instant`, depending on the CPU architecture.
    pub(crate) fn fast_now(&self) -> Instant {
        match &self.ty {
            #[cfg(feature = "quanta")]
            ClockType::Hybrid { quanta_origin, .. } => {
                Instant::from_elapsed(quanta_origin.elapsed())
            }
            ClockType::Standard { .. } | ClockType::Custom { .. } => self.now(),
        }
    }

    pub(crate) fn is_custom(&self) -> bool {
        matches!(self.ty, ClockType::Custom { .. })
    }
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct Mock {
    now: AtomicU64,
}

#[cfg(test)]
impl Mock {
    pub(crate) fn increment(&self, amount: Duration) {
        let nanos = saturating_nanos(amount);
        self.now.fetch_add(nanos, Ordering::AcqRel);
    }
}

#[cfg(test)]
impl Ticker for Mock {
    fn read(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::Clock;
    use std::time::Duration;

    #[test]
    fn mocked_clock() {
        let (clock, mock) = Clock::mock();
        assert!(clock.is_custom());
        let t0 = clock.now();
        mock.increment(Duration::from_secs(3));
        assert_eq!(
            clock.now().saturating_duration_since(t0),
            Duration::from_secs(3)
        );
        assert_eq!(clock.fast_now(), clock.now());
    }

    #[test]
    fn default_clock_advances() {
        let clock = Clock::default();
        assert!(!clock.is_custom());
        let t0 = clock.now();
        let t1 = clock.now();
        assert!(t1 >= t0);
    }
}
