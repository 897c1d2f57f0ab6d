//! Removal notifications.
//!
//! A cache built with a [removal listener][listener] calls it once for every
//! entry that leaves the cache, whatever the reason. The reason is reported
//! as a [`RemovalCause`].
//!
//! [listener]: ../sync/struct.CacheBuilder.html#method.removal_listener

use std::sync::Arc;

pub(crate) mod notifier;

/// A removal listener. Receives the key, the removed value and the cause.
pub type RemovalListener<K, V> = Arc<dyn Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static>;

// NOTE: Dropping the cache drops all entries without sending notifications.
// Call `invalidate_all` and then `run_pending_tasks` to be notified of the
// remaining entries.

/// Specifies how and when removal notifications are delivered to the
/// listener.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Notifications are delivered on the thread that caused the removal,
    /// after the segment lock is released and before the cache operation
    /// returns.
    ///
    /// Notifications are delivered one at a time in the order the removals
    /// happened. A thread that finds another thread delivering waits for it,
    /// so its own notifications were delivered when its operation returns.
    #[default]
    Immediate,
    /// Notifications are handed off to a background thread and delivered
    /// some time after the removal, in the order the removals happened.
    ///
    /// Use this mode when the listener is slow and cache writes should not
    /// wait for it. [`Cache::run_pending_tasks`][run-pending] delivers the
    /// queued notifications on the calling thread.
    ///
    /// [run-pending]: ../sync/struct.Cache.html#method.run_pending_tasks
    Queued,
}

/// Indicates the reason why a cached entry was removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// The entry was manually removed by the user with an `invalidate` family
    /// method or through the map view.
    Explicit,
    /// The entry itself was not actually removed, but its value was replaced by
    /// a `put`, a completed load racing with a `put`, or a refresh.
    Replaced,
    /// The key or the value was no longer referenced outside the cache and the
    /// cache was configured with weak or soft references.
    Collected,
    /// The entry's expiration timestamp has passed.
    Expired,
    /// The entry was evicted due to size constraints.
    Size,
}

impl RemovalCause {
    /// Returns `true` if the removal was automatic (`Collected`, `Expired` or
    /// `Size`), and `false` for `Explicit` and `Replaced`.
    pub fn was_evicted(&self) -> bool {
        matches!(self, Self::Collected | Self::Expired | Self::Size)
    }
}


#[cfg(test)]
mod tests {
    use super::{DeliveryMode, RemovalCause};

    #[test]
    fn evicted_causes() {
        assert!(!RemovalCause::Explicit.was_evicted());
        assert!(!RemovalCause::Replaced.was_evicted());
        assert!(RemovalCause::Collected.was_evicted());
        assert!(RemovalCause::Expired.was_evicted());
        assert!(RemovalCause::Size.was_evicted());
        assert_eq!(DeliveryMode::default(), DeliveryMode::Immediate);
    }
}
