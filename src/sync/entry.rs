use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use super::value_initializer::Ticket;
use crate::common::{
    arena::SlotId,
    deque::{Linked, Links, Order},
    time::Instant,
};

pub(crate) enum LoadState<V> {
    Idle,
    /// The first computation of the value is running. Only placeholders are
    /// in this state.
    Loading(Ticket<V>),
    /// A recomputation of a resident value is running. The stamp identifies
    /// the refresh, so a late result can tell whether it still applies.
    Refreshing(u64),
}

/// An entry of a segment.
///
/// A *resident* entry holds a value and is a member of both the access order
/// and the write order. A *placeholder* has no value yet and is only
/// reachable from the index.
pub(crate) struct Entry<K, V> {
    pub(crate) key: Arc<K>,
    pub(crate) hash: u64,
    /// Changes whenever the value changes, so that work planned outside the
    /// segment lock can detect a stale target.
    pub(crate) gen: u64,
    pub(crate) value: Option<V>,
    pub(crate) load: LoadState<V>,
    pub(crate) weight: u32,
    pub(crate) write_time: Instant,
    access_time: AtomicU64,
    access_links: Links,
    write_links: Links,
    pub(crate) next_in_bucket: Option<SlotId>,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new_placeholder(key: Arc<K>, hash: u64, gen: u64, ticket: Ticket<V>) -> Self {
        Self {
            key,
            hash,
            gen,
            value: None,
            load: LoadState::Loading(ticket),
            weight: 0,
            write_time: Instant::from_nanos(0),
            access_time: AtomicU64::new(0),
            access_links: Links::default(),
            write_links: Links::default(),
            next_in_bucket: None,
        }
    }

    pub(crate) fn new_resident(
        key: Arc<K>,
        hash: u64,
        gen: u64,
        value: V,
        weight: u32,
        now: Instant,
    ) -> Self {
        Self {
            key,
            hash,
            gen,
            value: Some(value),
            load: LoadState::Idle,
            weight,
            write_time: now,
            access_time: AtomicU64::new(now.as_nanos()),
            access_links: Links::default(),
            write_links: Links::default(),
            next_in_bucket: None,
        }
    }

    #[inline]
    pub(crate) fn is_resident(&self) -> bool {
        self.value.is_some()
    }

    pub(crate) fn access_time(&self) -> Instant {
        Instant::from_nanos(self.access_time.load(Ordering::Relaxed))
    }

    /// Records a read. Safe to call under the segment read lock.
    pub(crate) fn set_access_time(&self, now: Instant) {
        self.access_time.store(now.as_nanos(), Ordering::Relaxed);
    }

    pub(crate) fn is_idle(&self) -> bool {
        matches!(self.load, LoadState::Idle)
    }
}

impl<K, V> Linked for Entry<K, V> {
    fn links(&self, order: Order) -> &Links {
        match order {
            Order::Access => &self.access_links,
            Order::Write => &self.write_links,
        }
    }

    fn links_mut(&mut self, order: Order) -> &mut Links {
        match order {
            Order::Access => &mut self.access_links,
            Order::Write => &mut self.write_links,
        }
    }
}

/// The time-based settings of a cache.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Timeouts {
    pub(crate) expire_after_write: Option<Duration>,
    pub(crate) expire_after_access: Option<Duration>,
    pub(crate) refresh_after_write: Option<Duration>,
}

impl Timeouts {
    pub(crate) fn expires(&self) -> bool {
        self.expire_after_write.is_some() || self.expire_after_access.is_some()
    }

    pub(crate) fn is_expired<K, V>(&self, entry: &Entry<K, V>, now: Instant) -> bool {
        if let Some(ttl) = self.expire_after_write {
            if now.has_elapsed(entry.write_time, ttl) {
                return true;
            }
        }
        if let Some(tti) = self.expire_after_access {
            if now.has_elapsed(entry.access_time(), tti) {
                return true;
            }
        }
        false
    }

    /// Returns `true` when the value of a valid entry should be recomputed.
    pub(crate) fn needs_refresh<K, V>(&self, entry: &Entry<K, V>, now: Instant) -> bool {
        match self.refresh_after_write {
            Some(refresh) => entry.is_idle() && now.has_elapsed(entry.write_time, refresh),
            None => false,
        }
    }
}
