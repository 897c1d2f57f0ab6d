use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash, Hasher},
    panic::{catch_unwind, resume_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLockWriteGuard;

use super::{
    entry::Timeouts,
    segment::{PendingRemoval, Reclaim, Reservation, Segment, SegmentInner},
    value_initializer::{new_ticket, wait_for, InFlight, Ticket, WaitOutcome, WaiterValue},
};
use crate::{
    common::{
        arena::SlotId,
        concurrent::{
            constants::{
                EXPIRATION_BATCH_SIZE, MAX_COMPUTE_RETRIES, MAX_SEGMENTS, MAX_SEGMENT_CAPACITY,
                MIN_SEGMENT_SHARE, RECLAIM_BATCH_SIZE,
            },
            housekeeper::{Housekeeper, InnerSync},
            spread,
            thread_pool::{PoolName, ThreadPool, ThreadPoolRegistry},
            Weigher,
        },
        error::{BoxError, ComputeError},
        time::{saturating_nanos, Clock, Instant, Ticker},
    },
    notification::{notifier::RemovalNotifier, DeliveryMode, RemovalCause, RemovalListener},
    policy::Policy,
    stats::{
        stats_counter::{DefaultStatsCounter, DisabledStatsCounter, StatsCounter},
        CacheStats,
    },
};

/// Computes the value of a key for a refresh triggered by a plain read.
pub(crate) type Loader<K, V> = Arc<dyn Fn(&K) -> Result<V, BoxError> + Send + Sync + 'static>;

/// The validated settings a cache is built from.
pub(crate) struct CacheConfig<K, V> {
    pub(crate) name: Option<String>,
    pub(crate) initial_capacity: usize,
    pub(crate) concurrency_level: usize,
    pub(crate) max_capacity: Option<u64>,
    pub(crate) max_weight: Option<u64>,
    pub(crate) weigher: Option<Weigher<K, V>>,
    pub(crate) timeouts: Timeouts,
    pub(crate) reclaim: Reclaim<K, V>,
    pub(crate) loader: Option<Loader<K, V>>,
    pub(crate) ticker: Option<Arc<dyn Ticker>>,
    pub(crate) removal_listener: Option<RemovalListener<K, V>>,
    pub(crate) delivery_mode: DeliveryMode,
    pub(crate) record_stats: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Sweep {
    /// Bounded batches of expired and weakly held entries.
    Batch,
    /// Every expired and weakly held entry.
    Full,
    /// Like `Full`, also collecting softly held entries.
    Reclaim,
}

enum Found<K, V> {
    Hit {
        key: Arc<K>,
        value: V,
        refresh: Option<(SlotId, u64)>,
    },
    Expired(SlotId, u64),
}

pub(crate) struct BaseCache<K, V, S = RandomState> {
    pub(crate) inner: Arc<Inner<K, V, S>>,
}

impl<K, V, S> Clone for BaseCache<K, V, S> {
    /// Makes a clone of this shared cache.
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V, S> BaseCache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(config: CacheConfig<K, V>, build_hasher: S) -> Self {
        Self {
            inner: Arc::new(Inner::new(config, build_hasher)),
        }
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub(crate) fn policy(&self) -> Policy {
        self.inner.policy.clone()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot()
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.inner.segments.iter().map(Segment::entry_count).sum()
    }

    pub(crate) fn weighted_size(&self) -> u64 {
        self.inner.total_weight.load(Ordering::Acquire)
    }

    pub(crate) fn num_segments(&self) -> usize {
        self.inner.segments.len()
    }

    /// Returns the key and the value of a valid entry, recording the read in
    /// the access order and, when asked, in the statistics.
    pub(crate) fn get_entry<Q>(&self, key: &Q, record_stats: bool) -> Option<(Arc<K>, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let inner = &*self.inner;
        let hash = inner.hash(key);
        let seg_index = inner.segment_index(hash);
        let seg = &inner.segments[seg_index];
        let now = inner.clock.now();

        let found = {
            let guard = seg.read();
            guard
                .find(hash, key)
                .and_then(|id| guard.entry(id).map(|entry| (id, entry)))
                .and_then(|(id, entry)| {
                    let value = entry.value.as_ref()?;
                    if inner.timeouts.is_expired(entry, now) {
                        return Some(Found::Expired(id, entry.gen));
                    }
                    entry.set_access_time(now);
                    seg.record_read(id, entry.gen);
                    let refresh = (inner.loader.is_some()
                        && inner.timeouts.needs_refresh(entry, now))
                    .then(|| (id, entry.gen));
                    Some(Found::Hit {
                        key: Arc::clone(&entry.key),
                        value: value.clone(),
                        refresh,
                    })
                })
        };

        let result = match found {
            Some(Found::Hit {
                key,
                value,
                refresh,
            }) => {
                if record_stats {
                    inner.stats.record_hits(1);
                }
                if let Some((id, gen)) = refresh {
                    self.spawn_refresh(seg_index, hash, Arc::clone(&key), id, gen);
                }
                Some((key, value))
            }
            Some(Found::Expired(id, gen)) => {
                if record_stats {
                    inner.stats.record_misses(1);
                }
                inner.write_segment(seg, now, |s| {
                    s.remove_if_gen(id, gen, RemovalCause::Expired);
                });
                None
            }
            None => {
                if record_stats {
                    inner.stats.record_misses(1);
                }
                None
            }
        };

        inner.after_read(seg, now);
        result
    }

    pub(crate) fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let inner = &*self.inner;
        let hash = inner.hash(key);
        let seg = &inner.segments[inner.segment_index(hash)];
        let now = inner.clock.now();
        let guard = seg.read();
        guard
            .find(hash, key)
            .and_then(|id| guard.entry(id))
            .map_or(false, |entry| {
                entry.is_resident() && !inner.timeouts.is_expired(entry, now)
            })
    }

    pub(crate) fn get_or_compute<F, E>(&self, key: K, f: F) -> Result<V, ComputeError>
    where
        F: FnOnce() -> Result<V, E>,
        E: Into<BoxError>,
    {
        let inner = &*self.inner;
        let key = Arc::new(key);
        let hash = inner.hash(&*key);
        let seg = &inner.segments[inner.segment_index(hash)];
        let now = inner.clock.now();

        let found = {
            let guard = seg.read();
            guard.find(hash, &*key).and_then(|id| {
                let entry = guard.entry(id)?;
                let value = entry.value.as_ref()?;
                if inner.timeouts.is_expired(entry, now) {
                    return None;
                }
                entry.set_access_time(now);
                seg.record_read(id, entry.gen);
                let refresh = inner
                    .timeouts
                    .needs_refresh(entry, now)
                    .then(|| (id, entry.gen));
                Some((value.clone(), refresh))
            })
        };

        match found {
            Some((value, refresh)) => {
                inner.stats.record_hits(1);
                inner.after_read(seg, now);
                match refresh {
                    Some((id, gen)) => Ok(inner.refresh_inline(seg, hash, &key, id, gen, value, f)),
                    None => Ok(value),
                }
            }
            None => inner.compute_or_wait(seg, hash, key, f),
        }
    }

    /// Starts a refresh on the refresher pool. Requires a loader.
    fn spawn_refresh(&self, seg_index: usize, hash: u64, key: Arc<K>, id: SlotId, gen: u64) {
        let inner = &*self.inner;
        let Some(pool) = &inner.refresher else {
            return;
        };
        let seg = &inner.segments[seg_index];
        let now = inner.clock.now();
        let Some(stamp) = inner.write_segment(seg, now, |s| s.begin_refresh(id, gen)) else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        pool.execute(move || inner.refresh_in_background(seg_index, hash, key, stamp));
    }

    pub(crate) fn put(&self, key: K, value: V) -> Option<V> {
        let inner = &*self.inner;
        let key = Arc::new(key);
        let hash = inner.hash(&*key);
        let seg = &inner.segments[inner.segment_index(hash)];
        let weight = inner.weigh(&key, &value);
        let now = inner.clock.now();
        inner.write_segment(seg, now, |s| {
            s.put(hash, key, value, weight, now, &inner.timeouts)
        })
    }

    pub(crate) fn invalidate<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let inner = &*self.inner;
        let hash = inner.hash(key);
        let seg = &inner.segments[inner.segment_index(hash)];
        let now = inner.clock.now();
        inner.write_segment(seg, now, |s| s.invalidate(hash, key, now, &inner.timeouts))
    }

    pub(crate) fn invalidate_all(&self) {
        let inner = &*self.inner;
        let now = inner.clock.now();
        for seg in inner.segments.iter() {
            inner.write_segment(seg, now, SegmentInner::invalidate_all);
        }
    }

    pub(crate) fn invalidate_matching<P>(&self, mut predicate: P)
    where
        P: FnMut(&K, &V) -> bool,
    {
        let inner = &*self.inner;
        for seg in inner.segments.iter() {
            let now = inner.clock.now();
            let snapshot: Vec<_> = {
                let guard = seg.read();
                guard
                    .valid_entries(now, &inner.timeouts)
                    .filter_map(|(id, entry)| {
                        let value = entry.value.clone()?;
                        Some((id, entry.gen, Arc::clone(&entry.key), value))
                    })
                    .collect()
            };
            // The predicate runs without the lock.
            let victims: Vec<_> = snapshot
                .into_iter()
                .filter(|(_, _, key, value)| predicate(key, value))
                .map(|(id, gen, _, _)| (id, gen))
                .collect();
            if victims.is_empty() {
                continue;
            }
            inner.write_segment(seg, now, |s| {
                for (id, gen) in victims {
                    s.remove_if_gen(id, gen, RemovalCause::Explicit);
                }
            });
        }
    }

    /// Returns the valid entries of a segment.
    pub(crate) fn snapshot_segment(&self, index: usize) -> Vec<(Arc<K>, V)> {
        let inner = &*self.inner;
        let Some(seg) = inner.segments.get(index) else {
            return Vec::new();
        };
        let now = inner.clock.now();
        let guard = seg.read();
        guard
            .valid_entries(now, &inner.timeouts)
            .filter_map(|(_, entry)| Some((Arc::clone(&entry.key), entry.value.clone()?)))
            .collect()
    }

    pub(crate) fn run_pending_tasks(&self) {
        self.inner.maintain(Sweep::Full, true);
        self.inner.flush_notifications();
    }

    pub(crate) fn reclaim_unreferenced(&self) {
        self.inner.maintain(Sweep::Reclaim, true);
        self.inner.flush_notifications();
    }
}

#[cfg(test)]
impl<K, V, S> BaseCache<K, V, S> {
    pub(crate) fn disable_housekeeper(&self) {
        self.inner.housekeeper.disable_auto_run();
    }
}

pub(crate) struct Inner<K, V, S> {
    name: Option<String>,
    segments: Box<[Segment<K, V>]>,
    segment_shift: u32,
    max_weight: Option<u64>,
    /// The sum of the weighted sizes published by the segments.
    total_weight: AtomicU64,
    build_hasher: S,
    weigher: Option<Weigher<K, V>>,
    timeouts: Timeouts,
    reclaim: Reclaim<K, V>,
    loader: Option<Loader<K, V>>,
    refresher: Option<Arc<ThreadPool>>,
    notifier: Option<RemovalNotifier<K, V>>,
    stats: Box<dyn StatsCounter>,
    clock: Clock,
    housekeeper: Housekeeper,
    policy: Policy,
}

impl<K, V, S> Drop for Inner<K, V, S> {
    fn drop(&mut self) {
        if let Some(pool) = self.refresher.take() {
            ThreadPoolRegistry::release_pool(&pool);
        }
    }
}

impl<K, V, S> Inner<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn new(config: CacheConfig<K, V>, build_hasher: S) -> Self {
        let bound = config.max_capacity.or(config.max_weight);
        let (num_segments, segment_bits) = segment_layout(config.concurrency_level, bound);

        // An entry count bound also bounds the initial capacity.
        let mut initial_capacity = config.initial_capacity.min(MAX_SEGMENT_CAPACITY);
        if let Some(max) = config.max_capacity {
            initial_capacity = initial_capacity.min(usize::try_from(max).unwrap_or(usize::MAX));
        }
        let segment_capacity = (initial_capacity + num_segments - 1) / num_segments;

        let notifier = config.removal_listener.map(|listener| {
            RemovalNotifier::new(listener, config.delivery_mode, config.name.clone())
        });
        let segments = (0..num_segments)
            .map(|i| Segment::new(i, segment_capacity, notifier.is_some()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let stats: Box<dyn StatsCounter> = if config.record_stats {
            Box::new(DefaultStatsCounter::striped())
        } else {
            Box::new(DisabledStatsCounter)
        };
        let refresher = (config.loader.is_some() && config.timeouts.refresh_after_write.is_some())
            .then(|| ThreadPoolRegistry::acquire_pool(PoolName::Refresher));
        let clock = config.ticker.map(Clock::with_ticker).unwrap_or_default();
        let housekeeper = Housekeeper::new(clock.now());

        let policy = Policy {
            max_capacity: config.max_capacity,
            max_weight: config.max_weight,
            num_segments,
            expire_after_write: config.timeouts.expire_after_write,
            expire_after_access: config.timeouts.expire_after_access,
            refresh_after_write: config.timeouts.refresh_after_write,
            key_strength: config.reclaim.key_strength(),
            value_strength: config.reclaim.value_strength(),
        };

        #[cfg(feature = "logging")]
        log::debug!(
            "{}Created a cache with {num_segments} segment(s), bound {bound:?}, custom ticker: {}",
            log_prefix(config.name.as_deref()),
            clock.is_custom()
        );

        Self {
            name: config.name,
            segments,
            segment_shift: 64 - segment_bits,
            max_weight: bound,
            total_weight: AtomicU64::new(0),
            build_hasher,
            weigher: config.weigher,
            timeouts: config.timeouts,
            reclaim: config.reclaim,
            loader: config.loader,
            refresher,
            notifier,
            stats,
            clock,
            housekeeper,
            policy,
        }
    }

    #[inline]
    fn hash<Q>(&self, key: &Q) -> u64
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        spread(hasher.finish())
    }

    #[inline]
    fn segment_index(&self, hash: u64) -> usize {
        // The shift is 64 when there is only one segment.
        hash.checked_shr(self.segment_shift).unwrap_or(0) as usize
    }

    fn weigh(&self, key: &K, value: &V) -> u32 {
        self.weigher.as_ref().map_or(1, |w| w(key, value))
    }

    fn elapsed_nanos(&self, start: Instant) -> u64 {
        let elapsed = self.clock.fast_now().saturating_duration_since(start);
        saturating_nanos(elapsed)
    }

    /// Runs `op` under the segment's write lock, between a bounded cleanup
    /// and the eviction. The removals are reported before returning, but
    /// not delivered.
    fn update_segment<T>(
        &self,
        seg: &Segment<K, V>,
        now: Instant,
        op: impl FnOnce(&mut SegmentInner<K, V>) -> T,
    ) -> T {
        let mut guard = seg.lock();
        self.cleanup(&mut guard, now, Sweep::Batch);
        let result = op(&mut guard);
        self.evict(seg, &mut guard, true);
        self.flush_pending(seg, &mut guard);
        drop(guard);
        self.evict_overflow(seg.index(), false);
        result
    }

    /// Like `update_segment`, then delivers the notifications.
    fn write_segment<T>(
        &self,
        seg: &Segment<K, V>,
        now: Instant,
        op: impl FnOnce(&mut SegmentInner<K, V>) -> T,
    ) -> T {
        let result = self.update_segment(seg, now, op);
        self.deliver_notifications();
        result
    }

    fn cleanup(&self, inner: &mut SegmentInner<K, V>, now: Instant, sweep: Sweep) {
        let (expiration_batch, reclaim_batch) = match sweep {
            Sweep::Batch => (Some(EXPIRATION_BATCH_SIZE), Some(RECLAIM_BATCH_SIZE)),
            Sweep::Full | Sweep::Reclaim => (None, None),
        };
        inner.expire(now, &self.timeouts, expiration_batch);

        let include_soft = sweep == Sweep::Reclaim;
        if self.reclaim.has_weak() || include_soft {
            inner.reclaim(&self.reclaim, include_soft, reclaim_batch);
        }
    }

    /// Evicts from the locked segment while the whole cache is over its
    /// bound. The segment's published size is stable under its lock, so the
    /// other segments' share is the total minus that size.
    fn evict(&self, seg: &Segment<K, V>, inner: &mut SegmentInner<K, V>, keep_newest: bool) {
        let Some(bound) = self.max_weight else {
            return;
        };
        let others = self
            .total_weight
            .load(Ordering::Acquire)
            .saturating_sub(seg.weighted_size());
        inner.evict(bound.saturating_sub(others), keep_newest);
    }

    fn is_over_bound(&self) -> bool {
        self.max_weight
            .map_or(false, |bound| self.total_weight.load(Ordering::Acquire) > bound)
    }

    /// Evicts from the other segments, then from segment `from`, until the
    /// cache is within its bound. Must be called without any segment lock
    /// held. Segments locked by other threads are skipped unless `blocking`.
    fn evict_overflow(&self, from: usize, blocking: bool) {
        let count = self.segments.len();
        for offset in 1..=count {
            if !self.is_over_bound() {
                return;
            }
            let seg = &self.segments[(from + offset) % count];
            let guard = if blocking {
                Some(seg.lock())
            } else {
                seg.try_lock()
            };
            if let Some(mut guard) = guard {
                self.evict(seg, &mut guard, false);
                self.flush_pending(seg, &mut guard);
            }
        }
    }

    fn flush_pending(&self, seg: &Segment<K, V>, inner: &mut SegmentInner<K, V>) {
        for PendingRemoval {
            key,
            value,
            cause,
            weight,
        } in inner.drain_pending()
        {
            if cause.was_evicted() {
                self.stats.record_eviction(weight, cause);
            }
            if let (Some(notifier), Some(value)) = (&self.notifier, value) {
                notifier.enqueue(key, value, cause);
            }
        }
        let new = inner.weighted_size();
        let old = seg.publish_counts(inner);
        if new >= old {
            self.total_weight.fetch_add(new - old, Ordering::AcqRel);
        } else {
            self.total_weight.fetch_sub(old - new, Ordering::AcqRel);
        }
    }

    fn deliver_notifications(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.deliver();
        }
    }

    fn flush_notifications(&self) {
        if let Some(notifier) = &self.notifier {
            notifier.flush();
        }
    }

    fn maintain(&self, sweep: Sweep, blocking: bool) {
        let now = self.clock.now();
        for seg in self.segments.iter() {
            let guard = if blocking {
                Some(seg.lock())
            } else {
                seg.try_lock()
            };
            if let Some(mut guard) = guard {
                self.cleanup(&mut guard, now, sweep);
                self.flush_pending(seg, &mut guard);
            }
        }
        // Evict only once every segment has dropped its expired and
        // collected entries.
        self.evict_overflow(self.segments.len() - 1, blocking);
        self.deliver_notifications();
    }

    fn after_read(&self, seg: &Segment<K, V>, now: Instant) {
        if self.housekeeper.should_apply_reads(seg.read_log_len()) {
            if let Some(mut guard) = seg.try_lock() {
                self.cleanup(&mut guard, now, Sweep::Batch);
                self.evict(seg, &mut guard, false);
                self.flush_pending(seg, &mut guard);
                drop(guard);
                self.deliver_notifications();
            }
        }
        if self.housekeeper.should_run(now) {
            self.housekeeper.try_run_pending_tasks(self);
        }
    }

    fn compute_or_wait<F, E>(
        &self,
        seg: &Segment<K, V>,
        hash: u64,
        key: Arc<K>,
        f: F,
    ) -> Result<V, ComputeError>
    where
        F: FnOnce() -> Result<V, E>,
        E: Into<BoxError>,
    {
        let ticket = new_ticket();
        let slot = ticket.write();
        let mut recorded_miss = false;
        let mut retries = 0;

        loop {
            let now = self.clock.now();
            let reservation =
                self.update_segment(seg, now, |s| s.reserve(hash, &key, &ticket, now, &self.timeouts));

            match reservation {
                Reservation::Present(value) => {
                    self.deliver_notifications();
                    if !recorded_miss {
                        self.stats.record_hits(1);
                    }
                    return Ok(value);
                }
                Reservation::Wait(other) => {
                    self.deliver_notifications();
                    if !recorded_miss {
                        self.stats.record_misses(1);
                        recorded_miss = true;
                    }
                    match wait_for(&other) {
                        WaitOutcome::Value(value) => return Ok(value),
                        WaitOutcome::Failed(error) => return Err(error),
                        WaitOutcome::Retry => (),
                    }
                }
                Reservation::Reserved => {
                    if !recorded_miss {
                        self.stats.record_misses(1);
                    }
                    return self.compute(seg, hash, key, &ticket, slot, f);
                }
            }

            retries += 1;
            if retries >= MAX_COMPUTE_RETRIES {
                panic!(
                    "Too many retries. Tried to read the value computed by another caller \
                    but failed {retries} times. Maybe the computation kept panicking?"
                );
            }
        }
    }

    /// Runs the computation for a published ticket. Notifications are
    /// delivered only after the waiters are released.
    fn compute<F, E>(
        &self,
        seg: &Segment<K, V>,
        hash: u64,
        key: Arc<K>,
        ticket: &Ticket<V>,
        mut slot: RwLockWriteGuard<'_, WaiterValue<V>>,
        f: F,
    ) -> Result<V, ComputeError>
    where
        F: FnOnce() -> Result<V, E>,
        E: Into<BoxError>,
    {
        let start = self.clock.fast_now();
        let result = {
            let _in_flight = InFlight::enter(ticket);
            // Catching panic is safe here as we do not evaluate the closure
            // again.
            catch_unwind(AssertUnwindSafe(|| {
                f().map(|value| {
                    let weight = self.weigh(&key, &value);
                    (value, weight)
                })
            }))
        };
        let load_time = self.elapsed_nanos(start);
        let now = self.clock.now();

        let (waiter_value, outcome) = match result {
            Ok(Ok((value, weight))) => {
                self.update_segment(seg, now, |s| {
                    s.complete_load(hash, &key, ticket, value.clone(), weight, now)
                });
                self.stats.record_load_success(load_time);
                (WaiterValue::Ready(Ok(value.clone())), Ok(value))
            }
            Ok(Err(e)) => {
                let error = ComputeError::failed(e);
                self.update_segment(seg, now, |s| s.abort_load(hash, &key, ticket));
                self.stats.record_load_failure(load_time);
                (WaiterValue::Ready(Err(error.clone())), Err(error))
            }
            Err(payload) => {
                self.update_segment(seg, now, |s| s.abort_load(hash, &key, ticket));
                self.stats.record_load_failure(load_time);
                // Wake up the waiters. One of them will compute the value.
                *slot = WaiterValue::Panicked;
                drop(slot);
                self.deliver_notifications();
                resume_unwind(payload);
            }
        };

        *slot = waiter_value;
        drop(slot);
        self.deliver_notifications();
        outcome
    }

    /// Recomputes a stale value on the calling thread. Returns the stale value
    /// when another refresh is running or the computation fails.
    #[allow(clippy::too_many_arguments)]
    fn refresh_inline<F, E>(
        &self,
        seg: &Segment<K, V>,
        hash: u64,
        key: &Arc<K>,
        id: SlotId,
        gen: u64,
        stale: V,
        f: F,
    ) -> V
    where
        F: FnOnce() -> Result<V, E>,
        E: Into<BoxError>,
    {
        let now = self.clock.now();
        let Some(stamp) = self.write_segment(seg, now, |s| s.begin_refresh(id, gen)) else {
            return stale;
        };

        let start = self.clock.fast_now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            f().map(|value| {
                let weight = self.weigh(key, &value);
                (value, weight)
            })
        }));
        let load_time = self.elapsed_nanos(start);
        let now = self.clock.now();

        match result {
            Ok(Ok((value, weight))) => {
                self.stats.record_load_success(load_time);
                self.write_segment(seg, now, |s| {
                    s.finish_refresh(hash, key, stamp, value.clone(), weight, now)
                });
                value
            }
            Ok(Err(e)) => {
                let _error: BoxError = e.into();
                self.stats.record_load_failure(load_time);
                self.write_segment(seg, now, |s| s.cancel_refresh(hash, key, stamp));
                #[cfg(feature = "logging")]
                log::warn!(
                    "{}Failed to refresh a value, keeping the stale one: {_error}",
                    log_prefix(self.name.as_deref())
                );
                stale
            }
            Err(payload) => {
                self.stats.record_load_failure(load_time);
                self.write_segment(seg, now, |s| s.cancel_refresh(hash, key, stamp));
                resume_unwind(payload);
            }
        }
    }

    fn refresh_in_background(&self, seg_index: usize, hash: u64, key: Arc<K>, stamp: u64) {
        let Some(loader) = &self.loader else {
            return;
        };
        let start = self.clock.fast_now();
        let result = catch_unwind(AssertUnwindSafe(|| {
            loader(&*key).map(|value| {
                let weight = self.weigh(&key, &value);
                (value, weight)
            })
        }));
        let load_time = self.elapsed_nanos(start);
        let seg = &self.segments[seg_index];
        let now = self.clock.now();

        match result {
            Ok(Ok((value, weight))) => {
                self.stats.record_load_success(load_time);
                self.write_segment(seg, now, |s| {
                    s.finish_refresh(hash, &key, stamp, value, weight, now)
                });
            }
            Ok(Err(_error)) => {
                self.stats.record_load_failure(load_time);
                self.write_segment(seg, now, |s| s.cancel_refresh(hash, &key, stamp));
                #[cfg(feature = "logging")]
                log::warn!(
                    "{}The loader failed to refresh a value: {_error}",
                    log_prefix(self.name.as_deref())
                );
            }
            Err(_payload) => {
                self.stats.record_load_failure(load_time);
                self.write_segment(seg, now, |s| s.cancel_refresh(hash, &key, stamp));
                #[cfg(feature = "logging")]
                log::warn!(
                    "{}The loader panicked while refreshing a value",
                    log_prefix(self.name.as_deref())
                );
            }
        }
    }
}

impl<K, V, S> InnerSync for Inner<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn run_pending_tasks(&self) {
        self.maintain(Sweep::Batch, false);
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }
}

#[cfg(feature = "logging")]
fn log_prefix(cache_name: Option<&str>) -> String {
    cache_name
        .map(|name| format!("[{name}] "))
        .unwrap_or_default()
}

/// Returns the number of segments and its base 2 logarithm.
///
/// The number is the concurrency level rounded up to a power of two, reduced
/// so that a bounded cache has at least `MIN_SEGMENT_SHARE` of the bound per
/// segment.
fn segment_layout(concurrency_level: usize, bound: Option<u64>) -> (usize, u32) {
    let concurrency_level = concurrency_level.min(MAX_SEGMENTS);
    let mut count = 1usize;
    let mut bits = 0u32;
    while count < concurrency_level
        && bound.map_or(true, |b| ((count as u64) << 1) * MIN_SEGMENT_SHARE <= b)
    {
        count <<= 1;
        bits += 1;
    }
    (count, bits)
}
