use std::{
    borrow::Borrow,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use triomphe::Arc as TrioArc;

use super::{
    entry::{Entry, LoadState, Timeouts},
    value_initializer::{same_ticket, Ticket},
};
use crate::{
    common::{
        arena::{SlotArena, SlotId},
        concurrent::{
            constants::{MAX_SEGMENT_CAPACITY, READ_LOG_CH_SIZE},
            ReclaimProbe,
        },
        deque::{Deque, Order},
        time::Instant,
    },
    notification::RemovalCause,
    policy::Strength,
};

/// A read that has not been applied to the access order yet.
pub(crate) struct ReadRecord {
    id: SlotId,
    gen: u64,
}

/// A removal that happened under the segment lock. Drained into the stats
/// counter and the notifier before the lock is released.
pub(crate) struct PendingRemoval<K, V> {
    pub(crate) key: Arc<K>,
    /// `None` when the cache has no removal listener.
    pub(crate) value: Option<V>,
    pub(crate) cause: RemovalCause,
    pub(crate) weight: u32,
}

/// Tells which resident entries may be collected.
pub(crate) struct Reclaim<K, V> {
    pub(crate) weak_keys: Option<ReclaimProbe<K>>,
    pub(crate) values: Option<(Strength, ReclaimProbe<V>)>,
}

impl<K, V> Default for Reclaim<K, V> {
    fn default() -> Self {
        Self {
            weak_keys: None,
            values: None,
        }
    }
}

impl<K, V> Reclaim<K, V> {
    pub(crate) fn has_weak(&self) -> bool {
        self.weak_keys.is_some() || matches!(self.values, Some((Strength::Weak, _)))
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.weak_keys.is_some() || self.values.is_some()
    }

    pub(crate) fn key_strength(&self) -> Strength {
        if self.weak_keys.is_some() {
            Strength::Weak
        } else {
            Strength::Strong
        }
    }

    pub(crate) fn value_strength(&self) -> Strength {
        self.values
            .as_ref()
            .map_or(Strength::Strong, |(strength, _)| *strength)
    }

    fn is_collectable(&self, entry: &Entry<K, V>, include_soft: bool) -> bool {
        if let Some(probe) = &self.weak_keys {
            if probe(&*entry.key) {
                return true;
            }
        }
        match (&self.values, &entry.value) {
            (Some((strength, probe)), Some(value)) => {
                (*strength == Strength::Weak || include_soft) && probe(value)
            }
            _ => false,
        }
    }
}

/// One shard of the cache. The lock guards the index and both orders; the
/// read log and the counters can be used without it.
pub(crate) struct Segment<K, V> {
    index: usize,
    inner: RwLock<SegmentInner<K, V>>,
    read_log_snd: Sender<ReadRecord>,
    read_log_rcv: Receiver<ReadRecord>,
    entry_count: AtomicU64,
    weighted_size: AtomicU64,
}

impl<K, V> Segment<K, V> {
    pub(crate) fn new(index: usize, initial_capacity: usize, notify_removals: bool) -> Self {
        let (read_log_snd, read_log_rcv) = crossbeam_channel::bounded(READ_LOG_CH_SIZE);
        Self {
            index,
            inner: RwLock::new(SegmentInner::new(initial_capacity, notify_removals)),
            read_log_snd,
            read_log_rcv,
            entry_count: Default::default(),
            weighted_size: Default::default(),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SegmentInner<K, V>> {
        self.inner.read()
    }

    /// Acquires the write lock and applies the read log.
    pub(crate) fn lock(&self) -> RwLockWriteGuard<'_, SegmentInner<K, V>> {
        let mut inner = self.inner.write();
        inner.apply_reads(&self.read_log_rcv);
        inner
    }

    pub(crate) fn try_lock(&self) -> Option<RwLockWriteGuard<'_, SegmentInner<K, V>>> {
        let mut inner = self.inner.try_write()?;
        inner.apply_reads(&self.read_log_rcv);
        Some(inner)
    }

    /// Logs a hit for the access order. The record is dropped when the log is
    /// full; the entry then keeps its position until its next read.
    pub(crate) fn record_read(&self, id: SlotId, gen: u64) {
        let _ = self.read_log_snd.try_send(ReadRecord { id, gen });
    }

    pub(crate) fn read_log_len(&self) -> usize {
        self.read_log_rcv.len()
    }

    /// Publishes the counts of the locked segment. Returns the previously
    /// published weighted size.
    pub(crate) fn publish_counts(&self, inner: &SegmentInner<K, V>) -> u64 {
        self.entry_count
            .store(inner.resident_count(), Ordering::Release);
        self.weighted_size
            .swap(inner.weighted_size(), Ordering::AcqRel)
    }

    pub(crate) fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Acquire)
    }

    pub(crate) fn weighted_size(&self) -> u64 {
        self.weighted_size.load(Ordering::Acquire)
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Wait(Ticket<V>),
}

pub(crate) enum Reservation<V> {
    /// A valid value is resident.
    Present(V),
    /// Another caller is computing the value.
    Wait(Ticket<V>),
    /// The given ticket was published. The caller must compute the value.
    Reserved,
}

/// The lock-guarded state of a segment.
pub(crate) struct SegmentInner<K, V> {
    arena: SlotArena<Entry<K, V>>,
    buckets: Vec<Option<SlotId>>,
    access_order: Deque,
    write_order: Deque,
    weighted_size: u64,
    next_gen: u64,
    next_refresh_stamp: u64,
    reclaim_cursor: usize,
    pending: Vec<PendingRemoval<K, V>>,
    notify_removals: bool,
}

impl<K, V> SegmentInner<K, V> {
    fn new(initial_capacity: usize, notify_removals: bool) -> Self {
        let num_buckets = initial_capacity
            .clamp(1, MAX_SEGMENT_CAPACITY)
            .next_power_of_two();
        Self {
            arena: SlotArena::with_capacity(initial_capacity.min(MAX_SEGMENT_CAPACITY)),
            buckets: vec![None; num_buckets],
            access_order: Deque::new(Order::Access),
            write_order: Deque::new(Order::Write),
            weighted_size: 0,
            next_gen: 0,
            next_refresh_stamp: 0,
            reclaim_cursor: 0,
            pending: Vec::new(),
            notify_removals,
        }
    }

    pub(crate) fn resident_count(&self) -> u64 {
        self.access_order.len() as u64
    }

    pub(crate) fn weighted_size(&self) -> u64 {
        self.weighted_size
    }

    pub(crate) fn entry(&self, id: SlotId) -> Option<&Entry<K, V>> {
        self.arena.get(id)
    }

    /// Iterates the resident entries that are not expired at `now`.
    pub(crate) fn valid_entries<'a>(
        &'a self,
        now: Instant,
        timeouts: &'a Timeouts,
    ) -> impl Iterator<Item = (SlotId, &'a Entry<K, V>)> + 'a {
        self.access_order
            .iter(&self.arena)
            .filter(move |(_, entry)| !timeouts.is_expired(*entry, now))
    }

    pub(crate) fn drain_pending(&mut self) -> std::vec::Drain<'_, PendingRemoval<K, V>> {
        self.pending.drain(..)
    }

    fn apply_reads(&mut self, read_log: &Receiver<ReadRecord>) {
        for ReadRecord { id, gen } in read_log.try_iter() {
            let valid = self
                .arena
                .get(id)
                .map_or(false, |entry| entry.gen == gen && entry.is_resident());
            if valid {
                self.access_order.move_to_back(&mut self.arena, id);
            }
        }
    }

    fn next_gen(&mut self) -> u64 {
        self.next_gen = self.next_gen.wrapping_add(1);
        self.next_gen
    }

    #[inline]
    fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Finds the entry of the key, resident or not.
    pub(crate) fn find<Q>(&self, hash: u64, key: &Q) -> Option<SlotId>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut cursor = self.buckets[self.bucket_index(hash)];
        while let Some(id) = cursor {
            let entry = self.arena.get(id)?;
            let entry_key: &Q = (*entry.key).borrow();
            if entry.hash == hash && entry_key == key {
                return Some(id);
            }
            cursor = entry.next_in_bucket;
        }
        None
    }

    fn link_to_index(&mut self, mut entry: Entry<K, V>) -> SlotId {
        let threshold = self.buckets.len() * 3 / 4;
        if self.arena.len() + 1 > threshold && self.buckets.len() < MAX_SEGMENT_CAPACITY {
            self.grow_buckets();
        }
        let index = self.bucket_index(entry.hash);
        entry.next_in_bucket = self.buckets[index];
        let id = self.arena.insert(entry);
        self.buckets[index] = Some(id);
        id
    }

    fn grow_buckets(&mut self) {
        let num_buckets = self.buckets.len() * 2;
        let mut buckets = vec![None; num_buckets];
        for (id, entry) in self.arena.iter_mut() {
            let index = (entry.hash as usize) & (num_buckets - 1);
            entry.next_in_bucket = buckets[index];
            buckets[index] = Some(id);
        }
        self.buckets = buckets;
    }

    fn unlink_from_index(&mut self, id: SlotId) {
        let (index, next) = match self.arena.get(id) {
            Some(entry) => (self.bucket_index(entry.hash), entry.next_in_bucket),
            None => return,
        };
        if self.buckets[index] == Some(id) {
            self.buckets[index] = next;
            return;
        }
        let mut cursor = self.buckets[index];
        while let Some(current) = cursor {
            let Some(entry) = self.arena.get_mut(current) else {
                break;
            };
            if entry.next_in_bucket == Some(id) {
                entry.next_in_bucket = next;
                return;
            }
            cursor = entry.next_in_bucket;
        }
        debug_assert!(false, "the entry was not in its bucket");
    }

    fn push_pending(&mut self, key: Arc<K>, value: V, cause: RemovalCause, weight: u32) {
        let value = if self.notify_removals { Some(value) } else { None };
        self.pending.push(PendingRemoval {
            key,
            value,
            cause,
            weight,
        });
    }

    fn insert_resident(&mut self, key: Arc<K>, hash: u64, value: V, weight: u32, now: Instant) {
        let gen = self.next_gen();
        let id = self.link_to_index(Entry::new_resident(key, hash, gen, value, weight, now));
        self.access_order.push_back(&mut self.arena, id);
        self.write_order.push_back(&mut self.arena, id);
        self.weighted_size = self.weighted_size.saturating_add(weight as u64);
    }

    /// Turns a placeholder into a resident entry.
    fn make_resident(&mut self, id: SlotId, value: V, weight: u32, now: Instant) {
        let gen = self.next_gen();
        match self.arena.get_mut(id) {
            Some(entry) => {
                debug_assert!(!entry.is_resident());
                entry.value = Some(value);
                entry.weight = weight;
                entry.gen = gen;
                entry.load = LoadState::Idle;
                entry.write_time = now;
                entry.set_access_time(now);
            }
            None => return,
        }
        self.access_order.push_back(&mut self.arena, id);
        self.write_order.push_back(&mut self.arena, id);
        self.weighted_size = self.weighted_size.saturating_add(weight as u64);
    }

    /// Replaces the value of a resident entry and returns the old one with
    /// its weight. Cancels a running refresh.
    fn replace_value(&mut self, id: SlotId, value: V, weight: u32, now: Instant) -> Option<(V, u32)> {
        let gen = self.next_gen();
        let entry = self.arena.get_mut(id)?;
        let old_value = entry.value.replace(value)?;
        let old_weight = std::mem::replace(&mut entry.weight, weight);
        entry.gen = gen;
        entry.load = LoadState::Idle;
        entry.write_time = now;
        entry.set_access_time(now);

        self.weighted_size = self
            .weighted_size
            .saturating_sub(old_weight as u64)
            .saturating_add(weight as u64);
        self.access_order.move_to_back(&mut self.arena, id);
        self.write_order.move_to_back(&mut self.arena, id);
        Some((old_value, old_weight))
    }

    /// Unlinks the entry from the index and the orders. A resident entry is
    /// reported with the cause; a placeholder is dropped silently.
    fn remove_entry(&mut self, id: SlotId, cause: RemovalCause) {
        let is_resident = match self.arena.get(id) {
            Some(entry) => entry.is_resident(),
            None => return,
        };
        if is_resident {
            self.access_order.unlink(&mut self.arena, id);
            self.write_order.unlink(&mut self.arena, id);
        }
        self.unlink_from_index(id);
        if let Some(Entry {
            key,
            value: Some(value),
            weight,
            ..
        }) = self.arena.remove(id)
        {
            self.weighted_size = self.weighted_size.saturating_sub(weight as u64);
            self.push_pending(key, value, cause, weight);
        }
    }

    /// Removes the entry if it still holds the value it had at `gen`.
    pub(crate) fn remove_if_gen(&mut self, id: SlotId, gen: u64, cause: RemovalCause) -> bool {
        let matches = self
            .arena
            .get(id)
            .map_or(false, |entry| entry.gen == gen && entry.is_resident());
        if matches {
            self.remove_entry(id, cause);
        }
        matches
    }

    /// Removes every resident entry. Computations in flight are not affected.
    pub(crate) fn invalidate_all(&mut self) {
        let ids: Vec<_> = self
            .access_order
            .iter(&self.arena)
            .map(|(id, _)| id)
            .collect();
        for id in ids {
            self.remove_entry(id, RemovalCause::Explicit);
        }
    }

    /// Removes expired entries. A bounded sweep only looks at the heads of
    /// both orders; an unbounded one checks every entry.
    pub(crate) fn expire(&mut self, now: Instant, timeouts: &Timeouts, batch_size: Option<usize>) {
        if !timeouts.expires() {
            return;
        }
        let Some(batch_size) = batch_size else {
            let expired: Vec<_> = self
                .access_order
                .iter(&self.arena)
                .filter(|(_, entry)| timeouts.is_expired(*entry, now))
                .map(|(id, _)| id)
                .collect();
            for id in expired {
                self.remove_entry(id, RemovalCause::Expired);
            }
            return;
        };

        for order in [Order::Write, Order::Access] {
            for _ in 0..batch_size {
                let head = match order {
                    Order::Access => self.access_order.peek_front(),
                    Order::Write => self.write_order.peek_front(),
                };
                let Some(id) = head else {
                    break;
                };
                let expired = self
                    .arena
                    .get(id)
                    .map_or(false, |entry| timeouts.is_expired(entry, now));
                if !expired {
                    break;
                }
                self.remove_entry(id, RemovalCause::Expired);
            }
        }
    }

    /// Evicts from the least recently used end until the weighted size is
    /// within `max_weight`. Entries weighing zero are skipped. With
    /// `keep_newest`, the most recently used entry is never a victim.
    pub(crate) fn evict(&mut self, max_weight: u64, keep_newest: bool) {
        let newest = self.access_order.peek_back().filter(|_| keep_newest);
        let mut cursor = self.access_order.peek_front();
        while self.weighted_size > max_weight {
            let Some(id) = cursor else {
                break;
            };
            if Some(id) == newest {
                break;
            }
            cursor = self.access_order.next_of(&self.arena, id);
            if self.arena.get(id).map_or(false, |entry| entry.weight > 0) {
                self.remove_entry(id, RemovalCause::Size);
            }
        }
    }

    /// Collects the entries whose key or value is only referenced by the
    /// cache. A bounded pass scans `batch_size` slots, resuming where the
    /// previous pass stopped.
    pub(crate) fn reclaim(&mut self, reclaim: &Reclaim<K, V>, include_soft: bool, batch_size: Option<usize>) {
        let slot_count = self.arena.slot_count();
        if slot_count == 0 || !reclaim.is_enabled() {
            return;
        }
        let scan = batch_size.map_or(slot_count, |n| n.min(slot_count));
        let start = self.reclaim_cursor % slot_count;
        let victims: Vec<_> = (0..scan)
            .map(|i| SlotId::new((start + i) % slot_count))
            .filter(|id| {
                self.arena.get(*id).map_or(false, |entry| {
                    entry.is_resident() && reclaim.is_collectable(entry, include_soft)
                })
            })
            .collect();
        self.reclaim_cursor = (start + scan) % slot_count;
        for id in victims {
            self.remove_entry(id, RemovalCause::Collected);
        }
    }

    /// Marks a resident entry as refreshing and returns the refresh stamp, or
    /// `None` when the entry changed or another refresh is running.
    pub(crate) fn begin_refresh(&mut self, id: SlotId, gen: u64) -> Option<u64> {
        self.next_refresh_stamp = self.next_refresh_stamp.wrapping_add(1);
        let stamp = self.next_refresh_stamp;
        let entry = self.arena.get_mut(id)?;
        if entry.gen != gen || !entry.is_resident() || !entry.is_idle() {
            return None;
        }
        entry.load = LoadState::Refreshing(stamp);
        Some(stamp)
    }

    fn find_refreshing(&self, hash: u64, key: &K, stamp: u64) -> Option<SlotId>
    where
        K: Eq,
    {
        let id = self.find(hash, key)?;
        match self.arena.get(id)?.load {
            LoadState::Refreshing(s) if s == stamp => Some(id),
            _ => None,
        }
    }

    /// Installs the result of a refresh. When the entry was written or
    /// removed since the refresh began, the result is reported as replaced
    /// instead.
    pub(crate) fn finish_refresh(
        &mut self,
        hash: u64,
        key: &Arc<K>,
        stamp: u64,
        value: V,
        weight: u32,
        now: Instant,
    ) where
        K: Eq,
    {
        match self.find_refreshing(hash, key, stamp) {
            Some(id) => {
                if let Some((old_value, old_weight)) = self.replace_value(id, value, weight, now) {
                    let key = self.arena.get(id).map_or_else(|| Arc::clone(key), |e| Arc::clone(&e.key));
                    self.push_pending(key, old_value, RemovalCause::Replaced, old_weight);
                }
            }
            None => self.push_pending(Arc::clone(key), value, RemovalCause::Replaced, weight),
        }
    }

    pub(crate) fn cancel_refresh(&mut self, hash: u64, key: &K, stamp: u64)
    where
        K: Eq,
    {
        if let Some(id) = self.find_refreshing(hash, key, stamp) {
            if let Some(entry) = self.arena.get_mut(id) {
                entry.load = LoadState::Idle;
            }
        }
    }

    /// Publishes the placeholder of a first computation, unless a valid value
    /// or another computation is found.
    pub(crate) fn reserve(
        &mut self,
        hash: u64,
        key: &Arc<K>,
        ticket: &Ticket<V>,
        now: Instant,
        timeouts: &Timeouts,
    ) -> Reservation<V>
    where
        K: Eq,
        V: Clone,
    {
        if let Some(id) = self.find(hash, &**key) {
            match self.lookup(id, now, timeouts) {
                Some(Lookup::Hit(value)) => {
                    self.access_order.move_to_back(&mut self.arena, id);
                    return Reservation::Present(value);
                }
                Some(Lookup::Wait(other)) => return Reservation::Wait(other),
                Some(Lookup::Expired) => self.remove_entry(id, RemovalCause::Expired),
                None => self.remove_entry(id, RemovalCause::Explicit),
            }
        }
        let gen = self.next_gen();
        let placeholder = Entry::new_placeholder(Arc::clone(key), hash, gen, TrioArc::clone(ticket));
        self.link_to_index(placeholder);
        Reservation::Reserved
    }

    fn lookup(&self, id: SlotId, now: Instant, timeouts: &Timeouts) -> Option<Lookup<V>>
    where
        V: Clone,
    {
        let entry = self.arena.get(id)?;
        match (&entry.value, &entry.load) {
            (Some(_), _) if timeouts.is_expired(entry, now) => Some(Lookup::Expired),
            (Some(value), _) => {
                entry.set_access_time(now);
                Some(Lookup::Hit(value.clone()))
            }
            (None, LoadState::Loading(ticket)) => Some(Lookup::Wait(TrioArc::clone(ticket))),
            (None, _) => None,
        }
    }

    /// Installs the result of a first computation. When the placeholder was
    /// made resident by a `put` in the meantime, the computed value is
    /// reported as replaced.
    pub(crate) fn complete_load(
        &mut self,
        hash: u64,
        key: &Arc<K>,
        ticket: &Ticket<V>,
        value: V,
        weight: u32,
        now: Instant,
    ) where
        K: Eq,
    {
        match self.find(hash, &**key) {
            Some(id) => {
                let is_ours = self.arena.get(id).map_or(false, |entry| {
                    !entry.is_resident()
                        && matches!(&entry.load, LoadState::Loading(t) if same_ticket(t, ticket))
                });
                if is_ours {
                    self.make_resident(id, value, weight, now);
                } else {
                    self.push_pending(Arc::clone(key), value, RemovalCause::Replaced, weight);
                }
            }
            None => self.insert_resident(Arc::clone(key), hash, value, weight, now),
        }
    }

    /// Removes the placeholder of a failed computation.
    pub(crate) fn abort_load(&mut self, hash: u64, key: &K, ticket: &Ticket<V>)
    where
        K: Eq,
    {
        let Some(id) = self.find(hash, key) else {
            return;
        };
        let is_ours = self.arena.get(id).map_or(false, |entry| {
            !entry.is_resident()
                && matches!(&entry.load, LoadState::Loading(t) if same_ticket(t, ticket))
        });
        if is_ours {
            self.unlink_from_index(id);
            self.arena.remove(id);
        }
    }

    /// Stores the value and returns the value it replaced, if any was valid.
    pub(crate) fn put(
        &mut self,
        hash: u64,
        key: Arc<K>,
        value: V,
        weight: u32,
        now: Instant,
        timeouts: &Timeouts,
    ) -> Option<V>
    where
        K: Eq,
        V: Clone,
    {
        let Some(id) = self.find(hash, &*key) else {
            self.insert_resident(key, hash, value, weight, now);
            return None;
        };
        let (is_resident, is_expired) = match self.arena.get(id) {
            Some(entry) => (entry.is_resident(), timeouts.is_expired(entry, now)),
            None => return None,
        };
        if !is_resident {
            // Completes the placeholder. The running computation will find
            // its ticket gone.
            self.make_resident(id, value, weight, now);
            None
        } else if is_expired {
            self.remove_entry(id, RemovalCause::Expired);
            self.insert_resident(key, hash, value, weight, now);
            None
        } else {
            let (old_value, old_weight) = self.replace_value(id, value, weight, now)?;
            let key = self.arena.get(id).map_or(key, |e| Arc::clone(&e.key));
            self.push_pending(key, old_value.clone(), RemovalCause::Replaced, old_weight);
            Some(old_value)
        }
    }

    /// Removes the entry of the key and returns its value. An expired entry is
    /// removed as expired and `None` is returned.
    pub(crate) fn invalidate<Q>(&mut self, hash: u64, key: &Q, now: Instant, timeouts: &Timeouts) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        V: Clone,
    {
        let id = self.find(hash, key)?;
        let entry = self.arena.get(id)?;
        let value = entry.value.clone()?;
        if timeouts.is_expired(entry, now) {
            self.remove_entry(id, RemovalCause::Expired);
            None
        } else {
            self.remove_entry(id, RemovalCause::Explicit);
            Some(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Reclaim, Reservation, SegmentInner};
    use crate::{
        common::{concurrent::ReclaimProbe, time::Instant},
        notification::RemovalCause,
        policy::Strength,
        sync::{entry::Timeouts, value_initializer::new_ticket},
    };

    use std::{sync::Arc, time::Duration};

    type Inner = SegmentInner<String, Arc<u32>>;

    fn secs(s: u64) -> Instant {
        Instant::from_nanos(s * 1_000_000_000)
    }

    fn put(inner: &mut Inner, key: &str, value: u32, hash: u64) -> Option<Arc<u32>> {
        inner.put(
            hash,
            Arc::new(key.to_string()),
            Arc::new(value),
            1,
            secs(0),
            &Timeouts::default(),
        )
    }

    fn keys(inner: &Inner) -> Vec<String> {
        inner
            .valid_entries(secs(0), &Timeouts::default())
            .map(|(_, e)| (*e.key).clone())
            .collect()
    }

    fn pending(inner: &mut Inner) -> Vec<(String, Option<u32>, RemovalCause)> {
        inner
            .drain_pending()
            .map(|p| ((*p.key).clone(), p.value.map(|v| *v), p.cause))
            .collect()
    }

    #[test]
    fn put_replace_and_invalidate() {
        let mut inner = Inner::new(4, true);
        assert_eq!(put(&mut inner, "a", 1, 1), None);
        assert_eq!(put(&mut inner, "a", 2, 1).map(|v| *v), Some(1));
        assert_eq!(inner.resident_count(), 1);
        assert_eq!(
            pending(&mut inner),
            vec![("a".into(), Some(1), RemovalCause::Replaced)]
        );

        let removed = inner.invalidate(1, "a", secs(0), &Timeouts::default());
        assert_eq!(removed.map(|v| *v), Some(2));
        assert_eq!(inner.invalidate(1, "a", secs(0), &Timeouts::default()), None);
        assert_eq!(
            pending(&mut inner),
            vec![("a".into(), Some(2), RemovalCause::Explicit)]
        );
        assert_eq!(inner.resident_count(), 0);
        assert_eq!(inner.weighted_size(), 0);
    }

    #[test]
    fn colliding_hashes_share_buckets() {
        let mut inner = Inner::new(1, false);
        // Every key has the same hash, so they chain in one bucket, also
        // across the growth of the bucket table.
        for i in 0..40 {
            put(&mut inner, &format!("k{i}"), i, 7);
        }
        assert_eq!(inner.resident_count(), 40);
        for i in (0..40).step_by(3) {
            assert!(inner.find(7, &format!("k{i}")).is_some());
        }
        inner.invalidate(7, "k0", secs(0), &Timeouts::default());
        inner.invalidate(7, "k39", secs(0), &Timeouts::default());
        inner.invalidate(7, "k20", secs(0), &Timeouts::default());
        assert!(inner.find(7, "k20").is_none());
        assert!(inner.find(7, "k21").is_some());
        assert_eq!(inner.resident_count(), 37);
        // Pending records are only kept for the listener.
        assert!(pending(&mut inner).iter().all(|(_, v, _)| v.is_none()));
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut inner = Inner::new(4, false);
        for (i, key) in ["a", "b", "c"].iter().enumerate() {
            put(&mut inner, key, i as u32, i as u64);
        }
        // Touch "a" through a write, so "b" is the least recently used.
        put(&mut inner, "a", 10, 0);
        put(&mut inner, "d", 3, 3);
        pending(&mut inner);
        inner.evict(3, true);

        assert_eq!(keys(&inner), vec!["c", "a", "d"]);
        assert_eq!(
            pending(&mut inner),
            vec![("b".into(), None, RemovalCause::Size)]
        );
    }

    #[test]
    fn keeps_the_newest_entry_when_asked() {
        let mut inner = Inner::new(4, false);
        put(&mut inner, "a", 1, 0);
        put(&mut inner, "b", 2, 1);

        inner.evict(0, true);
        assert_eq!(keys(&inner), vec!["b"]);

        inner.evict(0, false);
        assert!(keys(&inner).is_empty());
        assert_eq!(inner.weighted_size(), 0);
    }

    #[test]
    fn zero_weight_entries_are_not_evicted() {
        let mut inner = Inner::new(4, false);
        let t = Timeouts::default();
        for i in 0..1_000u64 {
            inner.put(i, Arc::new(format!("z{i}")), Arc::new(0), 0, secs(0), &t);
        }
        inner.put(1_000, Arc::new("a".into()), Arc::new(1), 1, secs(0), &t);
        inner.put(1_001, Arc::new("b".into()), Arc::new(2), 1, secs(0), &t);
        inner.put(1_002, Arc::new("c".into()), Arc::new(3), 1, secs(0), &t);

        // The zero-weight prefix is walked once for all the victims.
        inner.evict(1, false);
        assert_eq!(inner.resident_count(), 1_001);
        assert_eq!(inner.weighted_size(), 1);
        assert_eq!(keys(&inner).last().map(String::as_str), Some("c"));
    }

    #[test]
    fn sweeps_expired_entries() {
        let timeouts = Timeouts {
            expire_after_write: Some(Duration::from_secs(10)),
            ..Default::default()
        };
        let mut inner = Inner::new(4, true);
        for i in 0..5u64 {
            inner.put(i, Arc::new(format!("k{i}")), Arc::new(i as u32), 1, secs(i), &timeouts);
        }
        // Written at 0, 1 and 2 seconds.
        inner.expire(secs(12), &timeouts, Some(16));
        assert_eq!(inner.resident_count(), 2);

        inner.expire(secs(100), &timeouts, None);
        assert_eq!(inner.resident_count(), 0);
        let causes: Vec<_> = pending(&mut inner).into_iter().map(|(_, _, c)| c).collect();
        assert_eq!(causes, vec![RemovalCause::Expired; 5]);
    }

    #[test]
    fn placeholders_are_invisible() {
        let mut inner = Inner::new(4, true);
        let key = Arc::new("p".to_string());
        let ticket = new_ticket();
        let t = Timeouts::default();

        assert!(matches!(
            inner.reserve(5, &key, &ticket, secs(0), &t),
            Reservation::Reserved
        ));
        assert!(inner.find(5, "p").is_some());
        assert_eq!(inner.resident_count(), 0);
        assert!(keys(&inner).is_empty());
        assert_eq!(inner.invalidate(5, "p", secs(0), &t), None);

        inner.invalidate_all();
        assert!(matches!(
            inner.reserve(5, &key, &new_ticket(), secs(0), &t),
            Reservation::Wait(_)
        ));

        inner.complete_load(5, &key, &ticket, Arc::new(1), 1, secs(0));
        assert_eq!(keys(&inner), vec!["p"]);
        assert!(pending(&mut inner).is_empty());
        assert!(matches!(
            inner.reserve(5, &key, &new_ticket(), secs(0), &t),
            Reservation::Present(v) if *v == 1
        ));
    }

    #[test]
    fn put_wins_over_a_running_load() {
        let mut inner = Inner::new(4, true);
        let key = Arc::new("k".to_string());
        let ticket = new_ticket();
        inner.reserve(3, &key, &ticket, secs(0), &Timeouts::default());

        assert_eq!(put(&mut inner, "k", 2, 3), None);
        inner.complete_load(3, &key, &ticket, Arc::new(1), 1, secs(0));

        let entry = inner.find(3, "k").and_then(|id| inner.entry(id));
        assert_eq!(entry.and_then(|e| e.value.as_deref().copied()), Some(2));
        assert_eq!(
            pending(&mut inner),
            vec![("k".into(), Some(1), RemovalCause::Replaced)]
        );
    }

    #[test]
    fn aborted_loads_leave_nothing() {
        let mut inner = Inner::new(4, true);
        let key = Arc::new("k".to_string());
        let ticket = new_ticket();
        inner.reserve(3, &key, &ticket, secs(0), &Timeouts::default());

        // Another ticket does not own the placeholder.
        inner.abort_load(3, &key, &new_ticket());
        assert!(inner.find(3, "k").is_some());

        inner.abort_load(3, &key, &ticket);
        assert!(inner.find(3, "k").is_none());
        assert!(pending(&mut inner).is_empty());
    }

    #[test]
    fn refresh_is_superseded_by_put() {
        let mut inner = Inner::new(4, true);
        put(&mut inner, "k", 1, 9);
        let id = inner.find(9, "k").expect("missing entry");
        let gen = inner.entry(id).map(|e| e.gen).expect("missing entry");

        let stamp = inner.begin_refresh(id, gen).expect("refresh not started");
        assert_eq!(inner.begin_refresh(id, gen), None);

        put(&mut inner, "k", 2, 9);
        let key = Arc::new("k".to_string());
        inner.finish_refresh(9, &key, stamp, Arc::new(3), 1, secs(1));

        let value = inner.entry(id).and_then(|e| e.value.as_deref().copied());
        assert_eq!(value, Some(2));
        assert_eq!(
            pending(&mut inner),
            vec![
                ("k".into(), Some(1), RemovalCause::Replaced),
                ("k".into(), Some(3), RemovalCause::Replaced),
            ]
        );
    }

    #[test]
    fn collects_unreferenced_values() {
        let probe: ReclaimProbe<Arc<u32>> = Arc::new(|v: &Arc<u32>| Arc::strong_count(v) == 1);
        let reclaim = Reclaim::<String, Arc<u32>> {
            weak_keys: None,
            values: Some((Strength::Soft, probe)),
        };
        assert!(!reclaim.has_weak());

        let mut inner = Inner::new(4, false);
        let held = Arc::new(1);
        let t = Timeouts::default();
        inner.put(1, Arc::new("held".into()), Arc::clone(&held), 1, secs(0), &t);
        inner.put(2, Arc::new("free".into()), Arc::new(2), 1, secs(0), &t);

        // Soft values survive the housekeeping passes.
        inner.reclaim(&reclaim, false, None);
        assert_eq!(inner.resident_count(), 2);

        inner.reclaim(&reclaim, true, Some(1));
        inner.reclaim(&reclaim, true, Some(1));
        assert_eq!(keys(&inner), vec!["held"]);
        assert_eq!(
            pending(&mut inner),
            vec![("free".into(), None, RemovalCause::Collected)]
        );
    }
}
