use super::{
    base_cache::{BaseCache, CacheConfig},
    iter::Iter,
    map_view::MapView,
    CacheBuilder,
};
use crate::{
    common::error::{BoxError, ComputeError},
    policy::Policy,
    stats::CacheStats,
};

use std::{
    borrow::Borrow,
    collections::{hash_map::RandomState, HashMap},
    convert::Infallible,
    fmt,
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// A thread-safe concurrent cache.
///
/// `Cache` is split into segments, each guarded by its own lock. Reads take
/// a shared lock and never wait for a computation; writes lock a single
/// segment. The number of segments follows the
/// [concurrency level][concurrency-level].
///
/// # At-most-once computation
///
/// [`get_or_compute`](#method.get_or_compute) and
/// [`get_with`](#method.get_with) run at most one computation per key at a
/// time. Concurrent callers for the same key block until it finishes and then
/// receive its value, or a clone of its error. Errors are not cached.
///
/// # Examples
///
/// ```rust
/// use memocache::sync::Cache;
///
/// use std::thread;
///
/// fn value(n: usize) -> String {
///     format!("value {n}")
/// }
///
/// const NUM_THREADS: usize = 16;
/// const NUM_KEYS_PER_THREAD: usize = 64;
///
/// // Create a cache that can store up to 10,000 entries.
/// let cache = Cache::new(10_000);
///
/// // Spawn threads and read and update the cache simultaneously.
/// let threads: Vec<_> = (0..NUM_THREADS)
///     .map(|i| {
///         // To share the same cache across the threads, clone it.
///         // This is a cheap operation.
///         let my_cache = cache.clone();
///         let start = i * NUM_KEYS_PER_THREAD;
///         let end = (i + 1) * NUM_KEYS_PER_THREAD;
///
///         thread::spawn(move || {
///             // Insert 64 entries. (NUM_KEYS_PER_THREAD = 64)
///             for key in start..end {
///                 my_cache.put(key, value(key));
///                 // get_if_present() returns Option<String>, a clone of the
///                 // stored value.
///                 assert_eq!(my_cache.get_if_present(&key), Some(value(key)));
///             }
///
///             // Invalidate every 4 element of the inserted entries.
///             for key in (start..end).step_by(4) {
///                 my_cache.invalidate(&key);
///             }
///         })
///     })
///     .collect();
///
/// // Wait for all threads to complete.
/// threads.into_iter().for_each(|t| t.join().expect("Failed"));
///
/// // Verify the result.
/// for key in 0..(NUM_THREADS * NUM_KEYS_PER_THREAD) {
///     if key % 4 == 0 {
///         assert_eq!(cache.get_if_present(&key), None);
///     } else {
///         assert_eq!(cache.get_if_present(&key), Some(value(key)));
///     }
/// }
/// ```
///
/// # Avoiding to clone the value at `get`
///
/// The return type of the read methods is `V` rather than `&V`, because the
/// segment lock is released before returning. If `V` is expensive to clone,
/// wrap it with `std::sync::Arc`.
///
/// # Hashing algorithm
///
/// By default, a cache uses the hashing algorithm of `std::collections::HashMap`.
/// Another one can be given to
/// [`CacheBuilder::build_with_hasher`][build-with-hasher-method]. The hash is
/// mixed with a supplemental function, so a weak hasher does not leave the
/// segments unbalanced.
///
/// [concurrency-level]: ./struct.CacheBuilder.html#method.concurrency_level
/// [build-with-hasher-method]: ./struct.CacheBuilder.html#method.build_with_hasher
pub struct Cache<K, V, S = RandomState> {
    pub(crate) base: BaseCache<K, V, S>,
}

impl<K, V, S> Clone for Cache<K, V, S> {
    /// Makes a clone of this shared cache.
    ///
    /// This operation is cheap as it only creates thread-safe reference counted
    /// pointers to the shared internal data structures.
    fn clone(&self) -> Self {
        Self {
            base: self.base.clone(),
        }
    }
}

impl<K, V, S> fmt::Debug for Cache<K, V, S>
where
    K: fmt::Debug + Eq + Hash + Send + Sync + 'static,
    V: fmt::Debug + Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d_map = f.debug_map();

        for (k, v) in self {
            d_map.entry(&k, &v);
        }

        d_map.finish()
    }
}

impl<K, V> Cache<K, V, RandomState>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Constructs a new `Cache<K, V>` that will store up to the `max_capacity`
    /// entries.
    ///
    /// To adjust various configuration knobs such as `initial_capacity` or
    /// `expire_after_write`, use the [`CacheBuilder`][builder-struct].
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn new(max_capacity: u64) -> Self {
        let config = Self::builder().max_capacity(max_capacity).into_config();
        Self::with_config(config, RandomState::default())
    }

    /// Returns a [`CacheBuilder`][builder-struct], which can build a `Cache`
    /// with various configuration knobs.
    ///
    /// [builder-struct]: ./struct.CacheBuilder.html
    pub fn builder() -> CacheBuilder<K, V, Cache<K, V, RandomState>> {
        CacheBuilder::default()
    }
}

impl<K, V, S> Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn with_config(config: CacheConfig<K, V>, build_hasher: S) -> Self {
        Self {
            base: BaseCache::new(config, build_hasher),
        }
    }

    /// Returns cache's name.
    pub fn name(&self) -> Option<&str> {
        self.base.name()
    }

    /// Returns a read-only cache policy of this cache.
    ///
    /// At this time, cache policy cannot be modified after cache creation.
    /// A future version may support to modify it.
    pub fn policy(&self) -> Policy {
        self.base.policy()
    }

    /// Returns the number of entries in this cache.
    ///
    /// The value is an approximation: it is published by each segment when it
    /// is updated and does not reflect expired entries that were not removed
    /// yet. Call [`run_pending_tasks`](#method.run_pending_tasks) first for an
    /// exact number.
    ///
    /// # Example
    ///
    /// ```rust
    /// use memocache::sync::Cache;
    ///
    /// let cache = Cache::new(10);
    /// cache.put('n', "Netherland Dwarf");
    /// cache.put('l', "Lop Eared");
    /// cache.put('d', "Dutch");
    ///
    /// assert_eq!(cache.size(), 3);
    /// ```
    pub fn size(&self) -> u64 {
        self.base.entry_count()
    }

    /// Returns the total weighted size of the entries in this cache. Without a
    /// weigher every entry weighs one.
    pub fn weighted_size(&self) -> u64 {
        self.base.weighted_size()
    }

    /// Returns a snapshot of the statistics of this cache. All counters are
    /// zero unless the cache was built with
    /// [`record_stats`](./struct.CacheBuilder.html#method.record_stats).
    pub fn stats(&self) -> CacheStats {
        self.base.stats()
    }

    /// Returns `true` if the cache holds a valid value for the key.
    ///
    /// Unlike [`get_if_present`](#method.get_if_present), this method does not
    /// update the access order nor the statistics.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.contains_key(key)
    }

    /// Returns a clone of the value corresponding to the key, if the entry is
    /// present and has not expired.
    ///
    /// If you want to store values that will be expensive to clone, wrap them
    /// by `std::sync::Arc` before storing in a cache.
    ///
    /// The key may be any borrowed form of the cache's key type, but `Hash` and
    /// `Eq` on the borrowed form _must_ match those for the key type.
    pub fn get_if_present<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.get_entry(key, true).map(|(_, value)| value)
    }

    /// Returns the value of the key, computing it with `init` when the entry
    /// is absent or has expired.
    ///
    /// While `init` runs, other callers for the same key wait for it instead
    /// of running their own closure, and receive the same value or a clone of
    /// the same error. A successful value is stored; an error is not cached.
    ///
    /// # Errors
    ///
    /// - [`ComputeError::Failed`] wraps the error returned by `init`, possibly
    ///   the one of another caller that computed the same key.
    /// - [`ComputeError::Recursive`] is returned when `init` itself calls this
    ///   method for the same key on the same thread.
    ///
    /// # Panics
    ///
    /// A panic in `init` is propagated to the caller. The key is left absent
    /// and one of the waiting callers runs its own closure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use memocache::sync::Cache;
    ///
    /// let cache = Cache::new(100);
    ///
    /// let value = cache.get_or_compute("key", || "hello".parse::<u32>());
    /// assert!(value.is_err());
    ///
    /// let value = cache.get_or_compute("key", || "10".parse::<u32>());
    /// assert_eq!(value.ok(), Some(10));
    ///
    /// // The value is cached, so the closure is not called.
    /// let value = cache.get_or_compute("key", || "20".parse::<u32>());
    /// assert_eq!(value.ok(), Some(10));
    /// ```
    pub fn get_or_compute<F, E>(&self, key: K, init: F) -> Result<V, ComputeError>
    where
        F: FnOnce() -> Result<V, E>,
        E: Into<BoxError>,
    {
        self.base.get_or_compute(key, init)
    }

    /// Like [`get_or_compute`](#method.get_or_compute) with a closure that
    /// cannot fail.
    ///
    /// # Panics
    ///
    /// Panics when `init` calls this method for the same key on the same
    /// thread, and when `init` panics.
    pub fn get_with(&self, key: K, init: impl FnOnce() -> V) -> V {
        match self
            .base
            .get_or_compute(key, || Ok::<_, Infallible>(init()))
        {
            Ok(value) => value,
            Err(e) => panic!("get_with failed to get the value: {e}"),
        }
    }

    /// Returns the valid entries among `keys`. Absent keys are left out of the
    /// returned map.
    pub fn get_all_present<'a, I, Q>(&self, keys: I) -> HashMap<Arc<K>, V>
    where
        I: IntoIterator<Item = &'a Q>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        keys.into_iter()
            .filter_map(|key| self.base.get_entry(key, true))
            .collect()
    }

    /// Stores the value for the key and returns the value it replaced, if
    /// any.
    ///
    /// A computation running for the key is superseded: its callers still
    /// receive the value they computed, but it is not stored.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.base.put(key, value)
    }

    /// Stores every pair, in order.
    pub fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) {
        for (key, value) in entries {
            self.base.put(key, value);
        }
    }

    /// Discards any cached value for the key and returns it.
    ///
    /// An entry that has expired is removed as expired and `None` is returned.
    pub fn invalidate<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.base.invalidate(key)
    }

    /// Discards the cached values of the keys.
    pub fn invalidate_keys<'a, I, Q>(&self, keys: I)
    where
        I: IntoIterator<Item = &'a Q>,
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized + 'a,
    {
        for key in keys {
            self.base.invalidate(key);
        }
    }

    /// Discards all cached values.
    ///
    /// Computations in flight are not affected: they store their values when
    /// they finish.
    pub fn invalidate_all(&self) {
        self.base.invalidate_all();
    }

    /// Discards the cached values for which the predicate returns `true`.
    ///
    /// The predicate is called without holding any lock, on a snapshot of
    /// each segment. An entry that changes in the meantime is kept.
    pub fn invalidate_matching(&self, predicate: impl FnMut(&K, &V) -> bool) {
        self.base.invalidate_matching(predicate);
    }

    /// Returns a map view of this cache. See [`MapView`].
    pub fn as_map_view(&self) -> MapView<'_, K, V, S> {
        MapView::new(self)
    }

    /// Creates an iterator visiting all key-value pairs in arbitrary order. The
    /// iterator element type is `(Arc<K>, V)`, where `V` is a clone of a stored
    /// value.
    ///
    /// Iterators do not block concurrent reads and writes on the cache. Each
    /// segment is copied when the iterator reaches it, so an entry inserted or
    /// removed during iteration may or may not be seen.
    ///
    /// # Example
    ///
    /// ```rust
    /// use memocache::sync::Cache;
    ///
    /// let cache = Cache::new(100);
    /// cache.put("Julia", 14);
    ///
    /// let mut iter = cache.iter();
    /// let (k, v) = iter.next().unwrap(); // (Arc<K>, V)
    /// assert_eq!(*k, "Julia");
    /// assert_eq!(v, 14);
    ///
    /// assert!(iter.next().is_none());
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V, S> {
        Iter::new(&self.base)
    }

    /// Removes the expired and collectable entries, evicts entries over the
    /// bound, and delivers the pending removal notifications, on the calling
    /// thread.
    ///
    /// The cache does this incrementally on its own; this method is for tests
    /// and for callers that need an exact [`size`](#method.size).
    pub fn run_pending_tasks(&self) {
        self.base.run_pending_tasks();
    }

    /// Like [`run_pending_tasks`](#method.run_pending_tasks), also collecting
    /// the entries whose softly held values are not referenced outside the
    /// cache.
    pub fn reclaim_unreferenced(&self) {
        self.base.reclaim_unreferenced();
    }
}

impl<'a, K, V, S> IntoIterator for &'a Cache<K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    type Item = (Arc<K>, V);

    type IntoIter = Iter<'a, K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
