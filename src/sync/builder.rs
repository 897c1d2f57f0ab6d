use super::{
    base_cache::{CacheConfig, Loader},
    entry::Timeouts,
    segment::Reclaim,
    Cache,
};
use crate::{
    common::{
        builder_utils::{ensure_duration_in_range, ensure_positive_duration},
        concurrent::{
            constants::{DEFAULT_CONCURRENCY_LEVEL, DEFAULT_INITIAL_CAPACITY},
            ReclaimProbe, Weigher,
        },
        error::{BoxError, ConfigError},
        time::Ticker,
    },
    notification::{DeliveryMode, RemovalCause, RemovalListener},
    policy::Strength,
};

use std::{
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
    marker::PhantomData,
    sync::Arc,
    time::Duration,
};

/// Builds a [`Cache`][cache-struct] with various configuration knobs.
///
/// Every option can be set at most once. Misuse is not reported by the
/// setters but by [`build`](#method.build), which returns the first
/// [`ConfigError`][config-error] that was detected.
///
/// [cache-struct]: ./struct.Cache.html
/// [config-error]: ../enum.ConfigError.html
///
/// # Examples
///
/// ```rust
/// use memocache::sync::Cache;
///
/// use std::time::Duration;
///
/// let cache = Cache::builder()
///     // Max 10,000 entries
///     .max_capacity(10_000)
///     // Expire 30 minutes after the last write
///     .expire_after_write(Duration::from_secs(30 * 60))
///     // Expire 5 minutes after the last read or write
///     .expire_after_access(Duration::from_secs(5 * 60))
///     // Create the cache.
///     .build()
///     .expect("invalid configuration");
///
/// // This entry will expire after 5 minutes if there is no read.
/// cache.put(0, "zero");
///
/// // This read extends the entry's life for another 5 minutes.
/// cache.get_if_present(&0);
///
/// // Even though we keep reading it, the entry expires 30 minutes after the
/// // put.
/// ```
///
pub struct CacheBuilder<K, V, C> {
    name: Option<String>,
    initial_capacity: Option<usize>,
    concurrency_level: Option<usize>,
    max_capacity: Option<u64>,
    max_weight: Option<u64>,
    weigher: Option<Weigher<K, V>>,
    timeouts: Timeouts,
    ticker: Option<Arc<dyn Ticker>>,
    removal_listener: Option<RemovalListener<K, V>>,
    delivery_mode: Option<DeliveryMode>,
    weak_keys: Option<ReclaimProbe<K>>,
    value_strength: Option<(Strength, ReclaimProbe<V>)>,
    loader: Option<Loader<K, V>>,
    record_stats: bool,
    error: Option<ConfigError>,
    cache_type: PhantomData<C>,
}

impl<K, V> Default for CacheBuilder<K, V, Cache<K, V, RandomState>>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            name: None,
            initial_capacity: None,
            concurrency_level: None,
            max_capacity: None,
            max_weight: None,
            weigher: None,
            timeouts: Timeouts::default(),
            ticker: None,
            removal_listener: None,
            delivery_mode: None,
            weak_keys: None,
            value_strength: None,
            loader: None,
            record_stats: false,
            error: None,
            cache_type: PhantomData,
        }
    }
}

impl<K, V> CacheBuilder<K, V, Cache<K, V, RandomState>>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Constructs a new `CacheBuilder` with the default settings: unbounded,
    /// no expiration, no listener and no statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a `Cache<K, V>`.
    ///
    /// # Errors
    ///
    /// Returns the first misuse of this builder, if any.
    pub fn build(self) -> Result<Cache<K, V, RandomState>, ConfigError> {
        self.build_with_hasher(RandomState::default())
    }

    /// Builds a `Cache<K, V, S>` with the given `hasher`.
    ///
    /// # Errors
    ///
    /// Returns the first misuse of this builder, if any.
    pub fn build_with_hasher<S>(self, hasher: S) -> Result<Cache<K, V, S>, ConfigError>
    where
        S: BuildHasher + Clone + Send + Sync + 'static,
    {
        self.validate()?;
        Ok(Cache::with_config(self.into_config(), hasher))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        match (&self.weigher, self.max_weight) {
            (Some(_), None) => Err(ConfigError::WeigherWithoutMaxWeight),
            (None, Some(_)) => Err(ConfigError::MaxWeightWithoutWeigher),
            _ => Ok(()),
        }
    }

    pub(crate) fn into_config(self) -> CacheConfig<K, V> {
        CacheConfig {
            name: self.name,
            initial_capacity: self.initial_capacity.unwrap_or(DEFAULT_INITIAL_CAPACITY),
            concurrency_level: self
                .concurrency_level
                .unwrap_or(DEFAULT_CONCURRENCY_LEVEL),
            max_capacity: self.max_capacity,
            max_weight: self.max_weight,
            weigher: self.weigher,
            timeouts: self.timeouts,
            reclaim: Reclaim {
                weak_keys: self.weak_keys,
                values: self.value_strength,
            },
            loader: self.loader,
            ticker: self.ticker,
            removal_listener: self.removal_listener,
            delivery_mode: self.delivery_mode.unwrap_or_default(),
            record_stats: self.record_stats,
        }
    }
}

impl<K, V, C> CacheBuilder<K, V, C> {
    fn fail(mut self, error: ConfigError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    /// Sets the name of the cache. Currently the name is used for
    /// identification only in logging messages.
    pub fn name(mut self, name: &str) -> Self {
        if self.name.is_some() {
            return self.fail(ConfigError::AlreadySet("name"));
        }
        self.name = Some(name.to_string());
        self
    }

    /// Sets the number of entries the cache can hold without growing its
    /// internal tables.
    pub fn initial_capacity(mut self, number_of_entries: usize) -> Self {
        if self.initial_capacity.is_some() {
            return self.fail(ConfigError::AlreadySet("initial_capacity"));
        }
        self.initial_capacity = Some(number_of_entries);
        self
    }

    /// Sets the expected number of threads updating the cache concurrently.
    /// The cache is split into this many segments, rounded up to a power of
    /// two. Defaults to 4.
    ///
    /// Zero is rejected with `ConfigError::InvalidConcurrencyLevel`.
    pub fn concurrency_level(mut self, concurrency_level: usize) -> Self {
        if self.concurrency_level.is_some() {
            return self.fail(ConfigError::AlreadySet("concurrency_level"));
        }
        if concurrency_level == 0 {
            return self.fail(ConfigError::InvalidConcurrencyLevel);
        }
        self.concurrency_level = Some(concurrency_level);
        self
    }

    /// Sets the maximum number of entries the cache may hold.
    ///
    /// The bound applies to the whole cache. A write evicts from its own
    /// segment first, then from the others, until the cache is within the
    /// bound again. Mutually exclusive with `max_weight` and with a weigher.
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        if self.max_capacity.is_some() {
            return self.fail(ConfigError::AlreadySet("max_capacity"));
        }
        if self.max_weight.is_some() {
            return self.fail(ConfigError::ConflictingBounds);
        }
        if self.weigher.is_some() {
            return self.fail(ConfigError::WeigherWithMaxCapacity);
        }
        self.max_capacity = Some(max_capacity);
        self
    }

    /// Sets the maximum total weight of the entries. Requires a
    /// [`weigher`](#method.weigher).
    pub fn max_weight(mut self, max_weight: u64) -> Self {
        if self.max_weight.is_some() {
            return self.fail(ConfigError::AlreadySet("max_weight"));
        }
        if self.max_capacity.is_some() {
            return self.fail(ConfigError::ConflictingBounds);
        }
        self.max_weight = Some(max_weight);
        self
    }

    /// Sets the weigher closure, which computes the weight of an entry when
    /// it is stored. Entries weighing zero are never evicted for size.
    pub fn weigher(mut self, weigher: impl Fn(&K, &V) -> u32 + Send + Sync + 'static) -> Self {
        if self.weigher.is_some() {
            return self.fail(ConfigError::AlreadySet("weigher"));
        }
        if self.max_capacity.is_some() {
            return self.fail(ConfigError::WeigherWithMaxCapacity);
        }
        self.weigher = Some(Arc::new(weigher));
        self
    }

    /// Expires an entry once the duration has passed since its value was
    /// last written.
    pub fn expire_after_write(mut self, duration: Duration) -> Self {
        if self.timeouts.expire_after_write.is_some() {
            return self.fail(ConfigError::AlreadySet("expire_after_write"));
        }
        if let Err(e) = ensure_duration_in_range("expire_after_write", Some(duration)) {
            return self.fail(e);
        }
        self.timeouts.expire_after_write = Some(duration);
        self
    }

    /// Expires an entry once the duration has passed since it was last read
    /// or written.
    pub fn expire_after_access(mut self, duration: Duration) -> Self {
        if self.timeouts.expire_after_access.is_some() {
            return self.fail(ConfigError::AlreadySet("expire_after_access"));
        }
        if let Err(e) = ensure_duration_in_range("expire_after_access", Some(duration)) {
            return self.fail(e);
        }
        self.timeouts.expire_after_access = Some(duration);
        self
    }

    /// Makes an entry eligible for refresh once the duration has passed since
    /// its value was last written.
    ///
    /// The first read of an eligible entry triggers a single recomputation
    /// while other readers keep getting the old value:
    ///
    /// - `get_or_compute` and `get_with` run their own closure on the
    ///   calling thread and return the new value.
    /// - `get_if_present` and `get_all_present` run the
    ///   [`loader`](#method.loader) on a background thread, if one is set.
    ///
    /// When the recomputation fails the old value is kept.
    pub fn refresh_after_write(mut self, duration: Duration) -> Self {
        const NAME: &str = "refresh_after_write";
        if self.timeouts.refresh_after_write.is_some() {
            return self.fail(ConfigError::AlreadySet(NAME));
        }
        if let Err(e) = ensure_positive_duration(NAME, Some(duration))
            .and_then(|_| ensure_duration_in_range(NAME, Some(duration)))
        {
            return self.fail(e);
        }
        self.timeouts.refresh_after_write = Some(duration);
        self
    }

    /// Sets the time source of the cache. Mostly useful in tests.
    pub fn ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        if self.ticker.is_some() {
            return self.fail(ConfigError::AlreadySet("ticker"));
        }
        self.ticker = Some(ticker);
        self
    }

    /// Sets the removal listener, which is called once for every entry that
    /// leaves the cache. See the [`notification`][notification] module.
    ///
    /// [notification]: ../notification/index.html
    pub fn removal_listener(
        mut self,
        listener: impl Fn(Arc<K>, V, RemovalCause) + Send + Sync + 'static,
    ) -> Self {
        if self.removal_listener.is_some() {
            return self.fail(ConfigError::AlreadySet("removal_listener"));
        }
        self.removal_listener = Some(Arc::new(listener));
        self
    }

    /// Sets how the removal notifications are delivered. Defaults to
    /// [`DeliveryMode::Immediate`].
    pub fn delivery_mode(mut self, mode: DeliveryMode) -> Self {
        if self.delivery_mode.is_some() {
            return self.fail(ConfigError::AlreadySet("delivery_mode"));
        }
        self.delivery_mode = Some(mode);
        self
    }

    /// Sets the loader used to refresh entries found by `get_if_present` and
    /// `get_all_present`. Has no effect without
    /// [`refresh_after_write`](#method.refresh_after_write).
    pub fn loader<F, E>(mut self, loader: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
    {
        if self.loader.is_some() {
            return self.fail(ConfigError::AlreadySet("loader"));
        }
        let loader: Loader<K, V> = Arc::new(move |key: &K| loader(key).map_err(Into::into));
        self.loader = Some(loader);
        self
    }

    /// Enables the statistics returned by [`Cache::stats`][stats].
    ///
    /// [stats]: ./struct.Cache.html#method.stats
    pub fn record_stats(mut self) -> Self {
        self.record_stats = true;
        self
    }

    fn set_value_strength(mut self, strength: Strength, probe: ReclaimProbe<V>) -> Self {
        if self.value_strength.is_some() {
            return self.fail(ConfigError::AlreadySet("value strength"));
        }
        self.value_strength = Some((strength, probe));
        self
    }
}

impl<T, V, C> CacheBuilder<Arc<T>, V, C>
where
    T: ?Sized + Send + Sync + 'static,
{
    /// Holds the keys weakly: an entry is collected once the cache holds the
    /// only reference to its key.
    ///
    /// Keys are still compared with `Eq`, not by identity.
    pub fn weak_keys(mut self) -> Self {
        if self.weak_keys.is_some() {
            return self.fail(ConfigError::AlreadySet("key strength"));
        }
        let probe: ReclaimProbe<Arc<T>> = Arc::new(|key: &Arc<T>| Arc::strong_count(key) == 1);
        self.weak_keys = Some(probe);
        self
    }
}

impl<K, T, C> CacheBuilder<K, Arc<T>, C>
where
    T: ?Sized + Send + Sync + 'static,
{
    /// Holds the values weakly: an entry is collected during housekeeping
    /// once the cache holds the only reference to its value.
    pub fn weak_values(self) -> Self {
        self.set_value_strength(Strength::Weak, unreferenced_probe())
    }

    /// Holds the values softly: an entry whose value is only referenced by the
    /// cache is collected when [`Cache::reclaim_unreferenced`][reclaim] is
    /// called.
    ///
    /// [reclaim]: ./struct.Cache.html#method.reclaim_unreferenced
    pub fn soft_values(self) -> Self {
        self.set_value_strength(Strength::Soft, unreferenced_probe())
    }
}

fn unreferenced_probe<T: ?Sized + Send + Sync + 'static>() -> ReclaimProbe<Arc<T>> {
    Arc::new(|value: &Arc<T>| Arc::strong_count(value) == 1)
}
