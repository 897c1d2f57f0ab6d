use super::{Cache, Iter};

use std::{
    borrow::Borrow,
    collections::hash_map::RandomState,
    hash::{BuildHasher, Hash},
};

/// A map-like view of a [`Cache`].
///
/// Writes through the view are writes to the cache, and are reported to the
/// removal listener the same way. Reads through the view update the access
/// order but are not counted in the statistics.
///
/// Obtain a view with [`Cache::as_map_view`](./struct.Cache.html#method.as_map_view).
///
/// # Example
///
/// ```rust
/// use memocache::sync::Cache;
///
/// let cache = Cache::new(100);
/// let map = cache.as_map_view();
///
/// assert_eq!(map.insert("a", 1), None);
/// assert_eq!(map.insert("a", 2), Some(1));
/// assert!(map.contains_value(&2));
/// assert_eq!(map.remove(&"a"), Some(2));
/// assert!(map.is_empty());
/// ```
pub struct MapView<'a, K, V, S = RandomState> {
    cache: &'a Cache<K, V, S>,
}

impl<'a, K, V, S> MapView<'a, K, V, S>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(cache: &'a Cache<K, V, S>) -> Self {
        Self { cache }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.base.get_entry(key, false).map(|(_, value)| value)
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.contains_key(key)
    }

    /// Scans the whole cache.
    pub fn contains_value(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.cache.iter().any(|(_, v)| v == *value)
    }

    /// Same as [`Cache::put`](./struct.Cache.html#method.put).
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.cache.put(key, value)
    }

    /// Same as [`Cache::invalidate`](./struct.Cache.html#method.invalidate).
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.invalidate(key)
    }

    pub fn len(&self) -> u64 {
        self.cache.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> Iter<'a, K, V, S> {
        self.cache.iter()
    }
}
