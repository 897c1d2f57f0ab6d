use super::base_cache::BaseCache;

use std::{
    hash::{BuildHasher, Hash},
    sync::Arc,
};

/// Iterator visiting all key-value pairs in a cache in arbitrary order.
///
/// Call [`Cache::iter`](./struct.Cache.html#method.iter) method to obtain an
/// `Iter`.
///
/// Each segment is copied when the iterator reaches it. The iterator never
/// yields expired entries nor computations in flight.
pub struct Iter<'i, K, V, S> {
    cache: &'i BaseCache<K, V, S>,
    next_segment: usize,
    current: std::vec::IntoIter<(Arc<K>, V)>,
}

impl<'i, K, V, S> Iter<'i, K, V, S> {
    pub(crate) fn new(cache: &'i BaseCache<K, V, S>) -> Self {
        Self {
            cache,
            next_segment: 0,
            current: Vec::new().into_iter(),
        }
    }
}

impl<'i, K, V, S> Iterator for Iter<'i, K, V, S>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    S: BuildHasher + Clone + Send + Sync + 'static,
{
    type Item = (Arc<K>, V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.next() {
                return Some(item);
            }
            if self.next_segment >= self.cache.num_segments() {
                return None;
            }
            self.current = self.cache.snapshot_segment(self.next_segment).into_iter();
            self.next_segment += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sync::Cache;

    use std::collections::BTreeMap;

    #[test]
    fn visits_every_segment() {
        let cache = Cache::builder()
            .concurrency_level(16)
            .build()
            .expect("failed to build");
        assert_eq!(cache.policy().num_segments(), 16);

        cache.put_all((0..100u32).map(|i| (i, i.to_string())));
        let entries: BTreeMap<_, _> = cache.iter().map(|(k, v)| (*k, v)).collect();

        assert_eq!(entries.len(), 100);
        assert_eq!(entries.get(&42).map(String::as_str), Some("42"));
    }

    #[test]
    fn empty_cache() {
        let cache: Cache<u32, u32> = Cache::new(10);
        assert!(cache.iter().next().is_none());
    }
}
