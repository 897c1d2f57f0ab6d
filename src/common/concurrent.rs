use std::sync::Arc;

pub(crate) mod constants;
pub(crate) mod housekeeper;
pub(crate) mod thread_pool;

pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u32 + Send + Sync + 'static>;

/// Returns `true` when the cache holds the only strong reference to the
/// key or value it is asked about, so the holder may be collected.
pub(crate) type ReclaimProbe<T> = Arc<dyn Fn(&T) -> bool + Send + Sync + 'static>;

/// Applies a supplemental hash function to a hash produced by the cache's
/// `BuildHasher`. Both the segment selection (high bits) and the bucket
/// selection (low bits) depend on the result, so a poor native hash must not
/// leave either half clustered. This is the finalizer of MurmurHash3.
#[inline]
pub(crate) fn spread(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}
