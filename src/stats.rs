//! Cache statistics.
//!
//! Statistics are recorded only by caches built with
//! [`CacheBuilder::record_stats`][record-stats]. Other caches return all-zero
//! snapshots.
//!
//! [record-stats]: ../sync/struct.CacheBuilder.html#method.record_stats

mod cache_stats;
pub(crate) mod stats_counter;

pub use cache_stats::CacheStats;
