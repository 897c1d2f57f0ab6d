//! Provides a thread-safe, segmented concurrent cache.

mod base_cache;
mod builder;
mod cache;
mod entry;
mod iter;
mod map_view;
mod segment;
mod value_initializer;

pub use {builder::CacheBuilder, cache::Cache, iter::Iter, map_view::MapView};
