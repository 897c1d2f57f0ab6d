#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Memocache is a concurrent in-memory cache library for Rust.
//!
//! The cache is split into segments, each guarded by its own read-write lock,
//! so that reads never block each other and writes to different segments do
//! not contend. It supports the following features:
//!
//! - Computing a missing value at most once per key, with the other callers
//!   waiting for the result and sharing its error on failure.
//! - Bounding the number of entries, or their total weight with a weigher,
//!   evicting the least recently used entries first.
//! - Expiring entries after a duration since the last write or the last read.
//! - Refreshing entries after a duration since the last write, while readers
//!   keep getting the old value.
//! - Holding keys weakly, or values weakly or softly, for `Arc` keys and
//!   values.
//! - Notifying a listener of every removal with its cause.
//! - Hit, miss, load and eviction statistics.
//!
//! # Example
//!
//! ```rust
//! use memocache::sync::Cache;
//!
//! use std::time::Duration;
//!
//! let cache = Cache::builder()
//!     .max_capacity(10_000)
//!     .expire_after_write(Duration::from_secs(60))
//!     .record_stats()
//!     .build()
//!     .expect("invalid configuration");
//!
//! let value = cache.get_with(1, || "one".to_string());
//! assert_eq!(value, "one");
//!
//! // The value is cached, so the closure is not called again.
//! let value = cache.get_with(1, || unreachable!());
//! assert_eq!(value, "one");
//!
//! assert_eq!(cache.stats().hit_count(), 1);
//! assert_eq!(cache.stats().miss_count(), 1);
//! ```
//!
//! # Minimum Supported Rust Versions
//!
//! This crate's minimum supported Rust version (MSRV) is 1.65.

pub mod notification;
pub mod policy;
pub mod stats;
pub mod sync;

pub(crate) mod common;

pub use common::{
    error::{BoxError, ComputeError, ConfigError},
    time::{SystemTicker, Ticker},
};
pub use policy::{Policy, Strength};
