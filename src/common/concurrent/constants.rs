pub(crate) const DEFAULT_CONCURRENCY_LEVEL: usize = 4;
pub(crate) const DEFAULT_INITIAL_CAPACITY: usize = 16;

pub(crate) const MAX_SEGMENTS: usize = 1 << 16;
pub(crate) const MAX_SEGMENT_CAPACITY: usize = 1 << 30;
// A bounded cache is split only while each segment gets at least this much
// of the bound.
pub(crate) const MIN_SEGMENT_SHARE: u64 = 20;

pub(crate) const READ_LOG_FLUSH_POINT: usize = 64;

// 256 elements
pub(crate) const READ_LOG_CH_SIZE: usize = READ_LOG_FLUSH_POINT * 4;

// Upper bound of expired entries swept per order, and of slots scanned for
// collectable entries, in a single opportunistic cleanup.
pub(crate) const EXPIRATION_BATCH_SIZE: usize = 16;
pub(crate) const RECLAIM_BATCH_SIZE: usize = 16;

pub(crate) const HOUSEKEEPING_INTERVAL_MILLIS: u64 = 300;

pub(crate) const MAX_NOTIFICATIONS_PER_TASK: usize = 5_000;

pub(crate) const MAX_COMPUTE_RETRIES: usize = 200;
