use once_cell::sync::Lazy;
use parking_lot::RwLock;
use scheduled_thread_pool::ScheduledThreadPool;
use std::{collections::HashMap, sync::Arc};

use crate::common::available_parallelism;

static REGISTRY: Lazy<ThreadPoolRegistry> = Lazy::new(ThreadPoolRegistry::default);

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum PoolName {
    /// Delivers removal notifications for caches in the `Queued` delivery mode.
    RemovalNotifier,
    /// Runs the loader for refreshes triggered by `get_if_present`.
    Refresher,
}

impl PoolName {
    fn thread_name_template(&self) -> &'static str {
        match self {
            PoolName::RemovalNotifier => "memocache-notifier-{}",
            PoolName::Refresher => "memocache-refresher-{}",
        }
    }

    fn num_threads(&self) -> usize {
        match self {
            // Notifications are drained by one task at a time.
            PoolName::RemovalNotifier => 1,
            PoolName::Refresher => available_parallelism(),
        }
    }
}

pub(crate) struct ThreadPool {
    pub(crate) name: PoolName,
    pub(crate) pool: ScheduledThreadPool,
}

impl ThreadPool {
    fn new(name: PoolName) -> Self {
        let num_threads = name.num_threads();
        #[cfg(feature = "logging")]
        log::debug!("Starting the {name:?} thread pool with {num_threads} thread(s)");
        let pool = ScheduledThreadPool::with_name(name.thread_name_template(), num_threads);
        Self { name, pool }
    }

    pub(crate) fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.execute(job);
    }
}

#[derive(Default)]
pub(crate) struct ThreadPoolRegistry {
    pools: RwLock<HashMap<PoolName, Arc<ThreadPool>>>,
}

impl ThreadPoolRegistry {
    pub(crate) fn acquire_pool(name: PoolName) -> Arc<ThreadPool> {
        {
            // Acquire a read lock and get the pool.
            let pools = REGISTRY.pools.read();
            if let Some(pool) = pools.get(&name) {
                return Arc::clone(pool);
            }
        }
        // Acquire the write lock, double check the pool still does not exist,
        // and insert a new pool.
        let mut pools = REGISTRY.pools.write();
        let pool = pools
            .entry(name)
            .or_insert_with(|| Arc::new(ThreadPool::new(name)));
        Arc::clone(pool)
    }

    pub(crate) fn release_pool(pool: &Arc<ThreadPool>) {
        if Arc::strong_count(pool) <= 2 {
            // No other client exists; only this Arc and the registry are
            // the owners. Let's remove and drop the one in the registry.
            let name = pool.name;
            let mut pools = REGISTRY.pools.write();
            if let Some(pool) = pools.get(&name) {
                if Arc::strong_count(pool) <= 2 {
                    pools.remove(&name);
                }
            }
        }
    }
}
