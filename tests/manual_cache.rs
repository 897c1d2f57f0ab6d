use memocache::{notification::RemovalCause, sync::Cache, Ticker};

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

#[derive(Default)]
struct ManualTicker(AtomicU64);

impl ManualTicker {
    fn advance(&self, duration: Duration) {
        self.0.fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Ticker for ManualTicker {
    fn read(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[test]
fn reads_after_writes() {
    let cache = Cache::builder()
        .concurrency_level(8)
        .build()
        .expect("failed to build");

    for i in 0..1_000u32 {
        cache.put(i, i.to_string());
    }
    for i in 0..1_000u32 {
        assert_eq!(cache.get_if_present(&i), Some(i.to_string()));
    }
    for i in (0..1_000u32).step_by(2) {
        assert_eq!(cache.put(i, "even".to_string()), Some(i.to_string()));
    }
    assert_eq!(cache.get_if_present(&10).as_deref(), Some("even"));
    assert_eq!(cache.get_if_present(&11), Some("11".to_string()));
    assert_eq!(cache.size(), 1_000);
}

#[test]
fn hits_and_misses() {
    let cache = Cache::builder().record_stats().build().expect("failed to build");

    for i in 0..5u32 {
        assert_eq!(cache.get_if_present(&i), None);
    }
    let stats = cache.stats();
    assert_eq!(stats.miss_count(), 5);
    assert_eq!(stats.hit_count(), 0);
    assert_eq!(stats.hit_rate(), 0.0);

    cache.put(1, "one");
    assert_eq!(cache.get_if_present(&1), Some("one"));

    let delta = cache.stats() - stats;
    assert_eq!(delta.hit_count(), 1);
    assert_eq!(delta.miss_count(), 0);
}

#[test]
fn size_bound_keeps_the_most_recently_used() {
    const CAPACITY: u32 = 10;

    let evicted = Arc::new(Mutex::new(Vec::new()));
    let cache = {
        let evicted = Arc::clone(&evicted);
        Cache::builder()
            .max_capacity(CAPACITY as u64)
            .concurrency_level(1)
            .removal_listener(move |k: Arc<u32>, _v: u32, cause| {
                assert_eq!(cause, RemovalCause::Size);
                evicted.lock().expect("lock poisoned").push(*k);
            })
            .build()
            .expect("failed to build")
    };

    for i in 0..CAPACITY {
        cache.put(i, i);
    }
    // Read the first half so that the second half is the least recently used.
    for i in 0..CAPACITY / 2 {
        assert_eq!(cache.get_if_present(&i), Some(i));
    }
    for i in CAPACITY..CAPACITY + 5 {
        cache.put(i, i);
    }
    cache.run_pending_tasks();

    assert_eq!(cache.size(), CAPACITY as u64);
    let mut evicted = evicted.lock().expect("lock poisoned").clone();
    evicted.sort_unstable();
    assert_eq!(evicted, (CAPACITY / 2..CAPACITY).collect::<Vec<_>>());
    for i in (0..CAPACITY / 2).chain(CAPACITY..CAPACITY + 5) {
        assert!(cache.contains_key(&i), "key {i} was evicted");
    }
}

#[test]
fn size_bound_is_exact_with_many_segments() {
    const CAPACITY: u32 = 100;

    for extra in [1, 5, 10, 250] {
        let evicted = Arc::new(AtomicU64::new(0));
        let cache = {
            let evicted = Arc::clone(&evicted);
            Cache::builder()
                .max_capacity(CAPACITY as u64)
                .removal_listener(move |_k: Arc<u32>, _v: u32, cause| {
                    assert_eq!(cause, RemovalCause::Size);
                    evicted.fetch_add(1, Ordering::SeqCst);
                })
                .build()
                .expect("failed to build")
        };
        assert_eq!(cache.policy().num_segments(), 4);

        for i in 0..CAPACITY + extra {
            cache.put(i, i);
            assert!(cache.size() <= CAPACITY as u64, "(extra: {extra}, key: {i})");
        }
        cache.run_pending_tasks();

        assert_eq!(cache.size(), CAPACITY as u64, "(extra: {extra})");
        assert_eq!(evicted.load(Ordering::SeqCst), extra as u64, "(extra: {extra})");
        // The entry written last is never the victim of its own write.
        assert!(cache.contains_key(&(CAPACITY + extra - 1)));
    }

    let cache = Cache::new(CAPACITY as u64);
    for i in 0..CAPACITY * 3 {
        cache.put(i, ());
    }
    cache.run_pending_tasks();
    assert_eq!(cache.size(), CAPACITY as u64);
}

#[test]
fn size_bound_holds_under_concurrent_writes() {
    const CAPACITY: u64 = 1_000;

    let cache = Cache::new(CAPACITY);
    std::thread::scope(|s| {
        for t in 0..4u64 {
            let cache = &cache;
            s.spawn(move || {
                for i in 0..1_000 {
                    cache.put(t * 1_000 + i, i);
                }
            });
        }
    });
    cache.run_pending_tasks();

    assert!(cache.size() <= CAPACITY);
    assert!(cache.size() > CAPACITY / 2);
}

#[test]
fn expiration_boundary() {
    let ticker = Arc::new(ManualTicker::default());
    let cache = Cache::builder()
        .expire_after_write(Duration::from_secs(10))
        .ticker(ticker.clone())
        .record_stats()
        .build()
        .expect("failed to build");

    cache.put("a", 1);
    ticker.advance(Duration::from_secs(10) - Duration::from_millis(1));
    assert_eq!(cache.get_if_present(&"a"), Some(1));
    ticker.advance(Duration::from_millis(2));
    assert_eq!(cache.get_if_present(&"a"), None);
    assert_eq!(cache.stats().miss_count(), 1);
}

#[test]
fn get_all_present_returns_the_valid_subset() {
    let ticker = Arc::new(ManualTicker::default());
    let cache = Cache::builder()
        .expire_after_write(Duration::from_secs(10))
        .ticker(ticker.clone())
        .record_stats()
        .build()
        .expect("failed to build");

    cache.put(1u32, "expired");
    ticker.advance(Duration::from_secs(5));
    cache.put(2, "two");
    cache.put(3, "three");
    ticker.advance(Duration::from_secs(5));

    let found = cache.get_all_present(&[1u32, 2, 3, 4]);
    let mut keys: Vec<_> = found.keys().map(|k| **k).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec![2, 3]);

    let stats = cache.stats();
    assert_eq!(stats.hit_count(), 2);
    assert_eq!(stats.miss_count(), 2);
}

#[test]
fn invalidating_an_absent_key_is_a_no_op() {
    let notifications = Arc::new(Mutex::new(0));
    let cache = {
        let notifications = Arc::clone(&notifications);
        Cache::builder()
            .removal_listener(move |_k: Arc<u32>, _v: u32, _cause| {
                *notifications.lock().expect("lock poisoned") += 1;
            })
            .build()
            .expect("failed to build")
    };

    assert_eq!(cache.invalidate(&1), None);
    cache.invalidate_keys(&[2u32, 3]);
    cache.invalidate_all();
    cache.run_pending_tasks();
    assert_eq!(*notifications.lock().expect("lock poisoned"), 0);

    cache.put(1, 1);
    assert_eq!(cache.invalidate(&1), Some(1));
    assert_eq!(*notifications.lock().expect("lock poisoned"), 1);
}
