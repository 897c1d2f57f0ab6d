use memocache::{sync::Cache, ComputeError};
use paste::paste;

use std::{
    collections::hash_map::RandomState,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};

const NUM_THREADS: usize = 16;

fn new_cache<S>(hasher: S) -> Cache<String, u64, S>
where
    S: std::hash::BuildHasher + Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(100)
        .record_stats()
        .build_with_hasher(hasher)
        .expect("failed to build")
}

macro_rules! generate_tests {
    ($name:ident, $hasher:expr) => {
        paste! {
            #[test]
            fn [<$name _computes_once>]() {
                let cache = new_cache($hasher);
                let call_counter = Arc::new(AtomicUsize::default());
                let barrier = Arc::new(Barrier::new(NUM_THREADS));

                let threads: Vec<_> = (0..NUM_THREADS)
                    .map(|thread_id| {
                        let my_cache = cache.clone();
                        let my_call_counter = Arc::clone(&call_counter);
                        let my_barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            my_barrier.wait();
                            let value = my_cache.get_with("key1".to_string(), || {
                                println!("Thread {thread_id} computes the value.");
                                my_call_counter.fetch_add(1, Ordering::AcqRel);
                                thread::sleep(Duration::from_millis(300));
                                5
                            });
                            assert_eq!(value, 5);
                            assert_eq!(my_cache.get_if_present("key1"), Some(5));
                        })
                    })
                    .collect();

                threads
                    .into_iter()
                    .for_each(|t| t.join().expect("Thread failed"));

                assert_eq!(call_counter.load(Ordering::Acquire), 1);
                let stats = cache.stats();
                assert_eq!(stats.load_success_count(), 1);
                assert_eq!(stats.load_failure_count(), 0);
                // Each thread made two requests.
                assert_eq!(stats.request_count(), NUM_THREADS as u64 * 2);
            }

            #[test]
            fn [<$name _waiters_share_the_error>]() {
                let cache = new_cache($hasher);
                let call_counter = Arc::new(AtomicUsize::default());
                let barrier = Arc::new(Barrier::new(NUM_THREADS));

                let threads: Vec<_> = (0..NUM_THREADS)
                    .map(|_| {
                        let my_cache = cache.clone();
                        let my_call_counter = Arc::clone(&call_counter);
                        let my_barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            my_barrier.wait();
                            my_cache.get_or_compute("key1".to_string(), || {
                                my_call_counter.fetch_add(1, Ordering::AcqRel);
                                thread::sleep(Duration::from_millis(300));
                                Err(anyhow::anyhow!("file not found"))
                            })
                        })
                    })
                    .collect();

                let errors: Vec<_> = threads
                    .into_iter()
                    .map(|t| t.join().expect("Thread failed"))
                    .map(|result| match result {
                        Err(ComputeError::Failed(e)) => e,
                        other => panic!("unexpected result: {other:?}"),
                    })
                    .collect();

                assert_eq!(call_counter.load(Ordering::Acquire), 1);
                assert!(errors.iter().all(|e| Arc::ptr_eq(e, &errors[0])));
                assert_eq!(errors[0].to_string(), "file not found");

                // Errors are not cached.
                assert!(!cache.contains_key("key1"));
                let value = cache.get_or_compute("key1".to_string(), || Ok::<_, anyhow::Error>(7));
                assert_eq!(value.ok(), Some(7));
            }

            #[test]
            fn [<$name _waiters_retry_after_a_panic>]() {
                let cache = new_cache($hasher);
                let call_counter = Arc::new(AtomicUsize::default());
                let barrier = Arc::new(Barrier::new(NUM_THREADS));

                let threads: Vec<_> = (0..NUM_THREADS)
                    .map(|_| {
                        let my_cache = cache.clone();
                        let my_call_counter = Arc::clone(&call_counter);
                        let my_barrier = Arc::clone(&barrier);
                        thread::spawn(move || {
                            my_barrier.wait();
                            my_cache.get_with("key1".to_string(), || {
                                if my_call_counter.fetch_add(1, Ordering::AcqRel) == 0 {
                                    thread::sleep(Duration::from_millis(300));
                                    panic!("the first computation panics");
                                }
                                thread::sleep(Duration::from_millis(100));
                                42
                            })
                        })
                    })
                    .collect();

                let results: Vec<_> = threads.into_iter().map(|t| t.join()).collect();

                assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
                assert!(results
                    .iter()
                    .filter_map(|r| r.as_ref().ok())
                    .all(|v| *v == 42));
                assert_eq!(call_counter.load(Ordering::Acquire), 2);
                assert_eq!(cache.get_if_present("key1"), Some(42));

                let stats = cache.stats();
                assert_eq!(stats.load_failure_count(), 1);
                assert_eq!(stats.load_success_count(), 1);
            }
        }
    };
}

generate_tests!(std_hasher, RandomState::default());
generate_tests!(ahash_hasher, ahash::RandomState::default());

#[test]
fn recursive_call_fails_instead_of_deadlocking() {
    let cache: Cache<u32, u32> = Cache::new(10);

    let result = cache.get_or_compute(1, || cache.get_or_compute(1, || Ok::<_, anyhow::Error>(1)));
    // The inner call fails, and its error fails the outer computation.
    match result {
        Err(ComputeError::Failed(e)) => {
            assert!(e.to_string().contains("recursive"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!cache.contains_key(&1));

    let result = catch_unwind(AssertUnwindSafe(|| {
        cache.get_with(2, || cache.get_with(2, || 2));
    }));
    assert!(result.is_err());
    assert!(!cache.contains_key(&2));
}

#[test]
fn other_keys_are_not_blocked() {
    let cache: Cache<u32, u32> = Cache::builder()
        .concurrency_level(1)
        .build()
        .expect("failed to build");
    let barrier = Arc::new(Barrier::new(2));

    let slow = {
        let cache = cache.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            cache.get_with(1, || {
                barrier.wait();
                thread::sleep(Duration::from_millis(300));
                1
            })
        })
    };

    // The computation of key 1 is running. Key 2 shares its segment.
    barrier.wait();
    assert_eq!(cache.get_with(2, || 2), 2);
    assert!(!cache.contains_key(&1));
    cache.put(3, 3);
    assert_eq!(cache.get_if_present(&3), Some(3));

    assert_eq!(slow.join().expect("Thread failed"), 1);
    assert_eq!(cache.get_if_present(&1), Some(1));
}
