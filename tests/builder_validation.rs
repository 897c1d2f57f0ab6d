use memocache::{sync::Cache, ConfigError, Strength, SystemTicker};

use std::{sync::Arc, time::Duration};

type Builder = memocache::sync::CacheBuilder<u32, u32, Cache<u32, u32>>;

fn builder() -> Builder {
    Cache::builder()
}

fn error_of(builder: Builder) -> Option<ConfigError> {
    builder.build().err()
}

#[test]
fn options_can_be_set_once() {
    assert_eq!(
        error_of(builder().max_capacity(1).max_capacity(1)),
        Some(ConfigError::AlreadySet("max_capacity"))
    );
    assert_eq!(
        error_of(builder().concurrency_level(2).concurrency_level(4)),
        Some(ConfigError::AlreadySet("concurrency_level"))
    );
    assert_eq!(
        error_of(builder().initial_capacity(2).initial_capacity(4)),
        Some(ConfigError::AlreadySet("initial_capacity"))
    );
    assert_eq!(
        error_of(
            builder()
                .expire_after_access(Duration::from_secs(1))
                .expire_after_access(Duration::from_secs(1))
        ),
        Some(ConfigError::AlreadySet("expire_after_access"))
    );
    assert_eq!(
        error_of(
            builder()
                .ticker(Arc::new(SystemTicker::default()))
                .ticker(Arc::new(SystemTicker::default()))
        ),
        Some(ConfigError::AlreadySet("ticker"))
    );
    assert_eq!(
        error_of(builder().removal_listener(|_, _, _| ()).removal_listener(|_, _, _| ())),
        Some(ConfigError::AlreadySet("removal_listener"))
    );
}

#[test]
fn bounds_are_exclusive() {
    assert_eq!(
        error_of(builder().max_weight(10).weigher(|_, _| 1).max_capacity(10)),
        Some(ConfigError::ConflictingBounds)
    );
    assert_eq!(
        error_of(builder().max_capacity(10).weigher(|_, _| 1)),
        Some(ConfigError::WeigherWithMaxCapacity)
    );
    assert_eq!(
        error_of(builder().weigher(|_, _| 1)),
        Some(ConfigError::WeigherWithoutMaxWeight)
    );
    assert_eq!(
        error_of(builder().max_weight(10)),
        Some(ConfigError::MaxWeightWithoutWeigher)
    );
    assert!(builder().max_weight(10).weigher(|_, v| *v).build().is_ok());
}

#[test]
fn durations_are_checked() {
    let too_long = Duration::from_secs(1_001 * 365 * 24 * 3600);
    assert_eq!(
        error_of(builder().expire_after_write(too_long)),
        Some(ConfigError::DurationTooLong("expire_after_write"))
    );
    assert_eq!(
        error_of(builder().refresh_after_write(Duration::ZERO)),
        Some(ConfigError::ZeroDuration("refresh_after_write"))
    );
    // Zero expiration is allowed and expires entries right away.
    let cache = builder()
        .expire_after_write(Duration::ZERO)
        .build()
        .expect("failed to build");
    cache.put(1, 1);
    assert_eq!(cache.get_if_present(&1), None);
}

#[test]
fn concurrency_level_must_be_positive() {
    assert_eq!(
        error_of(builder().concurrency_level(0)),
        Some(ConfigError::InvalidConcurrencyLevel)
    );
    let cache = builder()
        .concurrency_level(5)
        .build()
        .expect("failed to build");
    assert_eq!(cache.policy().num_segments(), 8);
}

#[test]
fn small_bounds_use_fewer_segments() {
    let cache = builder()
        .concurrency_level(64)
        .max_capacity(100)
        .build()
        .expect("failed to build");
    let policy = cache.policy();
    assert_eq!(policy.num_segments(), 4);
    assert_eq!(policy.max_capacity(), Some(100));
    assert_eq!(policy.key_strength(), Strength::Strong);
    assert_eq!(policy.value_strength(), Strength::Strong);
}

#[test]
fn the_first_error_is_reported() {
    let result = builder()
        .concurrency_level(0)
        .max_capacity(1)
        .max_weight(1)
        .build();
    assert_eq!(result.err(), Some(ConfigError::InvalidConcurrencyLevel));

    let error = ConfigError::ConflictingBounds;
    assert_eq!(
        error.to_string(),
        "max_capacity and max_weight are mutually exclusive"
    );
}
