use std::time::Duration;

use super::error::ConfigError;

const YEAR_SECONDS: u64 = 365 * 24 * 3600;

pub(crate) fn ensure_duration_in_range(
    name: &'static str,
    duration: Option<Duration>,
) -> Result<(), ConfigError> {
    let max_duration = Duration::from_secs(1_000 * YEAR_SECONDS);
    match duration {
        Some(d) if d > max_duration => Err(ConfigError::DurationTooLong(name)),
        _ => Ok(()),
    }
}

pub(crate) fn ensure_positive_duration(
    name: &'static str,
    duration: Option<Duration>,
) -> Result<(), ConfigError> {
    match duration {
        Some(d) if d.is_zero() => Err(ConfigError::ZeroDuration(name)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_bounds() {
        let year = Duration::from_secs(YEAR_SECONDS);
        assert_eq!(ensure_duration_in_range("ttl", None), Ok(()));
        assert_eq!(ensure_duration_in_range("ttl", Some(year * 1_000)), Ok(()));
        assert_eq!(
            ensure_duration_in_range("ttl", Some(year * 1_001)),
            Err(ConfigError::DurationTooLong("ttl"))
        );

        assert_eq!(ensure_positive_duration("refresh", Some(year)), Ok(()));
        assert_eq!(
            ensure_positive_duration("refresh", Some(Duration::ZERO)),
            Err(ConfigError::ZeroDuration("refresh"))
        );
    }
}
