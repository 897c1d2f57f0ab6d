use std::{error::Error, fmt, sync::Arc};

/// A boxed error returned by a user supplied computation or loader.
pub type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// The error type returned by [`CacheBuilder::build`][build] when the builder
/// was misused.
///
/// When several problems exist, the first one detected is reported.
///
/// [build]: ./sync/struct.CacheBuilder.html#method.build
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An option that can only be set once was set again, even to the same
    /// value.
    #[error("{0} was already set")]
    AlreadySet(&'static str),
    /// The concurrency level was zero.
    #[error("concurrency level must be greater than zero")]
    InvalidConcurrencyLevel,
    /// Both `max_capacity` and `max_weight` were set.
    #[error("max_capacity and max_weight are mutually exclusive")]
    ConflictingBounds,
    /// A weigher was combined with `max_capacity`, which counts entries.
    #[error("a weigher cannot be combined with max_capacity")]
    WeigherWithMaxCapacity,
    /// A weigher was set without `max_weight`.
    #[error("a weigher requires max_weight")]
    WeigherWithoutMaxWeight,
    /// `max_weight` was set without a weigher.
    #[error("max_weight requires a weigher")]
    MaxWeightWithoutWeigher,
    /// A duration that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    /// A duration was longer than 1000 years.
    #[error("{0} is longer than 1000 years")]
    DurationTooLong(&'static str),
}

/// The error type returned by [`Cache::get_or_compute`][get-or-compute].
///
/// A `ComputeError` is cheap to clone. Every caller that waited for the same
/// failed computation receives a clone of the same error.
///
/// [get-or-compute]: ./sync/struct.Cache.html#method.get_or_compute
#[derive(thiserror::Error, Clone)]
pub enum ComputeError {
    /// The computation returned an error. It is not cached, so a later call may
    /// retry.
    #[error("the computation failed: {0}")]
    Failed(#[source] Arc<dyn Error + Send + Sync + 'static>),
    /// The computation tried to get or compute the value of its own key on the
    /// same thread, which would otherwise deadlock.
    #[error("recursive computation detected for the same key")]
    Recursive,
}

impl ComputeError {
    pub(crate) fn failed(error: impl Into<BoxError>) -> Self {
        let boxed: BoxError = error.into();
        Self::Failed(Arc::from(boxed))
    }

    /// Returns the error of a failed computation, or `None` for
    /// [`ComputeError::Recursive`].
    pub fn source_error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        match self {
            Self::Failed(e) => Some(e.as_ref()),
            Self::Recursive => None,
        }
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self, Self::Recursive)
    }
}

impl fmt::Debug for ComputeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Self::Recursive => f.write_str("Recursive"),
        }
    }
}
