pub(crate) mod arena;
pub(crate) mod builder_utils;
pub(crate) mod concurrent;
pub(crate) mod deque;
pub(crate) mod error;
pub(crate) mod time;

#[cfg(test)]
pub(crate) mod test_utils;

use std::{num::NonZeroUsize, thread::available_parallelism as std_available_parallelism};

pub(crate) fn available_parallelism() -> usize {
    std_available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
