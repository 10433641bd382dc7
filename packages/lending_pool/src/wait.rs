use std::time::Duration;

/// How long [`acquire_wait()`][crate::LendingPool::acquire_wait] may block while waiting for a
/// free object.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lending_pool::{LendingPool, Wait};
///
/// let pool = LendingPool::<u32>::new();
///
/// // Nobody will ever push into this pool, so we give up after a short while.
/// let loan = pool.acquire_wait(Wait::For(Duration::from_millis(10)));
/// assert!(loan.is_none());
/// ```
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Wait {
    /// Block until an object becomes available, however long that takes.
    Indefinitely,

    /// Block for at most the given duration. A zero duration does not block at all.
    For(Duration),
}

impl From<Duration> for Wait {
    fn from(value: Duration) -> Self {
        Self::For(value)
    }
}
