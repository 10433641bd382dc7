#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for tests of the lending pool packages.

use std::panic;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// How long a test may run before the watchdog gives up on it.
///
/// Miri executes thread synchronization orders of magnitude slower, so it gets more slack.
const TIMEOUT: Duration = if cfg!(miri) {
    Duration::from_secs(60)
} else {
    Duration::from_secs(10)
};

/// Runs a test body on a separate thread and fails the test if it does not finish in time.
///
/// Pool tests block on condition variables, so a bug can easily turn into a hang instead of a
/// failure. The watchdog turns such hangs into a panic so the test run does not stall forever.
///
/// Panics in the test body are propagated to the caller unchanged, so `#[should_panic]` tests
/// work as usual.
///
/// When the `MUTATION_TESTING` environment variable is `1`, the body runs directly on the
/// calling thread without a time limit, so that mutation testing can detect mutants that hang.
///
/// # Panics
///
/// Panics if the test body runs for longer than the timeout.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// let answer = with_watchdog(|| 6 * 7);
/// assert_eq!(answer, 42);
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_thread = thread::spawn(move || {
        // If the receiver is gone, the watchdog already gave up on us.
        drop(tx.send(test_fn()));
    });

    match rx.recv_timeout(TIMEOUT) {
        Ok(result) => {
            test_thread
                .join()
                .expect("test thread already delivered its result, so it cannot have panicked");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test did not finish within {TIMEOUT:?} - probably hanging");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_thread.join() {
            Ok(()) => panic!("test thread exited without delivering a result"),
            Err(payload) => panic::resume_unwind(payload),
        },
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn returns_result_of_fast_test() {
        assert_eq!(with_watchdog(|| 42), 42);
    }

    #[test]
    #[should_panic]
    fn propagates_panic() {
        with_watchdog(|| panic!("intentional panic"));
    }
}
