use std::alloc::Layout;

use thiserror::Error;

/// Errors that can occur when operating on a [`LendingPool`][crate::LendingPool] or a
/// [`Loan`][crate::Loan].
///
/// Running out of time in [`acquire_wait()`][crate::LendingPool::acquire_wait] is not an error;
/// it is signaled by returning an empty [`Loan`][crate::Loan].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The allocator could not provide storage for new pool slots.
    ///
    /// The pool is left exactly as it was before the failed operation.
    #[error("failed to allocate pool storage with layout {layout:?}")]
    AllocationFailed {
        /// The layout of the allocation that failed.
        layout: Layout,
    },

    /// The value of an empty [`Loan`][crate::Loan] was accessed.
    ///
    /// This is a logic error in the caller; retrying the access will not help.
    #[error("attempted to access the value of an empty loan")]
    EmptyLoan,

    /// Two pools could not swap their contents because at least one of them has objects on loan.
    ///
    /// Loaned objects always return to the pool they were borrowed from, so the contents of a pool
    /// may only be exchanged while all of its objects are at home.
    #[error("cannot swap pool contents while objects are on loan")]
    SwapWhileLent,
}

/// A specialized `Result` type for lending pool operations, returning the crate's [`Error`] type
/// as the error value.
pub type Result<T> = std::result::Result<T, Error>;
