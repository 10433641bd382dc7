#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! A thread-safe pool that lends out pre-constructed objects and takes them back automatically.
//!
//! Some objects are expensive to create but cheap to reuse: buffers, connections, parsers with
//! warmed-up caches. A [`LendingPool`] holds a stack of such objects and hands them out as a
//! [`Loan`]. When the loan is dropped, the object goes back to the pool, ready for the next
//! borrower.
//!
//! # Quick start
//!
//! ```rust
//! use lending_pool::LendingPool;
//!
//! let pool = LendingPool::<Vec<u8>>::with_defaults(4);
//!
//! {
//!     let mut buffer = pool.acquire();
//!     buffer.extend_from_slice(b"some bytes");
//!
//!     assert_eq!(pool.len(), 3);
//! }
//!
//! // The buffer is back, still holding its contents and its heap allocation.
//! assert_eq!(pool.len(), 4);
//! ```
//!
//! # Key features
//!
//! - **Non-blocking and blocking acquisition**: [`acquire()`][LendingPool::acquire] returns an
//!   empty loan if nothing is free, [`acquire_wait()`][LendingPool::acquire_wait] waits for a
//!   free object, with or without a time limit.
//! - **Create on demand**: [`allocate()`][LendingPool::allocate] reuses a free object if there is
//!   one and creates a new one otherwise.
//! - **Stable storage**: every object stays at the same memory address for its whole life in the
//!   pool. Growing the pool never moves existing objects.
//! - **Custom allocators**: storage comes from a [`SlotAllocator`], by default the global
//!   allocator.
//!
//! # Pool lifetime
//!
//! [`LendingPool`] is a cheap handle - clones refer to the same pool. The pool is torn down when
//! the last handle is dropped. Objects on loan at that moment are not affected: they stay valid
//! and are dropped when their loan is released. Use [`DropPolicy::MustNotAbandonLoans`] to turn
//! this situation into a panic instead.
//!
//! # Logging
//!
//! The pool emits [`tracing`](https://docs.rs/tracing) events when it grows, when a wait times
//! out and when it is torn down. No subscriber is installed by this crate.

mod allocator;
mod builder;
mod drop_policy;
mod error;
mod loan;
mod monitor;
mod pool;
mod storage;
mod wait;

pub use allocator::*;
pub use builder::LendingPoolBuilder;
pub use drop_policy::*;
pub use error::*;
pub use loan::*;
pub(crate) use monitor::*;
pub use pool::*;
pub(crate) use storage::*;
pub use wait::*;
