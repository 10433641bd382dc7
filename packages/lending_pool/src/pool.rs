use std::fmt;
use std::sync::Arc;

use crate::{
    DropPolicy, Global, LendingPoolBuilder, Loan, PoolCore, Result, SlotAllocator, Wait,
};

const ERR_CONSTRUCTOR_OOM: &str =
    "we do not intend to handle allocation failure as a real possibility - OOM is panic";

/// A thread-safe pool that lends out pre-constructed objects of type `T`.
///
/// Objects are taken out of the pool as a [`Loan`] and automatically come back to the pool when
/// the loan is dropped. The pool never constructs objects on its own - they are added via
/// [`push()`][Self::push], [`emplace_with()`][Self::emplace_with], the count-initializing
/// constructors or [`resize()`][Self::resize], and reused over and over again.
///
/// This type is a cheap handle to a shared pool instance. Cloning it creates another handle to
/// the same pool. The pool is torn down when the last handle is dropped, even if objects are
/// still on loan - such loans dispose of their object themselves when released (see
/// [`DropPolicy`] to forbid this).
///
/// # Thread safety
///
/// The pool is thread-safe if `T` is [`Send`]. Any thread can take objects out and any thread
/// can return them. [`acquire_wait()`][Self::acquire_wait] blocks until another thread returns or
/// adds an object.
///
/// # Example
///
/// ```rust
/// use std::thread;
///
/// use lending_pool::LendingPool;
///
/// let pool = LendingPool::<Vec<u8>>::with_defaults(2);
///
/// let worker = thread::spawn({
///     let pool = pool.clone();
///
///     move || {
///         let mut buffer = pool.acquire_wait(lending_pool::Wait::Indefinitely);
///         buffer.extend_from_slice(b"hello");
///         buffer.len()
///     }
/// });
///
/// assert_eq!(worker.join().unwrap(), 5);
///
/// // Both buffers are back home, one of them with contents.
/// assert_eq!(pool.len(), 2);
/// ```
pub struct LendingPool<T, A: SlotAllocator<T> = Global> {
    core: Arc<PoolCore<T, A>>,
}

impl<T> LendingPool<T, Global> {
    /// Creates an empty pool with room for a few objects before it needs to grow.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<String>::new();
    ///
    /// assert!(pool.is_empty());
    /// assert!(pool.acquire().is_none());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build().expect(ERR_CONSTRUCTOR_OOM)
    }

    /// Creates a pool with `count` default-constructed free objects.
    ///
    /// The capacity of the pool is exactly `count`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<String>::with_defaults(3);
    ///
    /// assert_eq!(pool.len(), 3);
    /// assert_eq!(pool.capacity(), 3);
    /// ```
    #[must_use]
    pub fn with_defaults(count: usize) -> Self
    where
        T: Default,
    {
        Self::builder()
            .build_with_defaults(count)
            .expect(ERR_CONSTRUCTOR_OOM)
    }

    /// Creates a pool with `count` free copies of `value`.
    ///
    /// The capacity of the pool is exactly `count`.
    #[must_use]
    pub fn from_elem(count: usize, value: &T) -> Self
    where
        T: Clone,
    {
        Self::builder()
            .build_from_elem(count, value)
            .expect(ERR_CONSTRUCTOR_OOM)
    }

    /// Returns a builder for creating a [`LendingPool`] with custom configuration.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::{DropPolicy, LendingPool};
    ///
    /// let pool = LendingPool::<u64>::builder()
    ///     .drop_policy(DropPolicy::MustNotAbandonLoans)
    ///     .initial_capacity(64)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.capacity(), 64);
    /// ```
    pub fn builder() -> LendingPoolBuilder<T> {
        LendingPoolBuilder::new()
    }
}

impl<T, A: SlotAllocator<T>> LendingPool<T, A> {
    pub(crate) fn from_core(core: Arc<PoolCore<T, A>>) -> Self {
        Self { core }
    }

    /// Takes a free object out of the pool without blocking.
    ///
    /// Returns an empty loan if there is no free object. The most recently returned object is
    /// lent out first.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::from_elem(1, &7_u32);
    ///
    /// let first = pool.acquire();
    /// assert_eq!(*first, 7);
    ///
    /// let second = pool.acquire();
    /// assert!(second.is_none());
    /// ```
    #[must_use]
    pub fn acquire(&self) -> Loan<T, A> {
        self.core.acquire()
    }

    /// Takes a free object out of the pool, blocking until one is available or the wait runs out.
    ///
    /// Accepts a [`Wait`] or a plain [`Duration`][std::time::Duration] as the time limit.
    /// Returns an empty loan if no object became available in time.
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::time::Duration;
    ///
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<u32>::new();
    ///
    /// let loan = pool.acquire_wait(Duration::from_millis(5));
    /// assert!(loan.is_none());
    /// ```
    #[must_use]
    pub fn acquire_wait(&self, wait: impl Into<Wait>) -> Loan<T, A> {
        self.core.acquire_wait(wait.into())
    }

    /// Takes a free object out of the pool or, if there is none, creates a new default object
    /// and lends that out instead.
    ///
    /// The returned loan is never empty. The new object becomes part of the pool when the loan
    /// is released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if storage for a new
    /// object cannot be allocated.
    pub fn allocate(&self) -> Result<Loan<T, A>>
    where
        T: Default,
    {
        self.core.allocate_with(T::default)
    }

    /// Takes a free object out of the pool or, if there is none, creates a new one with `make`
    /// and lends that out instead.
    ///
    /// `make` is only called if there is no free object. It is called without holding any lock,
    /// so it may use the pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if storage for a new
    /// object cannot be allocated.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<String>::new();
    ///
    /// let loan = pool.allocate_with(|| String::from("fresh")).unwrap();
    /// assert_eq!(*loan, "fresh");
    /// drop(loan);
    ///
    /// // The object now lives in the pool, so it is reused instead of creating another.
    /// let loan = pool.allocate_with(|| unreachable!()).unwrap();
    /// assert_eq!(*loan, "fresh");
    /// ```
    pub fn allocate_with(&self, make: impl FnOnce() -> T) -> Result<Loan<T, A>> {
        self.core.allocate_with(make)
    }

    /// Adds an object to the pool and wakes up one thread waiting for it, if any.
    ///
    /// When all storage is in use, the capacity of the pool is doubled.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the pool needed to
    /// grow and the storage could not be allocated. The pool is unchanged in that case and
    /// `value` is dropped.
    pub fn push(&self, value: T) -> Result<()> {
        self.core.push(value)
    }

    /// Adds an object created by `make` to the pool and wakes up one thread waiting for it.
    ///
    /// `make` is called without holding any lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the pool needed to
    /// grow and the storage could not be allocated.
    pub fn emplace_with(&self, make: impl FnOnce() -> T) -> Result<()> {
        self.core.push(make())
    }

    /// Allocates storage so the pool can hold at least `new_capacity` objects without growing.
    ///
    /// Does nothing if the capacity is already large enough.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the storage could
    /// not be allocated. The pool is unchanged in that case.
    pub fn reserve(&self, new_capacity: usize) -> Result<()> {
        self.core.reserve(new_capacity)
    }

    /// Adds default objects or drops free objects until exactly `count` objects are free.
    ///
    /// Objects on loan are never affected. Dropped objects leave their storage behind in the
    /// pool, so the capacity never shrinks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the pool needed to
    /// grow and the storage could not be allocated. The pool is unchanged in that case.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<u32>::new();
    ///
    /// pool.resize(10).unwrap();
    /// assert_eq!(pool.len(), 10);
    ///
    /// pool.resize(3).unwrap();
    /// assert_eq!(pool.len(), 3);
    /// assert_eq!(pool.capacity(), 10);
    /// ```
    pub fn resize(&self, count: usize) -> Result<()>
    where
        T: Default,
    {
        self.core.resize_with(count, T::default)
    }

    /// Adds objects created by `make` or drops free objects until exactly `count` objects are
    /// free.
    ///
    /// Objects on loan are never affected. `make` is called without holding any lock, so it may
    /// use the pool. If `make` panics, no objects are added.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the pool needed to
    /// grow and the storage could not be allocated. The pool is unchanged in that case.
    pub fn resize_with(&self, count: usize, make: impl FnMut() -> T) -> Result<()> {
        self.core.resize_with(count, make)
    }

    /// Adds copies of `value` or drops free objects until exactly `count` objects are free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the pool needed to
    /// grow and the storage could not be allocated. The pool is unchanged in that case.
    pub fn resize_from(&self, count: usize, value: &T) -> Result<()>
    where
        T: Clone,
    {
        self.core.resize_with(count, || value.clone())
    }

    /// Exchanges the contents of this pool with those of `other`.
    ///
    /// All free objects, storage and the allocator move between the pools. The drop policy stays
    /// with each pool. Swapping a pool with itself (or another handle to it) does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SwapWhileLent`][crate::Error::SwapWhileLent] if either pool has objects
    /// on loan, because those objects must return to the pool they came from.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let small = LendingPool::from_elem(1, &1_u8);
    /// let large = LendingPool::from_elem(5, &5_u8);
    ///
    /// small.swap(&large).unwrap();
    ///
    /// assert_eq!(small.len(), 5);
    /// assert_eq!(large.len(), 1);
    /// ```
    pub fn swap(&self, other: &Self) -> Result<()> {
        self.core.swap(&other.core)
    }

    /// The number of free objects, ready to be lent out.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.len()
    }

    /// Whether there are no free objects. Objects may still be on loan.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether there is at least one free object.
    ///
    /// Another thread may take it before you do, so an [`acquire()`][Self::acquire] that follows
    /// can still come back empty.
    #[must_use]
    pub fn has_free(&self) -> bool {
        !self.is_empty()
    }

    /// The number of objects the pool has storage for, whether they exist or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.core.capacity()
    }

    /// The number of objects that belong to the pool, both free and on loan.
    #[must_use]
    pub fn managed_count(&self) -> usize {
        self.core.managed_count()
    }

    /// The number of objects currently on loan.
    #[must_use]
    pub fn borrowed_count(&self) -> usize {
        self.core.borrowed_count()
    }

    /// Whether any objects are currently on loan.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.borrowed_count() > 0
    }

    /// Returns a copy of the allocator that provides storage for this pool.
    #[must_use]
    pub fn allocator(&self) -> A
    where
        A: Clone,
    {
        self.core.allocator()
    }

    /// The drop policy the pool was created with.
    #[must_use]
    pub fn drop_policy(&self) -> DropPolicy {
        self.core.drop_policy()
    }

    /// Whether both handles refer to the same pool.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::<u32>::new();
    /// let same = pool.clone();
    /// let other = LendingPool::<u32>::new();
    ///
    /// assert!(pool.ptr_eq(&same));
    /// assert!(!pool.ptr_eq(&other));
    /// ```
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl<T, A: SlotAllocator<T>> Clone for LendingPool<T, A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Default for LendingPool<T, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, A: SlotAllocator<T>> fmt::Debug for LendingPool<T, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LendingPool")
            .field("core", &self.core)
            .finish()
    }
}
