use std::any::type_name;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{DropPolicy, Global, LendingPool, PoolCore, Result, SlotAllocator, SlotStorage};

/// The capacity of a pool built without any initial values or explicit capacity.
pub(crate) const DEFAULT_CAPACITY: usize = 4;

/// Builder for creating an instance of [`LendingPool`].
///
/// This builder allows configuration of the allocator, the drop policy and the initial contents
/// of the pool before creation.
///
/// # Examples
///
/// ```
/// use lending_pool::{DropPolicy, LendingPool};
///
/// // Empty pool with room for 16 objects before it needs to grow.
/// let pool = LendingPool::<Vec<u8>>::builder()
///     .initial_capacity(16)
///     .build()
///     .unwrap();
/// assert_eq!(pool.capacity(), 16);
///
/// // Pool of 8 pre-built buffers that must all be home when the pool is dropped.
/// let pool = LendingPool::builder()
///     .drop_policy(DropPolicy::MustNotAbandonLoans)
///     .build_with(8, || Vec::<u8>::with_capacity(1024))
///     .unwrap();
/// assert_eq!(pool.len(), 8);
/// ```
#[must_use]
pub struct LendingPoolBuilder<T, A = Global> {
    allocator: A,
    drop_policy: DropPolicy,
    initial_capacity: Option<usize>,

    _value: PhantomData<fn() -> T>,
}

impl<T> LendingPoolBuilder<T, Global> {
    pub(crate) fn new() -> Self {
        Self {
            allocator: Global,
            drop_policy: DropPolicy::default(),
            initial_capacity: None,
            _value: PhantomData,
        }
    }
}

impl<T, A> LendingPoolBuilder<T, A> {
    /// Sets the [allocator][SlotAllocator] that provides storage for the pooled objects.
    ///
    /// By default, the [`Global`] allocator is used.
    pub fn allocator<B>(self, allocator: B) -> LendingPoolBuilder<T, B>
    where
        B: SlotAllocator<T>,
    {
        LendingPoolBuilder {
            allocator,
            drop_policy: self.drop_policy,
            initial_capacity: self.initial_capacity,
            _value: PhantomData,
        }
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs what happens when the pool
    /// is torn down while objects are still on loan.
    ///
    /// # Examples
    ///
    /// ```
    /// use lending_pool::{DropPolicy, LendingPool};
    ///
    /// let pool = LendingPool::<u32>::builder()
    ///     .drop_policy(DropPolicy::MustNotAbandonLoans)
    ///     .build()
    ///     .unwrap();
    ///
    /// assert_eq!(pool.drop_policy(), DropPolicy::MustNotAbandonLoans);
    /// ```
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Sets the number of slots to allocate up front.
    ///
    /// Without this, an empty pool starts with a capacity of 4 and a pool with initial values
    /// starts with exactly as many slots as it has values. If fewer slots are requested than
    /// there are initial values, the number of initial values wins.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }
}

impl<T, A: SlotAllocator<T>> LendingPoolBuilder<T, A> {
    /// Builds an empty pool.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the initial storage
    /// cannot be allocated.
    pub fn build(self) -> Result<LendingPool<T, A>> {
        let capacity = self.initial_capacity.unwrap_or(DEFAULT_CAPACITY);

        let core = PoolCore::new(SlotStorage::new(self.allocator), self.drop_policy, capacity)?;

        Ok(LendingPool::from_core(Arc::new(core)))
    }

    /// Builds a pool containing `count` free objects created by `make`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the initial storage
    /// cannot be allocated.
    ///
    /// # Example
    ///
    /// ```
    /// use lending_pool::LendingPool;
    ///
    /// let mut next_id = 0;
    /// let pool = LendingPool::builder()
    ///     .build_with(3, || {
    ///         next_id += 1;
    ///         next_id
    ///     })
    ///     .unwrap();
    ///
    /// assert_eq!(pool.len(), 3);
    /// assert_eq!(pool.capacity(), 3);
    /// ```
    pub fn build_with(self, count: usize, make: impl FnMut() -> T) -> Result<LendingPool<T, A>> {
        let capacity = self.initial_capacity.unwrap_or(0).max(count);

        let core = PoolCore::with_values(
            SlotStorage::new(self.allocator),
            self.drop_policy,
            capacity,
            count,
            make,
        )?;

        Ok(LendingPool::from_core(Arc::new(core)))
    }

    /// Builds a pool containing `count` default-constructed free objects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the initial storage
    /// cannot be allocated.
    pub fn build_with_defaults(self, count: usize) -> Result<LendingPool<T, A>>
    where
        T: Default,
    {
        self.build_with(count, T::default)
    }

    /// Builds a pool containing `count` free copies of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`][crate::Error::AllocationFailed] if the initial storage
    /// cannot be allocated.
    pub fn build_from_elem(self, count: usize, value: &T) -> Result<LendingPool<T, A>>
    where
        T: Clone,
    {
        self.build_with(count, || value.clone())
    }
}

impl<T, A: fmt::Debug> fmt::Debug for LendingPoolBuilder<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LendingPoolBuilder")
            .field("value_type", &type_name::<T>())
            .field("allocator", &self.allocator)
            .field("drop_policy", &self.drop_policy)
            .field("initial_capacity", &self.initial_capacity)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn default_build_has_default_capacity() {
        let pool = LendingPool::<u32>::builder().build().unwrap();

        assert_eq!(pool.capacity(), DEFAULT_CAPACITY);
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.drop_policy(), DropPolicy::MayAbandonLoans);
    }

    #[test]
    fn explicit_capacity_wins_for_empty_pool() {
        let pool = LendingPool::<u32>::builder()
            .initial_capacity(0)
            .build()
            .unwrap();

        assert_eq!(pool.capacity(), 0);
    }

    #[test]
    fn values_win_over_smaller_capacity() {
        let pool = LendingPool::builder()
            .initial_capacity(2)
            .build_from_elem(5, &1_u8)
            .unwrap();

        assert_eq!(pool.capacity(), 5);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn larger_capacity_leaves_raw_slots() {
        let pool = LendingPool::<String>::builder()
            .initial_capacity(10)
            .build_with_defaults(3)
            .unwrap();

        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.managed_count(), 3);
    }

    #[test]
    fn debug_lists_configuration() {
        let builder = LendingPool::<u32>::builder().initial_capacity(7);

        let text = format!("{builder:?}");
        assert!(text.contains("initial_capacity: Some(7)"), "{text}");
        assert!(text.contains("u32"), "{text}");
    }
}
