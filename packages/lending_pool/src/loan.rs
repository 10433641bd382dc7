use std::any::type_name;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Weak;

use tracing::trace;

use crate::{Error, Global, PoolCore, Result, SlotAllocator, SlotStorage};

/// An object on loan from a [`LendingPool`][crate::LendingPool].
///
/// A loan is either empty or holds exactly one object, to which it has exclusive access. When a
/// holding loan is dropped or [released][Self::release], the object goes back to the free stack
/// of the pool it came from.
///
/// Loans do not keep their pool alive. If the pool has been torn down by the time the loan is
/// released, the loan drops the object and frees its storage itself.
///
/// A loan cannot be cloned - there is only ever one owner of an object on loan. Moving a loan out
/// of a place via [`std::mem::take()`] leaves an empty loan behind.
///
/// # Thread safety
///
/// A loan can be sent to another thread if `T` is [`Send`] and shared between threads if `T` is
/// [`Sync`], as long as the allocator is both [`Send`] and [`Sync`].
///
/// # Example
///
/// ```rust
/// use lending_pool::LendingPool;
///
/// let pool = LendingPool::from_elem(1, &String::from("hello"));
///
/// let mut loan = pool.acquire();
/// assert!(loan.is_some());
/// loan.push_str(" world");
///
/// // The only object is on loan.
/// assert!(pool.acquire().is_none());
///
/// drop(loan);
///
/// // It is back, with the changes made while it was on loan.
/// assert_eq!(*pool.acquire(), "hello world");
/// ```
pub struct Loan<T, A: SlotAllocator<T> = Global> {
    lent: Option<Lent<T, A>>,
}

/// The parts of a holding loan.
struct Lent<T, A: SlotAllocator<T>> {
    /// Contains a live `T` that only this loan refers to.
    slot: NonNull<T>,

    /// Where the object goes back to, if that still exists.
    core: Weak<PoolCore<T, A>>,

    /// Where the storage goes back to, if the core no longer exists.
    storage: SlotStorage<A>,
}

impl<T, A: SlotAllocator<T>> Loan<T, A> {
    /// Creates a loan for an object taken from a pool.
    ///
    /// # Safety
    ///
    /// The slot must contain a live `T` that is tracked by neither the free stack nor the raw stack
    /// of `core`, must not be referenced by any other loan and must have been allocated by
    /// `storage`.
    pub(crate) unsafe fn new(
        slot: NonNull<T>,
        core: Weak<PoolCore<T, A>>,
        storage: SlotStorage<A>,
    ) -> Self {
        Self {
            lent: Some(Lent {
                slot,
                core,
                storage,
            }),
        }
    }

    /// Creates an empty loan that holds no object.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::Loan;
    ///
    /// let loan = Loan::<u32>::none();
    /// assert!(loan.is_none());
    /// ```
    #[must_use]
    pub fn none() -> Self {
        Self { lent: None }
    }

    /// Whether the loan holds an object.
    #[must_use]
    pub fn is_some(&self) -> bool {
        self.lent.is_some()
    }

    /// Whether the loan is empty.
    #[must_use]
    pub fn is_none(&self) -> bool {
        self.lent.is_none()
    }

    /// Returns a shared reference to the object on loan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyLoan`] if the loan is empty.
    pub fn get(&self) -> Result<&T> {
        let lent = self.lent.as_ref().ok_or(Error::EmptyLoan)?;

        // SAFETY: The slot contains a live `T` that only this loan refers to, and the shared
        // borrow of `self` prevents any mutable access for the lifetime of the reference.
        Ok(unsafe { lent.slot.as_ref() })
    }

    /// Returns an exclusive reference to the object on loan.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyLoan`] if the loan is empty.
    pub fn get_mut(&mut self) -> Result<&mut T> {
        let lent = self.lent.as_mut().ok_or(Error::EmptyLoan)?;

        // SAFETY: The slot contains a live `T` that only this loan refers to, and we have
        // exclusive access to the loan.
        Ok(unsafe { lent.slot.as_mut() })
    }

    /// Returns the object to its pool, leaving the loan empty.
    ///
    /// If the pool no longer exists, the object is dropped instead. Releasing an empty loan does
    /// nothing.
    ///
    /// # Example
    ///
    /// ```rust
    /// use lending_pool::LendingPool;
    ///
    /// let pool = LendingPool::from_elem(1, &42_u32);
    ///
    /// let mut loan = pool.acquire();
    /// assert_eq!(pool.len(), 0);
    ///
    /// loan.release();
    /// assert!(loan.is_none());
    /// assert_eq!(pool.len(), 1);
    /// ```
    pub fn release(&mut self) {
        let Some(lent) = self.lent.take() else {
            return;
        };

        if let Some(core) = lent.core.upgrade() {
            core.return_slot(lent.slot);
            return;
        }

        trace!(
            value_type = type_name::<T>(),
            "pool is gone, disposing of object returned from loan"
        );

        // SAFETY: The pool that lent us the object is gone. It never tracked this slot while it
        // was on loan, so its teardown did not touch it - we are the only owner of the value.
        unsafe {
            lent.slot.as_ptr().drop_in_place();
        }

        // SAFETY: The value is gone, the storage came from this allocator and nothing else will
        // release it because the pool no longer knows about it.
        unsafe {
            lent.storage.release(lent.slot);
        }
    }
}

impl<T, A: SlotAllocator<T>> Default for Loan<T, A> {
    fn default() -> Self {
        Self::none()
    }
}

impl<T, A: SlotAllocator<T>> Deref for Loan<T, A> {
    type Target = T;

    /// # Panics
    ///
    /// Panics if the loan is empty. Use [`Loan::get()`] for a fallible alternative.
    #[inline]
    fn deref(&self) -> &Self::Target {
        self.get()
            .expect("dereferenced an empty loan - check is_some() before accessing the object")
    }
}

impl<T, A: SlotAllocator<T>> DerefMut for Loan<T, A> {
    /// # Panics
    ///
    /// Panics if the loan is empty. Use [`Loan::get_mut()`] for a fallible alternative.
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.get_mut()
            .expect("dereferenced an empty loan - check is_some() before accessing the object")
    }
}

impl<T, A: SlotAllocator<T>> Drop for Loan<T, A> {
    fn drop(&mut self) {
        self.release();
    }
}

// SAFETY: A loan owns its object exclusively, so sending the loan sends the object (`T: Send`).
// Releasing it from another thread touches the pool core (a mutex-guarded monitor) or the
// allocator via `Arc`, which needs the allocator to be `Send + Sync`.
unsafe impl<T: Send, A: SlotAllocator<T> + Send + Sync> Send for Loan<T, A> {}

// SAFETY: Through a shared reference, a loan only hands out `&T`, so sharing it is fine whenever
// sharing `T` is fine. The allocator handle is only touched through `&mut self`.
unsafe impl<T: Sync, A: SlotAllocator<T> + Send + Sync> Sync for Loan<T, A> {}

impl<T, A: SlotAllocator<T>> fmt::Debug for Loan<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loan")
            .field("value_type", &type_name::<T>())
            .field("slot", &self.lent.as_ref().map(|lent| lent.slot))
            .finish()
    }
}
