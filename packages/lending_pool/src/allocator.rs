use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{Error, Result};

/// Provides uninitialized storage for the values of a [`LendingPool`][crate::LendingPool].
///
/// The pool never constructs or drops values through the allocator - it only asks for raw memory
/// and gives it back once the value that lived in it has been dropped.
///
/// # Safety
///
/// A successful [`allocate()`][Self::allocate] must return a pointer that is valid for reads and
/// writes of `count` consecutive values of `T`, properly aligned for `T`, and not aliased by any
/// other live allocation. The memory must remain valid until it is passed to
/// [`deallocate()`][Self::deallocate] with the same `count`.
///
/// # Example
///
/// ```rust
/// use std::num::NonZero;
/// use std::ptr::NonNull;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// use lending_pool::{Global, LendingPool, Result, SlotAllocator};
///
/// #[derive(Debug, Default)]
/// struct Counting {
///     live: AtomicUsize,
/// }
///
/// // SAFETY: We forward to `Global`, which upholds the contract.
/// unsafe impl<T> SlotAllocator<T> for Counting {
///     fn allocate(&self, count: NonZero<usize>) -> Result<NonNull<T>> {
///         let ptr = SlotAllocator::<T>::allocate(&Global, count)?;
///         self.live.fetch_add(count.get(), Ordering::Relaxed);
///         Ok(ptr)
///     }
///
///     unsafe fn deallocate(&self, ptr: NonNull<T>, count: NonZero<usize>) {
///         self.live.fetch_sub(count.get(), Ordering::Relaxed);
///         // SAFETY: Forwarding the caller's guarantees.
///         unsafe { SlotAllocator::<T>::deallocate(&Global, ptr, count) };
///     }
/// }
///
/// let pool = LendingPool::<u64>::builder()
///     .allocator(Counting::default())
///     .build()
///     .unwrap();
///
/// pool.push(42).unwrap();
/// assert_eq!(*pool.acquire(), 42);
/// ```
pub unsafe trait SlotAllocator<T> {
    /// Allocates uninitialized storage for `count` consecutive values of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the memory could not be provided.
    fn allocate(&self, count: NonZero<usize>) -> Result<NonNull<T>>;

    /// Releases storage previously returned by [`allocate()`][Self::allocate].
    ///
    /// # Safety
    ///
    /// The caller must guarantee that `ptr` was returned by `allocate()` on this allocator with
    /// the same `count`, that it has not been deallocated yet and that no value still lives in it.
    unsafe fn deallocate(&self, ptr: NonNull<T>, count: NonZero<usize>);
}

/// The default [`SlotAllocator`], backed by the global Rust allocator.
///
/// Zero-sized types never touch the global allocator; they get a dangling, well-aligned pointer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Global;

impl Global {
    fn layout<T>(count: NonZero<usize>) -> Result<Layout> {
        Layout::array::<T>(count.get()).map_err(|_layout_error| Error::AllocationFailed {
            // The requested array does not even have a valid layout, so we report the layout
            // of the element type as the best available description.
            layout: Layout::new::<T>(),
        })
    }
}

// SAFETY: `std::alloc::alloc()` with a non-zero-sized array layout of `T` returns memory that is
// valid and aligned for `count` values of `T`. Zero-sized types need no memory at all.
unsafe impl<T> SlotAllocator<T> for Global {
    fn allocate(&self, count: NonZero<usize>) -> Result<NonNull<T>> {
        let layout = Self::layout::<T>(count)?;

        if layout.size() == 0 {
            return Ok(NonNull::dangling());
        }

        // SAFETY: The layout has a non-zero size, checked above.
        let ptr = unsafe { alloc(layout) };

        NonNull::new(ptr.cast::<T>()).ok_or(Error::AllocationFailed { layout })
    }

    unsafe fn deallocate(&self, ptr: NonNull<T>, count: NonZero<usize>) {
        let layout = Self::layout::<T>(count)
            .expect("layout was valid when the storage was allocated, so it must still be valid");

        if layout.size() == 0 {
            return;
        }

        // SAFETY: The caller guarantees that the pointer came from `allocate()` with the same
        // count, which means it was allocated via `alloc()` with this exact layout.
        unsafe {
            dealloc(ptr.as_ptr().cast(), layout);
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Global: Send, Sync, Clone, Copy, Default);

    const ONE: NonZero<usize> = NonZero::new(1).unwrap();

    #[test]
    fn allocate_write_read_deallocate() {
        let ptr: NonNull<String> = Global.allocate(ONE).unwrap();

        // SAFETY: Freshly allocated and suitably aligned for a String.
        unsafe {
            ptr.as_ptr().write("hello".to_string());
        }

        // SAFETY: We wrote a valid String above.
        let value = unsafe { ptr.as_ptr().read() };
        assert_eq!(value, "hello");

        // SAFETY: Allocated above with the same count and the value has been moved out.
        unsafe {
            Global.deallocate(ptr, ONE);
        }
    }

    #[test]
    fn allocate_many_is_aligned() {
        let count = NonZero::new(16).unwrap();
        let ptr: NonNull<u128> = Global.allocate(count).unwrap();

        assert_eq!(ptr.as_ptr().align_offset(align_of::<u128>()), 0);

        // SAFETY: Allocated above with the same count, nothing was written.
        unsafe {
            Global.deallocate(ptr, count);
        }
    }

    #[test]
    fn zero_sized_types_get_dangling_pointer() {
        let ptr: NonNull<()> = Global.allocate(ONE).unwrap();
        assert_eq!(ptr, NonNull::dangling());

        // SAFETY: Allocated above with the same count.
        unsafe {
            Global.deallocate(ptr, ONE);
        }
    }

    #[test]
    fn impossible_layout_is_error() {
        let count = NonZero::new(usize::MAX).unwrap();
        let result: Result<NonNull<u64>> = Global.allocate(count);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
    }
}
