use std::fmt;
use std::num::NonZero;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::{Result, SlotAllocator};

/// Every slot holds exactly one value and is allocated separately, so any single slot can be
/// released on its own - including by a loan that outlives its pool.
const SLOT_COUNT: NonZero<usize> = NonZero::<usize>::MIN;

/// Adapter between the pool and its [`SlotAllocator`]. Hands out raw, uninitialized storage
/// for one value at a time and takes it back.
///
/// There is no construction or destruction logic here - the caller decides what lives in a slot.
///
/// Clones share the same allocator instance.
pub(crate) struct SlotStorage<A> {
    allocator: Arc<A>,
}

impl<A> SlotStorage<A> {
    pub(crate) fn new(allocator: A) -> Self {
        Self {
            allocator: Arc::new(allocator),
        }
    }

    pub(crate) fn allocator(&self) -> &A {
        &self.allocator
    }

    /// Allocates `count` raw slots.
    ///
    /// Either all slots are allocated or none are: if the allocator fails partway, the slots
    /// obtained so far are released before the error is returned.
    pub(crate) fn allocate_slots<T>(&self, count: usize) -> Result<Vec<NonNull<T>>>
    where
        A: SlotAllocator<T>,
    {
        let mut slots = Vec::with_capacity(count);

        for _ in 0..count {
            match SlotAllocator::<T>::allocate(&*self.allocator, SLOT_COUNT) {
                Ok(slot) => slots.push(slot),
                Err(error) => {
                    for slot in slots {
                        // SAFETY: We just allocated these and nothing was written to them.
                        unsafe {
                            self.release(slot);
                        }
                    }

                    return Err(error);
                }
            }
        }

        Ok(slots)
    }

    /// Allocates a single raw slot.
    pub(crate) fn allocate_slot<T>(&self) -> Result<NonNull<T>>
    where
        A: SlotAllocator<T>,
    {
        SlotAllocator::<T>::allocate(&*self.allocator, SLOT_COUNT)
    }

    /// Releases a raw slot back to the allocator.
    ///
    /// # Safety
    ///
    /// The slot must have been allocated by this storage (or a clone of it), must not have been
    /// released yet and must not contain a live value.
    pub(crate) unsafe fn release<T>(&self, slot: NonNull<T>)
    where
        A: SlotAllocator<T>,
    {
        // SAFETY: Forwarding the caller's guarantees; every slot is allocated with SLOT_COUNT.
        unsafe {
            self.allocator.deallocate(slot, SLOT_COUNT);
        }
    }
}

impl<A> Clone for SlotStorage<A> {
    fn clone(&self) -> Self {
        Self {
            allocator: Arc::clone(&self.allocator),
        }
    }
}

impl<A: fmt::Debug> fmt::Debug for SlotStorage<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotStorage")
            .field("allocator", &self.allocator)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{Error, Global};

    /// Fails every allocation after the first `budget` ones and counts live allocations.
    #[derive(Debug)]
    struct Budgeted {
        budget: AtomicUsize,
        live: AtomicUsize,
    }

    impl Budgeted {
        fn new(budget: usize) -> Self {
            Self {
                budget: AtomicUsize::new(budget),
                live: AtomicUsize::new(0),
            }
        }
    }

    // SAFETY: Forwards to `Global` for the allocations it permits.
    unsafe impl<T> SlotAllocator<T> for Budgeted {
        fn allocate(&self, count: NonZero<usize>) -> Result<NonNull<T>> {
            if self
                .budget
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| b.checked_sub(1))
                .is_err()
            {
                return Err(Error::AllocationFailed {
                    layout: std::alloc::Layout::new::<T>(),
                });
            }

            self.live.fetch_add(1, Ordering::Relaxed);
            SlotAllocator::<T>::allocate(&Global, count)
        }

        unsafe fn deallocate(&self, ptr: NonNull<T>, count: NonZero<usize>) {
            self.live.fetch_sub(1, Ordering::Relaxed);

            // SAFETY: Forwarding the caller's guarantees.
            unsafe { SlotAllocator::<T>::deallocate(&Global, ptr, count) };
        }
    }

    #[test]
    fn allocate_and_release_slots() {
        let storage = SlotStorage::new(Budgeted::new(10));

        let slots = storage.allocate_slots::<u64>(3).unwrap();
        assert_eq!(slots.len(), 3);
        assert_eq!(storage.allocator().live.load(Ordering::Relaxed), 3);

        for slot in slots {
            // SAFETY: Allocated above, never written.
            unsafe {
                storage.release(slot);
            }
        }

        assert_eq!(storage.allocator().live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn partial_failure_releases_everything() {
        let storage = SlotStorage::new(Budgeted::new(2));

        let result = storage.allocate_slots::<u64>(5);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        assert_eq!(storage.allocator().live.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn zero_slots_is_noop() {
        let storage = SlotStorage::new(Budgeted::new(0));

        let slots = storage.allocate_slots::<u64>(0).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn clones_share_allocator() {
        let storage = SlotStorage::new(Budgeted::new(1));
        let clone = storage.clone();

        let slot = clone.allocate_slot::<u64>().unwrap();
        assert_eq!(storage.allocator().live.load(Ordering::Relaxed), 1);

        // SAFETY: Allocated above by a clone of this storage, never written.
        unsafe {
            storage.release(slot);
        }

        assert_eq!(clone.allocator().live.load(Ordering::Relaxed), 0);
    }
}
