use std::any::type_name;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::{DropPolicy, Error, Loan, Result, SlotAllocator, SlotStorage, Wait};

/// The shared heart of a pool: all storage and bookkeeping for one pool identity.
///
/// This is a monitor - every operation takes the single mutex for its duration and the condvar
/// is signaled whenever a free object appears. It is owned via `Arc` by every
/// [`LendingPool`][crate::LendingPool] handle and referenced via `Weak` by every [`Loan`].
pub(crate) struct PoolCore<T, A: SlotAllocator<T>> {
    state: Mutex<CoreState<T, A>>,

    /// Signaled (one waiter at a time) whenever an object is added to the free stack.
    available: Condvar,
}

/// Bookkeeping of a pool. Every slot pointer lives in exactly one place: `raw_slots`,
/// `free_slots` or a single live [`Loan`].
///
/// Invariants:
///
/// * `capacity >= managed_count >= free_slots.len()`
/// * `capacity - managed_count == raw_slots.len()`
struct CoreState<T, A: SlotAllocator<T>> {
    /// Number of constructed values we are responsible for, whether free or on loan.
    managed_count: usize,

    /// Number of slots allocated, whether they hold a value or not.
    capacity: usize,

    /// Allocated slots that do not contain a value.
    raw_slots: Vec<NonNull<T>>,

    /// Slots containing a value that is not on loan. Used as a stack.
    free_slots: Vec<NonNull<T>>,

    storage: SlotStorage<A>,

    drop_policy: DropPolicy,
}

impl<T, A: SlotAllocator<T>> PoolCore<T, A> {
    /// Creates an empty pool with `capacity` raw slots allocated up front.
    pub(crate) fn new(
        storage: SlotStorage<A>,
        drop_policy: DropPolicy,
        capacity: usize,
    ) -> Result<Self> {
        let raw_slots = storage.allocate_slots(capacity)?;

        Ok(Self::from_state(CoreState {
            managed_count: 0,
            capacity,
            raw_slots,
            free_slots: Vec::with_capacity(capacity),
            storage,
            drop_policy,
        }))
    }

    /// Creates a pool with `capacity` slots, of which the first `count` are filled with free
    /// values created by `make`.
    pub(crate) fn with_values(
        storage: SlotStorage<A>,
        drop_policy: DropPolicy,
        capacity: usize,
        count: usize,
        mut make: impl FnMut() -> T,
    ) -> Result<Self> {
        assert!(
            capacity >= count,
            "pool of {} must have room for its {count} initial values",
            type_name::<T>()
        );

        let mut state = CoreState {
            managed_count: 0,
            capacity: 0,
            raw_slots: Vec::new(),
            free_slots: Vec::with_capacity(capacity),
            storage,
            drop_policy,
        };

        state.grow_to(capacity)?;

        for _ in 0..count {
            // If `make` panics, the state drop cleans up whatever we have built so far.
            state.insert_free(make());
        }

        Ok(Self::from_state(state))
    }

    fn from_state(state: CoreState<T, A>) -> Self {
        Self {
            state: Mutex::new(state),
            available: Condvar::new(),
        }
    }

    /// Takes a free object if there is one, otherwise returns an empty loan.
    pub(crate) fn acquire(self: &Arc<Self>) -> Loan<T, A> {
        let mut state = self.state.lock();
        let slot = state.free_slots.pop();

        match slot {
            Some(slot) => self.lend(&state, slot),
            None => Loan::none(),
        }
    }

    /// Takes a free object, waiting for one to appear if necessary.
    ///
    /// Returns an empty loan if the wait ran out before an object became available.
    pub(crate) fn acquire_wait(self: &Arc<Self>, wait: Wait) -> Loan<T, A> {
        let mut state = self.state.lock();

        match wait {
            Wait::Indefinitely => {
                self.available
                    .wait_while(&mut state, |state| state.free_slots.is_empty());
            }
            Wait::For(timeout) => {
                // The result does not matter - an object may have arrived at the last moment,
                // so we simply look at the free stack either way.
                _ = self
                    .available
                    .wait_while_for(&mut state, |state| state.free_slots.is_empty(), timeout);
            }
        }

        let slot = state.free_slots.pop();

        let loan = if let Some(slot) = slot {
            self.lend(&state, slot)
        } else {
            trace!(
                value_type = type_name::<T>(),
                ?wait,
                "timed out waiting for a free object"
            );
            Loan::none()
        };

        drop(state);

        // Notifications may have been coalesced while we were waking up, so we pass one along
        // in case there are more free objects and more waiters.
        self.available.notify_one();

        loan
    }

    /// Takes a free object if there is one, otherwise creates a new one with `make` and lends it
    /// out directly. `make` is only called in the latter case.
    pub(crate) fn allocate_with(self: &Arc<Self>, make: impl FnOnce() -> T) -> Result<Loan<T, A>> {
        {
            let mut state = self.state.lock();
            let slot = state.free_slots.pop();

            if let Some(slot) = slot {
                return Ok(self.lend(&state, slot));
            }
        }

        // User code runs outside the lock, so it may even use the pool itself.
        let value = make();

        let mut state = self.state.lock();
        let slot: NonNull<T> = state.storage.allocate_slot()?;

        // SAFETY: The slot was just allocated for a `T` and is not referenced by anything else.
        unsafe {
            slot.as_ptr().write(value);
        }

        // The fresh slot never passes through the raw stack but we still count it so the
        // relation between capacity, managed count and raw slots is preserved.
        state.capacity = state
            .capacity
            .checked_add(1)
            .expect("capacity cannot overflow because every slot is a real allocation");
        state.managed_count = state
            .managed_count
            .checked_add(1)
            .expect("managed count cannot overflow because every value is a real allocation");

        Ok(self.lend(&state, slot))
    }

    /// Adds a value to the free stack, growing storage if there is no raw slot left.
    pub(crate) fn push(&self, value: T) -> Result<()> {
        {
            let mut state = self.state.lock();

            state.ensure_raw_slot()?;
            state.insert_free(value);
        }

        self.available.notify_one();

        Ok(())
    }

    /// Allocates raw slots until the capacity is at least `new_capacity`.
    pub(crate) fn reserve(&self, new_capacity: usize) -> Result<()> {
        self.state.lock().grow_to(new_capacity)
    }

    /// Grows or shrinks the set of free objects to exactly `count`. Objects on loan are not
    /// affected.
    ///
    /// New objects are built by `make` without holding the lock, so `make` may use the pool and a
    /// panic in `make` leaves the pool untouched. Other threads may take or return objects while
    /// we build, in which case we look again and build (or drop) the difference.
    pub(crate) fn resize_with(&self, count: usize, mut make: impl FnMut() -> T) -> Result<()> {
        let mut built: Vec<T> = Vec::new();

        loop {
            let missing = {
                let mut state = self.state.lock();
                let free = state.free_slots.len();

                match count.checked_sub(free).filter(|missing| *missing > 0) {
                    None => {
                        let excess = free
                            .checked_sub(count)
                            .expect("guarded by the growth branch below");

                        state.drop_free(excess);

                        return Ok(());
                    }
                    Some(missing) if built.len() >= missing => {
                        state.ensure_raw_slots(missing)?;

                        for value in built.drain(..missing) {
                            state.insert_free(value);
                        }

                        drop(state);

                        // Waiters pass the wakeup along after taking an object, so one is enough.
                        self.available.notify_one();

                        // Whatever we built too much of is dropped here, outside the lock.
                        return Ok(());
                    }
                    Some(missing) => missing,
                }
            };

            let shortfall = missing
                .checked_sub(built.len())
                .expect("guarded by the insertion branch above");

            built.reserve(shortfall);

            for _ in 0..shortfall {
                built.push(make());
            }
        }
    }

    /// Puts an object that was on loan back on the free stack.
    pub(crate) fn return_slot(&self, slot: NonNull<T>) {
        {
            let mut state = self.state.lock();
            state.free_slots.push(slot);

            debug_assert!(
                state.free_slots.len() <= state.managed_count,
                "more free objects than managed objects in pool of {}",
                type_name::<T>()
            );
        }

        self.available.notify_one();
    }

    /// Exchanges the contents of two pools.
    ///
    /// Loans always come home to the core that issued them, so contents may only move while
    /// neither pool has anything on loan.
    pub(crate) fn swap(&self, other: &Self) -> Result<()> {
        if ptr::eq(self, other) {
            return Ok(());
        }

        // Lock in address order so two concurrent swaps of the same pair cannot deadlock.
        let (first, second) = if ptr::from_ref(self) < ptr::from_ref(other) {
            (self, other)
        } else {
            (other, self)
        };

        {
            let mut first_state = first.state.lock();
            let mut second_state = second.state.lock();

            if first_state.borrowed_count() > 0 || second_state.borrowed_count() > 0 {
                return Err(Error::SwapWhileLent);
            }

            first_state.swap_contents(&mut second_state);

            debug!(
                value_type = type_name::<T>(),
                first_len = first_state.free_slots.len(),
                second_len = second_state.free_slots.len(),
                "swapped pool contents"
            );
        }

        first.available.notify_one();
        second.available.notify_one();

        Ok(())
    }

    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().free_slots.len()
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.state.lock().capacity
    }

    #[must_use]
    pub(crate) fn managed_count(&self) -> usize {
        self.state.lock().managed_count
    }

    #[must_use]
    pub(crate) fn borrowed_count(&self) -> usize {
        self.state.lock().borrowed_count()
    }

    #[must_use]
    pub(crate) fn drop_policy(&self) -> DropPolicy {
        self.state.lock().drop_policy
    }

    #[must_use]
    pub(crate) fn allocator(&self) -> A
    where
        A: Clone,
    {
        self.state.lock().storage.allocator().clone()
    }

    fn lend(self: &Arc<Self>, state: &CoreState<T, A>, slot: NonNull<T>) -> Loan<T, A> {
        // SAFETY: The slot was just taken off the free stack (or freshly constructed), so it
        // contains a live value and no other loan refers to it.
        unsafe { Loan::new(slot, Arc::downgrade(self), state.storage.clone()) }
    }
}

impl<T, A: SlotAllocator<T>> CoreState<T, A> {
    #[must_use]
    fn borrowed_count(&self) -> usize {
        self.managed_count
            .checked_sub(self.free_slots.len())
            .expect("free objects are a subset of managed objects")
    }

    /// Allocates raw slots until the capacity is at least `new_capacity`. No-op if it already is.
    fn grow_to(&mut self, new_capacity: usize) -> Result<()> {
        let Some(added) = new_capacity
            .checked_sub(self.capacity)
            .filter(|added| *added > 0)
        else {
            return Ok(());
        };

        // Allocate before touching any bookkeeping, so a failure leaves us unchanged.
        let slots = self.storage.allocate_slots(added)?;

        trace!(
            value_type = type_name::<T>(),
            old_capacity = self.capacity,
            new_capacity,
            "growing pool storage"
        );

        self.raw_slots.extend(slots);
        self.capacity = new_capacity;

        Ok(())
    }

    /// Makes sure there is a raw slot to construct the next value in, doubling the capacity
    /// if there is none.
    fn ensure_raw_slot(&mut self) -> Result<()> {
        if !self.raw_slots.is_empty() {
            return Ok(());
        }

        let doubled = self
            .capacity
            .checked_mul(2)
            .expect("capacity cannot overflow because every slot is a real allocation")
            .max(1);

        self.grow_to(doubled)
    }

    /// Makes sure there are at least `needed` raw slots, growing by exactly the shortfall.
    fn ensure_raw_slots(&mut self, needed: usize) -> Result<()> {
        let Some(shortfall) = needed
            .checked_sub(self.raw_slots.len())
            .filter(|shortfall| *shortfall > 0)
        else {
            return Ok(());
        };

        let new_capacity = self
            .capacity
            .checked_add(shortfall)
            .expect("capacity cannot overflow because every slot is a real allocation");

        self.grow_to(new_capacity)
    }

    /// Moves `value` into a raw slot and pushes that slot onto the free stack.
    ///
    /// # Panics
    ///
    /// Panics if there is no raw slot. Callers ensure one exists first.
    fn insert_free(&mut self, value: T) {
        let slot = self
            .raw_slots
            .pop()
            .expect("caller must ensure a raw slot is available before inserting");

        // SAFETY: Raw slots are allocated for a `T`, contain no value and are referenced by
        // nothing but the raw stack, from which we just removed this one.
        unsafe {
            slot.as_ptr().write(value);
        }

        self.free_slots.push(slot);
        self.managed_count = self
            .managed_count
            .checked_add(1)
            .expect("managed count cannot exceed capacity, which is bounded by real allocations");
    }

    /// Drops `count` free values (most recently freed first) and keeps their slots as raw storage.
    fn drop_free(&mut self, count: usize) {
        for _ in 0..count {
            let slot = self
                .free_slots
                .pop()
                .expect("caller must not drop more free values than exist");

            // The slot counts as raw before the value is dropped, so a panicking drop cannot
            // lead to a double drop later.
            self.raw_slots.push(slot);
            self.managed_count = self
                .managed_count
                .checked_sub(1)
                .expect("every free value is also a managed value");

            // SAFETY: Free slots contain a live value that nothing else refers to.
            unsafe {
                slot.as_ptr().drop_in_place();
            }
        }
    }

    fn swap_contents(&mut self, other: &mut Self) {
        // The drop policy is configuration of the pool identity, so it stays where it is.
        std::mem::swap(&mut self.managed_count, &mut other.managed_count);
        std::mem::swap(&mut self.capacity, &mut other.capacity);
        std::mem::swap(&mut self.raw_slots, &mut other.raw_slots);
        std::mem::swap(&mut self.free_slots, &mut other.free_slots);
        std::mem::swap(&mut self.storage, &mut other.storage);
    }
}

impl<T, A: SlotAllocator<T>> Drop for CoreState<T, A> {
    fn drop(&mut self) {
        let abandoned = self.borrowed_count();
        let free = self.free_slots.len();

        self.drop_free(free);

        let raw = self.raw_slots.len();

        for slot in self.raw_slots.drain(..) {
            // SAFETY: Raw slots hold no value and were allocated by our storage. Slots on loan
            // are not in this list, their loans release them.
            unsafe {
                self.storage.release(slot);
            }
        }

        debug!(
            value_type = type_name::<T>(),
            free, raw, abandoned, "pool storage torn down"
        );

        // We release the memory first and only then complain. If we are already panicking, we
        // do not panic again because that would obscure the original panic.
        if self.drop_policy == DropPolicy::MustNotAbandonLoans && !thread::panicking() {
            assert!(
                abandoned == 0,
                "pool of {} dropped with {abandoned} objects still on loan, which its drop policy forbids",
                type_name::<T>()
            );
        }
    }
}

// SAFETY: The raw pointers are owned storage, so moving the state between threads is as safe as
// moving the values (`T: Send`) and the allocator handle (`Arc<A>` needs `A: Send + Sync`).
unsafe impl<T: Send, A: SlotAllocator<T> + Send + Sync> Send for CoreState<T, A> {}

impl<T, A: SlotAllocator<T>> fmt::Debug for PoolCore<T, A> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();

        f.debug_struct("PoolCore")
            .field("value_type", &type_name::<T>())
            .field("len", &state.free_slots.len())
            .field("managed_count", &state.managed_count)
            .field("capacity", &state.capacity)
            .field("drop_policy", &state.drop_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};
    use std::rc::Rc;
    use std::time::Duration;

    use testing::with_watchdog;

    use super::*;
    use crate::Global;

    fn core_with(capacity: usize) -> Arc<PoolCore<u32, Global>> {
        Arc::new(PoolCore::new(SlotStorage::new(Global), DropPolicy::default(), capacity).unwrap())
    }

    fn assert_invariants<T, A: SlotAllocator<T>>(core: &PoolCore<T, A>) {
        let state = core.state.lock();

        assert!(state.capacity >= state.managed_count);
        assert!(state.managed_count >= state.free_slots.len());
        assert_eq!(state.capacity - state.managed_count, state.raw_slots.len());
    }

    #[test]
    fn new_core_has_only_raw_slots() {
        let core = core_with(4);

        assert_eq!(core.len(), 0);
        assert_eq!(core.capacity(), 4);
        assert_eq!(core.managed_count(), 0);
        assert_eq!(core.state.lock().raw_slots.len(), 4);
        assert_invariants(&core);
    }

    #[test]
    fn push_consumes_raw_slots_then_doubles() {
        let core = core_with(2);

        core.push(1).unwrap();
        core.push(2).unwrap();
        assert_eq!(core.capacity(), 2);
        assert_invariants(&core);

        core.push(3).unwrap();
        assert_eq!(core.capacity(), 4);
        assert_eq!(core.len(), 3);
        assert_invariants(&core);
    }

    #[test]
    fn zero_capacity_grows_to_one() {
        let core = core_with(0);

        core.push(1).unwrap();

        assert_eq!(core.capacity(), 1);
        assert_eq!(core.len(), 1);
        assert_invariants(&core);
    }

    #[test]
    fn free_stack_is_lifo() {
        let core = core_with(4);

        core.push(1).unwrap();
        core.push(2).unwrap();

        assert_eq!(*core.acquire(), 2);
    }

    #[test]
    fn allocate_counts_fresh_slot_in_capacity() {
        let core = core_with(0);

        let loan = core.allocate_with(|| 7).unwrap();
        assert_eq!(*loan, 7);
        assert_eq!(core.capacity(), 1);
        assert_eq!(core.managed_count(), 1);
        assert_eq!(core.borrowed_count(), 1);
        assert_invariants(&core);

        drop(loan);
        assert_eq!(core.len(), 1);
        assert_invariants(&core);
    }

    #[test]
    fn with_values_fills_exactly() {
        let core = PoolCore::with_values(
            SlotStorage::new(Global),
            DropPolicy::default(),
            5,
            3,
            || 9_u32,
        )
        .unwrap();

        assert_eq!(core.len(), 3);
        assert_eq!(core.capacity(), 5);
        assert_invariants(&core);
    }

    #[test]
    fn resize_shrink_keeps_slots_as_raw() {
        let core = core_with(0);
        core.resize_with(6, || 1).unwrap();
        assert_eq!(core.capacity(), 6);

        core.resize_with(2, || 1).unwrap();

        assert_eq!(core.len(), 2);
        assert_eq!(core.managed_count(), 2);
        assert_eq!(core.capacity(), 6);
        assert_invariants(&core);
    }

    #[test]
    fn resize_with_loans_counts_only_free_objects() {
        let core = core_with(0);
        core.resize_with(4, || 1).unwrap();

        let a = core.acquire();
        let b = core.acquire();

        core.resize_with(1, || 1).unwrap();
        assert_eq!(core.len(), 1);
        assert_eq!(core.borrowed_count(), 2);
        assert_eq!(core.managed_count(), 3);
        assert_invariants(&core);

        core.resize_with(5, || 1).unwrap();
        assert_eq!(core.len(), 5);
        assert_eq!(core.managed_count(), 7);
        assert_invariants(&core);

        drop(a);
        drop(b);
        assert_eq!(core.len(), 7);
        assert_invariants(&core);
    }

    #[test]
    fn resize_panicking_make_leaves_core_untouched() {
        let core = core_with(0);
        let mut calls = 0;

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            core.resize_with(3, || {
                calls += 1;
                assert!(calls < 2, "intentional panic on second object");
                1
            })
        }));

        assert!(result.is_err());
        assert_eq!(core.len(), 0);
        assert_eq!(core.managed_count(), 0);
        assert_invariants(&core);

        // The lock was not held while building, so the core is fully usable afterwards.
        core.resize_with(2, || 1).unwrap();
        assert_eq!(core.len(), 2);
        assert_invariants(&core);
    }

    #[test]
    fn resize_make_may_use_the_core() {
        let core = core_with(0);
        core.push(1).unwrap();

        let inner = Arc::clone(&core);
        core.resize_with(3, || u32::try_from(inner.len()).unwrap())
            .unwrap();

        assert_eq!(core.len(), 3);
        assert_invariants(&core);
    }

    #[cfg_attr(miri, ignore)]
    #[test]
    fn resize_wakes_waiter() {
        with_watchdog(|| {
            let core = core_with(0);

            let waiter = thread::spawn({
                let core = Arc::clone(&core);
                move || *core.acquire_wait(Wait::Indefinitely)
            });

            // Give the waiter a chance to start waiting. If it has not yet, it finds the object
            // without waiting, which is fine too.
            thread::sleep(Duration::from_millis(10));

            core.resize_with(2, || 5).unwrap();

            assert_eq!(waiter.join().unwrap(), 5);
            assert_eq!(core.len(), 2);
            assert_invariants(&core);
        });
    }

    #[test]
    fn teardown_drops_free_values() {
        struct Tracked(Rc<Cell<usize>>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.set(self.0.get() + 1);
            }
        }

        let dropped = Rc::new(Cell::new(0));

        {
            let core = PoolCore::with_values(
                SlotStorage::new(Global),
                DropPolicy::default(),
                3,
                3,
                || Tracked(Rc::clone(&dropped)),
            )
            .unwrap();

            assert_eq!(core.len(), 3);
        }

        assert_eq!(dropped.get(), 3);
    }

    #[test]
    #[should_panic(expected = "still on loan")]
    fn must_not_abandon_loans_panics_on_teardown() {
        let core = Arc::new(
            PoolCore::with_values(
                SlotStorage::new(Global),
                DropPolicy::MustNotAbandonLoans,
                1,
                1,
                || 1_u32,
            )
            .unwrap(),
        );

        let loan = core.acquire();
        drop(core);

        // Keep the loan alive past the teardown.
        drop(loan);
    }

    #[test]
    fn swap_with_self_is_noop() {
        let core = core_with(4);
        core.push(1).unwrap();

        core.swap(&core).unwrap();

        assert_eq!(core.len(), 1);
    }
}
