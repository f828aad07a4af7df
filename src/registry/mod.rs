//! Thread-safe registry of raw object pointers.
//!
//! Tracks the live instances of a type: constructors [`insert`] their
//! address, destructors [`erase`] it, and [`for_each`] visits whatever is
//! alive right now (say, to flush every open connection at shutdown).
//!
//! [`insert`]: PointerRegistry::insert
//! [`erase`]: PointerRegistry::erase
//! [`for_each`]: PointerRegistry::for_each
//!
//! # Locking scheme
//!
//! Insert and erase run under the *shared* side of a [`SpinRwLock`] even
//! though they write: what the lock protects is the capacity, not the
//! slots. Shared holders may touch distinct slots concurrently (each
//! index is handed to exactly one caller at a time by the free stack, and
//! the slots are atomics), while growth and iteration take the exclusive
//! side because they touch everything. This makes the hot paths scale
//! with the reader fast path of the lock: one RMW in, one RMW out, plus
//! one lock-free stack operation.
//!
//! Growth demonstrates the upgrade protocol end to end: the grower
//! upgrades its shared lock, loses to a concurrent grower now and then,
//! recovers through `upgrade_yield`, and downgrades back once the storage
//! has been rebuilt.

mod index_stack;

use smallvec::SmallVec;
use std::cell::UnsafeCell;
use std::ptr::null_mut;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::sync::SpinRwLock;
use index_stack::IndexStack;

/// Storage grows by this factor; chosen so the amortized relocation cost
/// per insert stays O(1) without doubling the waste of 2x growth.
const GROW_FACTOR: f32 = 1.414;

struct Inner<T> {
    size: u32,
    storage: Vec<AtomicPtr<T>>,
    free: IndexStack,
}

impl<T> Inner<T> {
    /// Grows to at least `requested` slots, or by `GROW_FACTOR` when no
    /// explicit size is asked for. Requires exclusive access.
    fn grow(&mut self, requested: u32) {
        let old = self.size;
        let mut new = requested.max((GROW_FACTOR * old as f32) as u32);
        if new == old {
            new += 1;
        }
        self.size = new;
        self.storage.resize_with(new as usize, || AtomicPtr::new(null_mut()));

        // Rebuild the free stack: fresh indices at the bottom (lowest
        // popping first), previously free ones restored above them in
        // their old order.
        let mut recycled: Vec<u32> = Vec::new();
        while let Some(index) = self.free.pop() {
            recycled.push(index);
        }
        self.free.grow_to(new);
        for index in (old..new).rev() {
            self.free.push(index);
        }
        for index in recycled.into_iter().rev() {
            self.free.push(index);
        }
    }
}

/// A set of raw pointers with O(1) insert and erase by index.
///
/// The registry stores the pointers without owning what they point to;
/// keeping an inserted pointer valid until its `erase` is entirely the
/// caller's business. [`get`](PointerRegistry::get) likewise returns a
/// raw pointer that is only as alive as the caller's own bookkeeping
/// says.
///
/// See the [module docs](self) for the locking scheme.
pub struct PointerRegistry<T> {
    lock: SpinRwLock,
    inner: UnsafeCell<Inner<T>>,
}

// SAFETY: the registry stores addresses, it never dereferences them; all
// internal state is either atomic or guarded by the lock protocol above.
unsafe impl<T> Send for PointerRegistry<T> {}
// SAFETY: as for Send; shared slot writes go to distinct atomic slots.
unsafe impl<T> Sync for PointerRegistry<T> {}

impl<T> PointerRegistry<T> {
    /// Creates a registry with room for `initial_capacity` pointers.
    #[must_use]
    pub fn new(initial_capacity: u32) -> Self {
        let mut inner = Inner {
            size: 0,
            storage: Vec::new(),
            free: IndexStack::with_capacity(initial_capacity),
        };
        inner.grow(initial_capacity.max(1));
        Self {
            lock: SpinRwLock::new(),
            inner: UnsafeCell::new(inner),
        }
    }

    /// Stores `value` and returns the index to erase it by.
    ///
    /// Grows the storage when no slot is free; every other call is a
    /// shared-lock fast path around one stack pop and one slot store.
    pub fn insert(&self, value: *mut T) -> u32 {
        self.lock.lock_shared();
        let index = loop {
            // SAFETY: shared lock held; shared holders only use the
            // atomic parts of Inner.
            let popped = unsafe { (*self.inner.get()).free.pop() };
            match popped {
                Some(index) => break index,
                None => {
                    self.lock.unlock_shared();
                    self.grow_and_relock(0);
                }
            }
        };
        // SAFETY: as above; the popped index is ours alone until pushed
        // back.
        unsafe { (&(*self.inner.get()).storage)[index as usize].store(value, Ordering::Relaxed) };
        self.lock.unlock_shared();
        index
    }

    /// Releases the slot at `index`, obtained from [`insert`](Self::insert).
    ///
    /// The slot is not cleared; it is free by virtue of being on the free
    /// stack again. Erasing an index twice corrupts the registry.
    pub fn erase(&self, index: u32) {
        self.lock.lock_shared();
        // SAFETY: shared lock held; the free stack is lock-free.
        unsafe { (*self.inner.get()).free.push(index) };
        self.lock.unlock_shared();
    }

    /// Returns the pointer stored at `index`.
    ///
    /// The caller must know the index is live (inserted and not yet
    /// erased); a stale index yields a stale pointer.
    #[must_use]
    pub fn get(&self, index: u32) -> *mut T {
        self.lock.lock_shared();
        // SAFETY: shared lock held, so the storage vector is stable.
        let value = unsafe { (&(*self.inner.get()).storage)[index as usize].load(Ordering::Relaxed) };
        self.lock.unlock_shared();
        value
    }

    /// Current slot capacity.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.lock.lock_shared();
        // SAFETY: shared lock held.
        let size = unsafe { (*self.inner.get()).size };
        self.lock.unlock_shared();
        size
    }

    /// Calls `visit` with every live pointer.
    ///
    /// Runs under the exclusive lock: inserts, erases, and other
    /// `for_each` calls wait until it finishes. Slots freed by earlier
    /// erases are written to null on the way, then their indices go back
    /// on the free stack untouched and unsorted.
    pub fn for_each(&self, mut visit: impl FnMut(*mut T)) {
        self.lock.lock_exclusive();
        // SAFETY: exclusive lock held, sole access to Inner.
        let inner = unsafe { &mut *self.inner.get() };

        let mut freed: SmallVec<[u32; 16]> = SmallVec::new();
        while let Some(index) = inner.free.pop() {
            inner.storage[index as usize].store(null_mut(), Ordering::Relaxed);
            freed.push(index);
        }

        for slot in &inner.storage {
            let value = slot.load(Ordering::Relaxed);
            if !value.is_null() {
                visit(value);
            }
        }

        for &index in freed.iter().rev() {
            inner.free.push(index);
        }
        self.lock.unlock_exclusive();
    }

    /// Reports whether no pointer is currently stored.
    ///
    /// Expensive (drains and restores the whole free stack under the
    /// exclusive lock); meant for assertions in tests and shutdown paths.
    #[cfg(debug_assertions)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock.lock_exclusive();
        // SAFETY: exclusive lock held, sole access to Inner.
        let inner = unsafe { &mut *self.inner.get() };

        let mut drained: Vec<u32> = Vec::new();
        while let Some(index) = inner.free.pop() {
            drained.push(index);
        }
        let empty = drained.len() == inner.size as usize;
        for index in drained.into_iter().rev() {
            inner.free.push(index);
        }
        self.lock.unlock_exclusive();
        empty
    }

    /// Growth path of `insert`: take the lock back, upgrade it, grow, and
    /// return holding the shared lock again.
    fn grow_and_relock(&self, requested: u32) {
        loop {
            self.lock.lock_shared();
            if self.lock.try_upgrade().is_ok() {
                break;
            }
            // Another thread is growing; step aside until it finishes and
            // start over.
            self.lock.unlock_shared();
            self.lock.upgrade_yield();
        }
        // SAFETY: exclusive lock held, sole access to Inner.
        unsafe { (*self.inner.get()).grow(requested) };
        self.lock.downgrade();
    }
}

impl<T> std::fmt::Debug for PointerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PointerRegistry")
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}
