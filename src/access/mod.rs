//! Wrappers that put data behind scoped access guards.
//!
//! An [`Unlocked<T, P>`] owns a payload `T` and a locking policy `P`, and
//! only hands the payload out through guards that hold the right lock for
//! the access they grant. The name says what the wrapper is when you hold
//! one directly: not locked, and therefore not accessible.
//!
//! # Policies
//!
//! | Policy | Read guards | Write guards | Upgrade | Carry |
//! |--------|-------------|--------------|---------|-------|
//! | [`ReadWrite<M>`] | shared lock | exclusive lock | yes | yes |
//! | [`Primitive<M>`] | exclusive lock | exclusive lock | n/a | no |
//! | [`OneThread`] | borrow flag | borrow flag | n/a | no |
//!
//! `ReadWrite` is the full reader/writer discipline over any
//! [`RawRwLock`]. `Primitive` wraps a plain mutex for data that does not
//! benefit from reader parallelism; its read and write guards differ only
//! in the access they grant, not in the lock they take. `OneThread` is for
//! data that never leaves one thread: no locking, a debug-time check that
//! the thread stays the same, and runtime borrow tracking in place of a
//! lock.
//!
//! # Guard conversions (`ReadWrite`)
//!
//! - [`ReadGuard::try_upgrade`] converts read to write access without
//!   releasing in between; it can fail with
//!   [`UpgradeConflict`](crate::UpgradeConflict) and hands the read guard
//!   back untouched.
//! - [`WriteGuard::downgrade`] converts write to read access, also
//!   without releasing.
//! - [`Unlocked::carry`] starts a write section whose lock outlives the
//!   write guard as read access: see [`WriteToReadCarry`].
//!
//! # Example
//!
//! ```ignore
//! use warden::{ReadWrite, SpinRwLock, Unlocked};
//!
//! struct Config { limit: usize }
//! type SharedConfig = Unlocked<Config, ReadWrite<SpinRwLock>>;
//!
//! let config = SharedConfig::new(Config { limit: 8 });
//! {
//!     let mut w = config.write();
//!     w.limit = 16;
//! }
//! let r = config.read();
//! assert_eq!(r.limit, 16);
//! ```

mod guards;
mod view;

pub use guards::{
    CarryWriteGuard, ConstReadGuard, OneThreadGuard, OneThreadGuardMut, PrimitiveGuard,
    PrimitiveReadGuard, ReadGuard, WriteGuard, WriteToReadCarry,
};
pub use view::UnlockedView;

use std::cell::{Cell, UnsafeCell};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

use crate::sync::{RawLock, RawRwLock, SpinRwLock};
use crate::thread_id;

// ── Live-guard accounting ─────────────────────────────────────────────────

/// Debug-build count of guards alive on a wrapper. The wrapper asserts it
/// is zero on drop, catching guards kept alive through raw pointers or
/// leaked scopes. In release builds this is a zero-sized no-op.
#[derive(Debug, Default)]
pub(crate) struct LiveCounter {
    #[cfg(debug_assertions)]
    count: std::sync::atomic::AtomicI32,
}

impl LiveCounter {
    pub(crate) const fn new() -> Self {
        Self {
            #[cfg(debug_assertions)]
            count: std::sync::atomic::AtomicI32::new(0),
        }
    }

    #[inline]
    pub(crate) fn acquire(&self) {
        #[cfg(debug_assertions)]
        self.count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn release(&self) {
        #[cfg(debug_assertions)]
        self.count
            .fetch_sub(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub(crate) fn assert_idle(&self) {
        #[cfg(debug_assertions)]
        assert_eq!(
            self.count.load(std::sync::atomic::Ordering::Relaxed),
            0,
            "wrapper destroyed while access guards are alive"
        );
    }
}

// ── Policies ──────────────────────────────────────────────────────────────

/// Marker for the locking policies accepted by [`Unlocked`].
pub trait Policy: Default {}

/// Reader/writer locking over any [`RawRwLock`].
#[derive(Debug, Default)]
pub struct ReadWrite<M = SpinRwLock> {
    lock: M,
}

impl<M: RawRwLock + Default> Policy for ReadWrite<M> {}

/// Exclusive locking over any [`RawLock`].
#[derive(Debug, Default)]
pub struct Primitive<M = crate::sync::CheckedMutex> {
    lock: M,
}

impl<M: RawLock + Default> Policy for Primitive<M> {}

/// No locking; the wrapper must stay on one thread.
///
/// The wrapper is `Send` but not `Sync`. Access is checked two ways: a
/// debug-build assertion that every access comes from the thread that
/// touched the wrapper first, and always-on borrow tracking so that
/// overlapping `access`/`access_mut` calls panic instead of aliasing.
#[derive(Debug, Default)]
pub struct OneThread {
    owner: AtomicU64,
    /// Positive: shared borrows. -1: one exclusive borrow.
    borrows: Cell<isize>,
}

impl Policy for OneThread {}

// ── The wrapper ───────────────────────────────────────────────────────────

/// A payload bundled with the lock that protects it.
///
/// Created with [`Unlocked::new`]; accessed through the guard constructors
/// of the chosen policy (see the [module docs](self)). The payload can
/// only be reached through a guard, so forgetting to lock is a compile
/// error rather than a race.
pub struct Unlocked<T, P = ReadWrite<SpinRwLock>> {
    policy: P,
    live: LiveCounter,
    payload: UnsafeCell<T>,
}

// SAFETY: the wrapper moves between threads exactly when the payload and
// policy may.
unsafe impl<T: Send, P: Send> Send for Unlocked<T, P> {}
// SAFETY: shared wrapper access hands out &T to concurrent readers (T:
// Sync) and &mut T to one writer at a time, possibly on another thread
// (T: Send). The policy is shared as well.
unsafe impl<T: Send + Sync, P: Sync> Sync for Unlocked<T, P> {}

impl<T, P: Policy> Unlocked<T, P> {
    /// Wraps `payload` with a default-constructed lock.
    #[must_use]
    pub fn new(payload: T) -> Self {
        Self {
            policy: P::default(),
            live: LiveCounter::new(),
            payload: UnsafeCell::new(payload),
        }
    }
}

impl<T, P> Unlocked<T, P> {
    /// Consumes the wrapper and returns the payload.
    #[must_use]
    pub fn into_inner(self) -> T {
        self.live.assert_idle();
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the payload is moved out
        // exactly once and the drop below runs on the policy alone.
        let payload = unsafe { std::ptr::read(this.payload.get()) };
        // SAFETY: policy is dropped exactly once, here.
        unsafe { std::ptr::drop_in_place(&mut this.policy) };
        payload
    }

    /// Returns the payload without locking; `&mut self` already proves
    /// exclusive access.
    pub fn get_mut(&mut self) -> &mut T {
        self.payload.get_mut()
    }

    fn payload_ptr(&self) -> NonNull<T> {
        // SAFETY: UnsafeCell::get never returns null.
        unsafe { NonNull::new_unchecked(self.payload.get()) }
    }
}

impl<T: Default, P: Policy> Default for Unlocked<T, P> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, P> Drop for Unlocked<T, P> {
    fn drop(&mut self) {
        // Join every thread that might still hold a guard before letting
        // the wrapper go.
        self.live.assert_idle();
    }
}

impl<T, P> std::fmt::Debug for Unlocked<T, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unlocked").finish_non_exhaustive()
    }
}

// ── ReadWrite policy surface ──────────────────────────────────────────────

impl<T, M: RawRwLock> Unlocked<T, ReadWrite<M>> {
    /// Wraps `payload` with a caller-supplied lock instance.
    #[must_use]
    pub fn with_lock(payload: T, lock: M) -> Self {
        Self {
            policy: ReadWrite { lock },
            live: LiveCounter::new(),
            payload: UnsafeCell::new(payload),
        }
    }

    pub(crate) fn raw(&self) -> &M {
        &self.policy.lock
    }

    pub(crate) fn live(&self) -> &LiveCounter {
        &self.live
    }

    /// Acquires read access that can never be upgraded.
    ///
    /// Prefer this in interfaces that only ever read: it documents the
    /// intent and cannot throw the caller into the upgrade retry protocol.
    #[must_use]
    pub fn const_read(&self) -> ConstReadGuard<'_, T, M> {
        self.raw().lock_shared();
        self.live.acquire();
        guards::const_read_parts(self.payload_ptr(), self.raw(), &self.live)
    }

    /// Acquires read access, upgradable via [`ReadGuard::try_upgrade`].
    #[must_use]
    pub fn read(&self) -> ReadGuard<'_, T, M> {
        self.raw().lock_shared();
        self.live.acquire();
        guards::read_parts(self.payload_ptr(), self.raw(), &self.live)
    }

    /// Acquires write access.
    #[must_use]
    pub fn write(&self) -> WriteGuard<'_, T, M> {
        self.raw().lock_exclusive();
        self.live.acquire();
        guards::write_parts(self.payload_ptr(), self.raw(), &self.live)
    }

    /// Starts a write-to-read carry; no lock is taken yet.
    ///
    /// See [`WriteToReadCarry`] for the sequencing rules.
    #[must_use]
    pub fn carry(&self) -> WriteToReadCarry<'_, T, M> {
        self.live.acquire();
        guards::carry_parts(self)
    }

    /// Blocks until the currently winning upgrader has finished.
    ///
    /// Call after dropping a [`ReadGuard`] whose
    /// [`try_upgrade`](ReadGuard::try_upgrade) failed, before retrying.
    pub fn upgrade_yield(&self) {
        self.raw().upgrade_yield();
    }

    /// Creates a non-owning view of the payload projected to `B` (a field
    /// or a trait object), sharing this wrapper's lock.
    ///
    /// The projection runs once, under a briefly held write lock, and must
    /// be pure: always the same `B` for the same `T`.
    #[must_use]
    pub fn view<B: ?Sized>(&self, project: fn(&mut T) -> &mut B) -> UnlockedView<'_, B, M> {
        self.raw().lock_exclusive();
        // SAFETY: the exclusive lock is held, so no other reference to the
        // payload is live while the projection borrows it.
        let data = NonNull::from(project(unsafe { &mut *self.payload.get() }));
        self.raw().unlock_exclusive();
        view::view_parts(data, self.raw(), &self.live)
    }
}

// ── Primitive policy surface ──────────────────────────────────────────────

impl<T, M: RawLock> Unlocked<T, Primitive<M>> {
    /// Wraps `payload` with a caller-supplied mutex instance.
    #[must_use]
    pub fn with_mutex(payload: T, lock: M) -> Self {
        Self {
            policy: Primitive { lock },
            live: LiveCounter::new(),
            payload: UnsafeCell::new(payload),
        }
    }

    /// Acquires the mutex for read and write access.
    #[must_use]
    pub fn lock(&self) -> PrimitiveGuard<'_, T, M> {
        self.policy.lock.lock();
        self.live.acquire();
        guards::primitive_parts(self.payload_ptr(), &self.policy.lock, &self.live)
    }

    /// Acquires the mutex for read access only.
    ///
    /// The same exclusive mutex is taken; only the access granted differs.
    /// Convert to write access with [`PrimitiveReadGuard::into_write`].
    #[must_use]
    pub fn lock_read(&self) -> PrimitiveReadGuard<'_, T, M> {
        self.policy.lock.lock();
        self.live.acquire();
        guards::primitive_read_parts(self.payload_ptr(), &self.policy.lock, &self.live)
    }
}

// ── OneThread policy surface ──────────────────────────────────────────────

impl<T> Unlocked<T, OneThread> {
    /// Grants read access; panics if an exclusive borrow is live.
    ///
    /// In debug builds, also asserts that the wrapper has only ever been
    /// accessed from one thread.
    #[must_use]
    pub fn access(&self) -> OneThreadGuard<'_, T> {
        debug_assert!(
            thread_id::is_single_threaded(&self.policy.owner),
            "one-thread wrapper accessed from a second thread"
        );
        let borrows = self.policy.borrows.get();
        assert!(
            borrows >= 0,
            "shared access while an exclusive borrow is live"
        );
        self.policy.borrows.set(borrows + 1);
        self.live.acquire();
        guards::one_thread_parts(self.payload_ptr(), &self.policy.borrows, &self.live)
    }

    /// Grants write access; panics if any borrow is live.
    #[must_use]
    pub fn access_mut(&self) -> OneThreadGuardMut<'_, T> {
        debug_assert!(
            thread_id::is_single_threaded(&self.policy.owner),
            "one-thread wrapper accessed from a second thread"
        );
        assert_eq!(
            self.policy.borrows.get(),
            0,
            "exclusive access while a borrow is live"
        );
        self.policy.borrows.set(-1);
        self.live.acquire();
        guards::one_thread_mut_parts(self.payload_ptr(), &self.policy.borrows, &self.live)
    }
}

#[cfg(test)]
mod tests;
