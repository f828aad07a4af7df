//! The access guards handed out by [`Unlocked`].
//!
//! Every guard owns one acquired lock (or borrow) for its lifetime and
//! releases it on drop. Guards are move-only; conversions that keep the
//! lock held (`try_upgrade`, `downgrade`, `into_read`, `into_write`)
//! consume the source guard and hand the acquisition to the result, so a
//! lock can never be released or acquired twice by accident.

use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

use super::{LiveCounter, ReadWrite, Unlocked};
use crate::error::UpgradeConflict;
use crate::sync::{RawLock, RawRwLock};

// Constructors are free functions rather than inherent `new`s so that the
// wrapper (and only the wrapper) can build guards around an already
// performed acquisition.

pub(crate) fn const_read_parts<'a, U: ?Sized, M: RawRwLock>(
    data: NonNull<U>,
    raw: &'a M,
    live: &'a LiveCounter,
) -> ConstReadGuard<'a, U, M> {
    ConstReadGuard {
        data,
        raw,
        live,
        _marker: PhantomData,
    }
}

pub(crate) fn read_parts<'a, U: ?Sized, M: RawRwLock>(
    data: NonNull<U>,
    raw: &'a M,
    live: &'a LiveCounter,
) -> ReadGuard<'a, U, M> {
    ReadGuard {
        data,
        raw,
        live,
        _marker: PhantomData,
    }
}

pub(crate) fn write_parts<'a, U: ?Sized, M: RawRwLock>(
    data: NonNull<U>,
    raw: &'a M,
    live: &'a LiveCounter,
) -> WriteGuard<'a, U, M> {
    WriteGuard {
        data,
        raw,
        live,
        _marker: PhantomData,
    }
}

pub(crate) fn carry_parts<T, M: RawRwLock>(
    unlocked: &Unlocked<T, ReadWrite<M>>,
) -> WriteToReadCarry<'_, T, M> {
    WriteToReadCarry { unlocked }
}

pub(crate) fn primitive_parts<'a, T, M: RawLock>(
    data: NonNull<T>,
    raw: &'a M,
    live: &'a LiveCounter,
) -> PrimitiveGuard<'a, T, M> {
    PrimitiveGuard {
        data,
        raw,
        live,
        _marker: PhantomData,
    }
}

pub(crate) fn primitive_read_parts<'a, T, M: RawLock>(
    data: NonNull<T>,
    raw: &'a M,
    live: &'a LiveCounter,
) -> PrimitiveReadGuard<'a, T, M> {
    PrimitiveReadGuard {
        data,
        raw,
        live,
        _marker: PhantomData,
    }
}

pub(crate) fn one_thread_parts<'a, T>(
    data: NonNull<T>,
    borrows: &'a std::cell::Cell<isize>,
    live: &'a LiveCounter,
) -> OneThreadGuard<'a, T> {
    OneThreadGuard {
        data,
        borrows,
        live,
        _marker: PhantomData,
    }
}

pub(crate) fn one_thread_mut_parts<'a, T>(
    data: NonNull<T>,
    borrows: &'a std::cell::Cell<isize>,
    live: &'a LiveCounter,
) -> OneThreadGuardMut<'a, T> {
    OneThreadGuardMut {
        data,
        borrows,
        live,
        _marker: PhantomData,
    }
}

// ── ReadWrite guards ──────────────────────────────────────────────────────

/// Read access that can never be upgraded.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ConstReadGuard<'a, U: ?Sized, M: RawRwLock> {
    data: NonNull<U>,
    raw: &'a M,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a U>,
}

impl<U: ?Sized, M: RawRwLock> Deref for ConstReadGuard<'_, U, M> {
    type Target = U;

    fn deref(&self) -> &U {
        // SAFETY: the shared lock is held for the guard's lifetime.
        unsafe { self.data.as_ref() }
    }
}

impl<U: ?Sized, M: RawRwLock> Drop for ConstReadGuard<'_, U, M> {
    fn drop(&mut self) {
        self.raw.unlock_shared();
        self.live.release();
    }
}

/// Read access that can be upgraded to write access.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a, U: ?Sized, M: RawRwLock> {
    data: NonNull<U>,
    raw: &'a M,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a U>,
}

impl<'a, U: ?Sized, M: RawRwLock> ReadGuard<'a, U, M> {
    /// Converts this read access into write access without releasing the
    /// lock in between.
    ///
    /// # Errors
    ///
    /// When another upgrade is already in flight the read guard is handed
    /// back untouched. The recovery protocol is fixed: drop the guard,
    /// call `upgrade_yield` on the wrapper, and redo the read section,
    /// because whatever was observed under it may be stale by now.
    pub fn try_upgrade(self) -> Result<WriteGuard<'a, U, M>, Self> {
        match self.raw.try_upgrade() {
            Ok(()) => {
                let this = ManuallyDrop::new(self);
                Ok(WriteGuard {
                    data: this.data,
                    raw: this.raw,
                    live: this.live,
                    _marker: PhantomData,
                })
            }
            Err(UpgradeConflict) => Err(self),
        }
    }

    /// Gives up the ability to upgrade, keeping the read lock held.
    #[must_use]
    pub fn into_const(self) -> ConstReadGuard<'a, U, M> {
        let this = ManuallyDrop::new(self);
        ConstReadGuard {
            data: this.data,
            raw: this.raw,
            live: this.live,
            _marker: PhantomData,
        }
    }
}

impl<U: ?Sized, M: RawRwLock> Deref for ReadGuard<'_, U, M> {
    type Target = U;

    fn deref(&self) -> &U {
        // SAFETY: the shared lock is held for the guard's lifetime.
        unsafe { self.data.as_ref() }
    }
}

impl<U: ?Sized, M: RawRwLock> Drop for ReadGuard<'_, U, M> {
    fn drop(&mut self) {
        self.raw.unlock_shared();
        self.live.release();
    }
}

/// Write access; grants `&mut` to the payload.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a, U: ?Sized, M: RawRwLock> {
    data: NonNull<U>,
    raw: &'a M,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a mut U>,
}

impl<'a, U: ?Sized, M: RawRwLock> WriteGuard<'a, U, M> {
    /// Converts this write access into read access without releasing the
    /// lock in between: no other writer can slip in.
    #[must_use]
    pub fn downgrade(self) -> ReadGuard<'a, U, M> {
        self.raw.downgrade();
        let this = ManuallyDrop::new(self);
        ReadGuard {
            data: this.data,
            raw: this.raw,
            live: this.live,
            _marker: PhantomData,
        }
    }
}

impl<U: ?Sized, M: RawRwLock> Deref for WriteGuard<'_, U, M> {
    type Target = U;

    fn deref(&self) -> &U {
        // SAFETY: the exclusive lock is held for the guard's lifetime.
        unsafe { self.data.as_ref() }
    }
}

impl<U: ?Sized, M: RawRwLock> DerefMut for WriteGuard<'_, U, M> {
    fn deref_mut(&mut self) -> &mut U {
        // SAFETY: the exclusive lock is held, so this is the only access.
        unsafe { self.data.as_mut() }
    }
}

impl<U: ?Sized, M: RawRwLock> Drop for WriteGuard<'_, U, M> {
    fn drop(&mut self) {
        self.raw.unlock_exclusive();
        self.live.release();
    }
}

// ── Write-to-read carry ───────────────────────────────────────────────────

/// A planned write section whose lock survives into a read section.
///
/// The problem this solves: "write first, then keep reading the result
/// under the same lock". Doing that with a read guard upgraded to a write
/// guard works, but the upgrade can fail even though the caller never
/// needed the read access that preceded it. The carry sequences the same
/// thing without an upgrade, so it cannot fail:
///
/// ```ignore
/// let carry = data.carry();          // nothing locked yet
/// let mut w = carry.write();         // exclusive lock
/// w.rebuild();
/// let r = w.into_read();             // downgraded, never released
/// serve(&*r);
/// ```
///
/// The type system enforces the sequencing the original design asserted at
/// runtime: the carry can be given to exactly one write guard (it is
/// consumed), and read access exists only after the write guard is
/// finished with it.
#[must_use = "a carry does nothing until passed to write()"]
pub struct WriteToReadCarry<'a, T, M: RawRwLock> {
    pub(crate) unlocked: &'a Unlocked<T, ReadWrite<M>>,
}

impl<'a, T, M: RawRwLock> WriteToReadCarry<'a, T, M> {
    /// Acquires the write lock, consuming the carry.
    pub fn write(self) -> CarryWriteGuard<'a, T, M> {
        let this = ManuallyDrop::new(self);
        let unlocked = this.unlocked;
        unlocked.raw().lock_exclusive();
        CarryWriteGuard {
            data: unlocked.payload_ptr(),
            raw: unlocked.raw(),
            live: unlocked.live(),
            _marker: PhantomData,
        }
    }
}

impl<T, M: RawRwLock> Drop for WriteToReadCarry<'_, T, M> {
    fn drop(&mut self) {
        // Never locked anything; only the accounting goes back.
        self.unlocked.live().release();
    }
}

/// The write phase of a carry; see [`WriteToReadCarry`].
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct CarryWriteGuard<'a, T, M: RawRwLock> {
    data: NonNull<T>,
    raw: &'a M,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a mut T>,
}

impl<'a, T, M: RawRwLock> CarryWriteGuard<'a, T, M> {
    /// Finishes the write phase: the lock downgrades to read access
    /// without ever being released.
    #[must_use]
    pub fn into_read(self) -> ReadGuard<'a, T, M> {
        self.raw.downgrade();
        let this = ManuallyDrop::new(self);
        ReadGuard {
            data: this.data,
            raw: this.raw,
            live: this.live,
            _marker: PhantomData,
        }
    }
}

impl<T, M: RawRwLock> Deref for CarryWriteGuard<'_, T, M> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the exclusive lock is held for the guard's lifetime.
        unsafe { self.data.as_ref() }
    }
}

impl<T, M: RawRwLock> DerefMut for CarryWriteGuard<'_, T, M> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the exclusive lock is held, so this is the only access.
        unsafe { self.data.as_mut() }
    }
}

impl<T, M: RawRwLock> Drop for CarryWriteGuard<'_, T, M> {
    fn drop(&mut self) {
        // Dropped without into_read: the carry ends here and the lock is
        // released outright.
        self.raw.unlock_exclusive();
        self.live.release();
    }
}

// ── Primitive guards ──────────────────────────────────────────────────────

/// Read and write access under a plain mutex.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct PrimitiveGuard<'a, T, M: RawLock> {
    data: NonNull<T>,
    raw: &'a M,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a mut T>,
}

impl<T, M: RawLock> Deref for PrimitiveGuard<'_, T, M> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the mutex is held for the guard's lifetime.
        unsafe { self.data.as_ref() }
    }
}

impl<T, M: RawLock> DerefMut for PrimitiveGuard<'_, T, M> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the mutex is held, so this is the only access.
        unsafe { self.data.as_mut() }
    }
}

impl<T, M: RawLock> Drop for PrimitiveGuard<'_, T, M> {
    fn drop(&mut self) {
        self.raw.unlock();
        self.live.release();
    }
}

/// Read-only access under a plain mutex.
///
/// Holds the same exclusive mutex as [`PrimitiveGuard`]; only the granted
/// access differs. Use it in interfaces that should not mutate.
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct PrimitiveReadGuard<'a, T, M: RawLock> {
    data: NonNull<T>,
    raw: &'a M,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a T>,
}

impl<'a, T, M: RawLock> PrimitiveReadGuard<'a, T, M> {
    /// Regains write access. The mutex is already exclusive, so this is
    /// free and cannot fail.
    #[must_use]
    pub fn into_write(self) -> PrimitiveGuard<'a, T, M> {
        let this = ManuallyDrop::new(self);
        PrimitiveGuard {
            data: this.data,
            raw: this.raw,
            live: this.live,
            _marker: PhantomData,
        }
    }
}

impl<T, M: RawLock> Deref for PrimitiveReadGuard<'_, T, M> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the mutex is held for the guard's lifetime.
        unsafe { self.data.as_ref() }
    }
}

impl<T, M: RawLock> Drop for PrimitiveReadGuard<'_, T, M> {
    fn drop(&mut self) {
        self.raw.unlock();
        self.live.release();
    }
}

// ── OneThread guards ──────────────────────────────────────────────────────

/// Read access to a single-thread wrapper.
#[must_use = "the borrow ends as soon as the guard is dropped"]
pub struct OneThreadGuard<'a, T> {
    data: NonNull<T>,
    borrows: &'a std::cell::Cell<isize>,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a T>,
}

impl<T> Deref for OneThreadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the borrow flag excludes exclusive borrows.
        unsafe { self.data.as_ref() }
    }
}

impl<T> Drop for OneThreadGuard<'_, T> {
    fn drop(&mut self) {
        self.borrows.set(self.borrows.get() - 1);
        self.live.release();
    }
}

/// Write access to a single-thread wrapper.
#[must_use = "the borrow ends as soon as the guard is dropped"]
pub struct OneThreadGuardMut<'a, T> {
    data: NonNull<T>,
    borrows: &'a std::cell::Cell<isize>,
    live: &'a LiveCounter,
    _marker: PhantomData<&'a mut T>,
}

impl<T> Deref for OneThreadGuardMut<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the borrow flag excludes every other borrow.
        unsafe { self.data.as_ref() }
    }
}

impl<T> DerefMut for OneThreadGuardMut<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the borrow flag excludes every other borrow.
        unsafe { self.data.as_mut() }
    }
}

impl<T> Drop for OneThreadGuardMut<'_, T> {
    fn drop(&mut self) {
        self.borrows.set(0);
        self.live.release();
    }
}
