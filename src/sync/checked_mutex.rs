//! Non-reentrant mutex with an owner check.

use parking_lot::lock_api::RawMutex as _;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::sync::RawLock;
use crate::thread_id;

/// A mutex that panics on same-thread relock instead of deadlocking.
///
/// A plain mutex turns accidental recursion into a silent deadlock. This
/// one records the owning thread and trips an assertion the moment the
/// owner tries to lock again, which is the misuse the deadlock would have
/// hidden.
///
/// Implements [`RawLock`], making it the default lock for the `Primitive`
/// access policy.
pub struct CheckedMutex {
    inner: parking_lot::RawMutex,
    /// Thread id of the current owner, 0 when unlocked.
    owner: AtomicU64,
}

impl Default for CheckedMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CheckedMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckedMutex")
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl CheckedMutex {
    /// Creates an unlocked mutex.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: parking_lot::RawMutex::INIT,
            owner: AtomicU64::new(0),
        }
    }

    /// Blocks until the lock is held.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock.
    pub fn lock(&self) {
        assert!(
            !self.is_held_by_current_thread(),
            "recursive lock of a non-reentrant mutex"
        );
        self.inner.lock();
        self.owner.store(thread_id::current(), Ordering::Relaxed);
    }

    /// Acquires the lock if it is free, without blocking.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread already holds the lock.
    pub fn try_lock(&self) -> bool {
        assert!(
            !self.is_held_by_current_thread(),
            "recursive try_lock of a non-reentrant mutex"
        );
        let acquired = self.inner.try_lock();
        if acquired {
            self.owner.store(thread_id::current(), Ordering::Relaxed);
        }
        acquired
    }

    /// Releases the lock.
    pub fn unlock(&self) {
        debug_assert!(
            self.is_held_by_current_thread(),
            "unlock by a thread that does not hold the mutex"
        );
        self.owner.store(0, Ordering::Relaxed);
        // SAFETY: the owner check above pins the caller as the thread that
        // locked `inner`.
        unsafe { self.inner.unlock() };
    }

    /// Returns true if the calling thread holds the lock.
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == thread_id::current()
    }
}

impl RawLock for CheckedMutex {
    fn lock(&self) {
        CheckedMutex::lock(self);
    }

    fn unlock(&self) {
        CheckedMutex::unlock(self);
    }
}
