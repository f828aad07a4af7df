//! Lock primitives.
//!
//! # Primitives
//!
//! - [`SpinRwLock`]: packed-counter reader/writer spin lock with upgrade
//!   support. The fast paths are a single atomic RMW.
//! - [`RwMutex`]: condition-variable reader/writer lock with the same
//!   contract. Slower, but every transition is plainly visible in the
//!   source; it doubles as the reference for the spin lock's semantics.
//! - [`Semaphore`]: futex-backed counting semaphore.
//! - [`CheckedMutex`]: non-reentrant mutex that panics on same-thread
//!   relock instead of deadlocking.
//! - [`Gate`]: one-shot barrier that blocks waiters until opened.
//!
//! # The raw lock traits
//!
//! [`RawRwLock`] and [`RawLock`] are the seams between the primitives and
//! the access-guard layer ([`crate::access`]). They are object-safe but are
//! only ever used through generics; policies resolve them statically.

mod checked_mutex;
pub(crate) mod futex;
mod gate;
mod rw_mutex;
mod semaphore;
mod spin_rw;

pub use checked_mutex::CheckedMutex;
pub use gate::Gate;
pub use rw_mutex::RwMutex;
pub use semaphore::Semaphore;
pub use spin_rw::SpinRwLock;

use crate::error::UpgradeConflict;

/// An exclusive lock, as consumed by the `Primitive` access policy.
///
/// # Contract
///
/// `unlock` must only be called by a thread that holds the lock. The lock
/// need not be reentrant; implementations are free to panic or deadlock on
/// recursive `lock` calls.
pub trait RawLock {
    /// Blocks until the lock is held by the calling thread.
    fn lock(&self);

    /// Releases the lock.
    fn unlock(&self);
}

/// A reader/writer lock with read-to-write upgrade, as consumed by the
/// `ReadWrite` access policy.
///
/// # Contract
///
/// Every `unlock_*`, `downgrade`, `try_upgrade` call must match a prior
/// acquisition of the corresponding kind on the same thread. Shared holders
/// may overlap freely; an exclusive holder excludes everyone else.
///
/// `try_upgrade` converts the caller's shared lock into an exclusive lock
/// without releasing in between. It fails with [`UpgradeConflict`] when
/// another thread is already upgrading; the caller must then release its
/// shared lock, call [`upgrade_yield`](RawRwLock::upgrade_yield), and retry
/// from the top of its read section.
pub trait RawRwLock {
    /// Acquires a shared (read) lock.
    fn lock_shared(&self);

    /// Releases a shared lock.
    fn unlock_shared(&self);

    /// Acquires the exclusive (write) lock.
    fn lock_exclusive(&self);

    /// Releases the exclusive lock.
    fn unlock_exclusive(&self);

    /// Converts the caller's exclusive lock into a shared lock without
    /// releasing it in between.
    fn downgrade(&self);

    /// Converts the caller's shared lock into the exclusive lock, failing
    /// if another upgrade is already in flight.
    fn try_upgrade(&self) -> Result<(), UpgradeConflict>;

    /// Blocks until the currently winning upgrader has finished.
    ///
    /// Called by a thread that lost an upgrade and released its shared
    /// lock, so that its retry does not immediately collide again.
    fn upgrade_yield(&self);
}
