//! Non-owning views over a wrapped payload.

use std::ptr::NonNull;

use super::guards::{self, ConstReadGuard, ReadGuard, WriteGuard};
use super::LiveCounter;
use crate::sync::RawRwLock;

pub(crate) fn view_parts<'a, B: ?Sized, M: RawRwLock>(
    data: NonNull<B>,
    raw: &'a M,
    live: &'a LiveCounter,
) -> UnlockedView<'a, B, M> {
    UnlockedView { data, raw, live }
}

/// A copyable handle exposing part of a wrapped payload under the
/// wrapper's own lock.
///
/// Created by [`Unlocked::view`](super::Unlocked::view) with a projection
/// to a field or a trait object. The view behaves like the wrapper it came
/// from, narrowed to the projected target: its guards take the same lock,
/// so access through the view and access through the wrapper exclude each
/// other exactly as two accesses through the wrapper would.
///
/// Typical use: a subsystem works with `dyn Draw` without knowing the
/// concrete payload type.
///
/// ```ignore
/// let shape = Unlocked::<Circle>::new(Circle::default());
/// let drawable = shape.view::<dyn Draw>(|c| c as &mut dyn Draw);
/// drawable.read().draw(&mut canvas);
/// ```
///
/// Views are plain handles: copying one does not copy or lock anything,
/// and the wrapper must outlive every copy (enforced by the borrow).
pub struct UnlockedView<'a, B: ?Sized, M: RawRwLock> {
    data: NonNull<B>,
    raw: &'a M,
    live: &'a LiveCounter,
}

impl<B: ?Sized, M: RawRwLock> Clone for UnlockedView<'_, B, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: ?Sized, M: RawRwLock> Copy for UnlockedView<'_, B, M> {}

impl<'a, B: ?Sized, M: RawRwLock> UnlockedView<'a, B, M> {
    /// Acquires read access that can never be upgraded.
    #[must_use]
    pub fn const_read(&self) -> ConstReadGuard<'a, B, M> {
        self.raw.lock_shared();
        self.live.acquire();
        guards::const_read_parts(self.data, self.raw, self.live)
    }

    /// Acquires read access, upgradable via
    /// [`ReadGuard::try_upgrade`](super::ReadGuard::try_upgrade).
    #[must_use]
    pub fn read(&self) -> ReadGuard<'a, B, M> {
        self.raw.lock_shared();
        self.live.acquire();
        guards::read_parts(self.data, self.raw, self.live)
    }

    /// Acquires write access to the projected target.
    #[must_use]
    pub fn write(&self) -> WriteGuard<'a, B, M> {
        self.raw.lock_exclusive();
        self.live.acquire();
        guards::write_parts(self.data, self.raw, self.live)
    }

    /// Blocks until the currently winning upgrader has finished.
    pub fn upgrade_yield(&self) {
        self.raw.upgrade_yield();
    }
}

impl<B: ?Sized, M: RawRwLock> std::fmt::Debug for UnlockedView<'_, B, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockedView").finish_non_exhaustive()
    }
}
