//! Cheap per-thread identifiers.
//!
//! `std::thread::ThreadId` cannot be stored in an atomic, so this module
//! hands every thread a small nonzero `u64` instead.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
}

/// Returns the calling thread's id. Never zero.
#[must_use]
pub fn current() -> u64 {
    CURRENT_ID.with(|id| *id)
}

/// Checks that all callers passing the same `slot` run on a single thread.
///
/// The first caller claims the slot; every later call reports whether it is
/// still that thread. Usage:
///
/// ```
/// use std::sync::atomic::AtomicU64;
/// use warden::thread_id::is_single_threaded;
///
/// static OWNER: AtomicU64 = AtomicU64::new(0);
/// debug_assert!(is_single_threaded(&OWNER));
/// ```
pub fn is_single_threaded(slot: &AtomicU64) -> bool {
    let me = current();
    let seen = slot.load(Ordering::Relaxed);
    if seen == me {
        return true;
    }
    // First caller claims the slot; a lost race means another thread did.
    seen == 0
        && slot
            .compare_exchange(0, me, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
}
