//! Object-oriented synchronization: data wrapped behind scoped access guards.
//!
//! Most lock APIs hand out a lock and trust the caller to remember what it
//! protects. This crate inverts that: the protected value is wrapped in an
//! [`Unlocked`] container and can only be reached through scoped access
//! guards that acquire the right lock for the access they grant.
//!
//! # Layers
//!
//! - [`sync`]: the lock primitives. [`SpinRwLock`] is the workhorse: a
//!   reader/writer lock whose entire state lives in one 64-bit atomic word,
//!   with single-RMW fast paths, writer priority, and support for upgrading
//!   a read lock to a write lock. [`RwMutex`] is the condition-variable
//!   reference implementation of the same contract. [`Semaphore`] is a
//!   futex-backed token counter. [`CheckedMutex`] and [`Gate`] round out
//!   the primitive set.
//! - [`access`]: the wrapper layer. [`Unlocked<T, P>`] stores a payload
//!   together with a locking policy `P` and exposes guard constructors:
//!   const-read, read (upgradable), write (downgradable), and a
//!   write-to-read carry that keeps the lock held across the transition.
//! - [`registry`]: a thread-safe set of raw object pointers built on the
//!   spin lock's upgrade protocol, with O(1) insert/erase and amortized
//!   O(1) growth.
//!
//! # Upgrading and the retry protocol
//!
//! Upgrading a read lock can lose to a concurrent upgrader; that loss is
//! reported as [`UpgradeConflict`] and is an expected control-flow event,
//! not a bug. The loser must drop its read access, call `upgrade_yield`,
//! and retry its read section from the top:
//!
//! ```ignore
//! let data = Unlocked::<State>::new(State::default());
//! loop {
//!     let r = data.read();
//!     if !r.needs_rebuild() {
//!         break;
//!     }
//!     match r.try_upgrade() {
//!         Ok(mut w) => {
//!             w.rebuild();
//!             break;
//!         }
//!         Err(r) => {
//!             drop(r);
//!             data.upgrade_yield();
//!         }
//!     }
//! }
//! ```
//!
//! The library never retries on the caller's behalf: only the caller knows
//! whether the observations made under the read lock are still valid.
//!
//! # What this crate is not
//!
//! No async support (the primitives spin and block on native condition
//! variables), no timed or abortable acquires, no recursive locking, no
//! cross-process locking, and no FIFO fairness within a contention class.

#![warn(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

pub mod access;
pub mod error;
pub mod registry;
pub mod sync;
pub mod test_logging;
pub mod thread_id;

pub use access::{
    CarryWriteGuard, ConstReadGuard, OneThread, OneThreadGuard, OneThreadGuardMut, Policy,
    Primitive, PrimitiveGuard, PrimitiveReadGuard, ReadGuard, ReadWrite, Unlocked, UnlockedView,
    WriteGuard, WriteToReadCarry,
};
pub use error::UpgradeConflict;
pub use registry::PointerRegistry;
pub use sync::{CheckedMutex, Gate, RawLock, RawRwLock, RwMutex, Semaphore, SpinRwLock};
