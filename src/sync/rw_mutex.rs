//! Condition-variable reader/writer lock with upgrade support.
//!
//! This is the reference implementation of the [`RawRwLock`] contract:
//! every state transition happens under one mutex and is spelled out in
//! plain code. [`SpinRwLock`](crate::sync::SpinRwLock) implements the same
//! contract with atomic fast paths; when the two disagree, this one is the
//! spec.
//!
//! # Fairness
//!
//! Writer-preferring: as soon as a writer (or upgrader) has declared
//! itself, new readers block until the writer sequence drains. Readers
//! cannot starve writers; under continuous write pressure readers may wait
//! indefinitely. There is no FIFO ordering within a class.
//!
//! # Notification discipline
//!
//! Waiters are notified after the state mutex is released. In the common
//! uncontended case this avoids waking a thread straight into a mutex it
//! cannot take; the wait predicates make the occasional wasted wake
//! harmless.

use parking_lot::{Condvar, Mutex};

use crate::error::UpgradeConflict;
use crate::sync::RawRwLock;

#[derive(Debug, Default)]
struct State {
    /// Number of readers, or -1 while a writer holds the lock.
    readers: i32,
    /// Threads that have declared intent to write. Blocks new readers.
    waiting_writers: u32,
    /// Threads converting a read lock into a write lock. At most one can
    /// proceed; a second request is rejected on the spot.
    upgraders: u32,
}

/// A reader/writer lock built on condition variables.
///
/// Supports the full upgradable contract: shared and exclusive locking,
/// exclusive-to-shared downgrade, and shared-to-exclusive upgrade with
/// [`UpgradeConflict`] reporting. See the [module docs](self) for the
/// fairness policy.
#[derive(Debug, Default)]
pub struct RwMutex {
    state: Mutex<State>,
    /// No readers or writers left; wakes one waiting writer.
    unlocked: Condvar,
    /// The writer sequence has drained; wakes all blocked readers.
    no_writer_left: Condvar,
    /// Exactly one reader remains; wakes the upgrader waiting on it.
    one_reader_left: Condvar,
    /// The winning upgrader has finished; wakes losers in `upgrade_yield`.
    upgraders_zero: Condvar,
}

impl RwMutex {
    /// Creates an unlocked `RwMutex`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                waiting_writers: 0,
                upgraders: 0,
            }),
            unlocked: Condvar::new(),
            no_writer_left: Condvar::new(),
            one_reader_left: Condvar::new(),
            upgraders_zero: Condvar::new(),
        }
    }

    /// Acquires a shared lock.
    ///
    /// Blocks while a writer holds the lock or has declared intent to take
    /// it.
    pub fn lock_shared(&self) {
        let mut state = self.state.lock();
        while state.readers < 0 || state.waiting_writers > 0 {
            self.no_writer_left.wait(&mut state);
        }
        state.readers += 1;
    }

    /// Releases a shared lock.
    pub fn unlock_shared(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        debug_assert!(state.readers >= 0, "unlock_shared without a shared lock");
        if state.readers <= 1 {
            let one_reader_left = state.readers == 1;
            // Notify after releasing the state mutex, so woken threads do
            // not immediately block on it inside their wait().
            drop(state);

            if one_reader_left {
                self.one_reader_left.notify_one();
            } else {
                self.unlocked.notify_one();
            }
        }
    }

    /// Acquires the exclusive lock.
    pub fn lock_exclusive(&self) {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.readers != 0 {
            self.unlocked.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.readers = -1;
    }

    /// Releases the exclusive lock.
    pub fn unlock_exclusive(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.readers, -1, "unlock_exclusive without the lock");
        state.readers = 0;
        let writer_waiting = state.waiting_writers > 0;
        drop(state);

        if writer_waiting {
            self.unlocked.notify_one();
        } else {
            self.no_writer_left.notify_all();
        }
    }

    /// Converts the caller's exclusive lock into a shared lock.
    pub fn downgrade(&self) {
        let mut state = self.state.lock();
        debug_assert_eq!(state.readers, -1, "downgrade without the lock");
        state.readers = 1;
        let writer_waiting = state.waiting_writers > 0;
        drop(state);

        // Nobody can be waiting on one_reader_left here: an upgrader holds
        // a read lock, and no read lock could coexist with our write lock.
        if !writer_waiting {
            self.no_writer_left.notify_all();
        }
    }

    /// Converts the caller's shared lock into the exclusive lock.
    ///
    /// # Errors
    ///
    /// Fails with [`UpgradeConflict`] when another thread is already
    /// upgrading. The caller must release its shared lock, call
    /// [`upgrade_yield`](RwMutex::upgrade_yield), and retry its read
    /// section.
    pub fn try_upgrade(&self) -> Result<(), UpgradeConflict> {
        let mut state = self.state.lock();
        state.upgraders += 1;
        if state.upgraders > 1 {
            // A second converter can never be satisfied: both hold a read
            // lock and each waits for the other's to go away. Reject it
            // while still under the state mutex, so the winner never
            // observes the transient count of 2.
            state.upgraders -= 1;
            return Err(UpgradeConflict);
        }
        state.waiting_writers += 1;
        while state.readers != 1 {
            self.one_reader_left.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.readers = -1;
        state.upgraders -= 1;
        drop(state);

        self.upgraders_zero.notify_all();
        Ok(())
    }

    /// Blocks until the winning upgrader has finished.
    pub fn upgrade_yield(&self) {
        // Give the winner a scheduling slot before queueing on its mutex.
        std::thread::yield_now();
        let mut state = self.state.lock();
        while state.upgraders > 0 {
            self.upgraders_zero.wait(&mut state);
        }
    }
}

impl RawRwLock for RwMutex {
    fn lock_shared(&self) {
        RwMutex::lock_shared(self);
    }

    fn unlock_shared(&self) {
        RwMutex::unlock_shared(self);
    }

    fn lock_exclusive(&self) {
        RwMutex::lock_exclusive(self);
    }

    fn unlock_exclusive(&self) {
        RwMutex::unlock_exclusive(self);
    }

    fn downgrade(&self) {
        RwMutex::downgrade(self);
    }

    fn try_upgrade(&self) -> Result<(), UpgradeConflict> {
        RwMutex::try_upgrade(self)
    }

    fn upgrade_yield(&self) {
        RwMutex::upgrade_yield(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logging::init_test_logging;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn shared_locks_overlap() {
        init_test("shared_locks_overlap");
        let lock = RwMutex::new();
        lock.lock_shared();
        lock.lock_shared();
        lock.unlock_shared();
        lock.unlock_shared();
        crate::test_complete!("shared_locks_overlap");
    }

    #[test]
    fn exclusive_lock_excludes_readers() {
        init_test("exclusive_lock_excludes_readers");
        let lock = RwMutex::new();
        let writer_holds = AtomicBool::new(false);

        lock.lock_exclusive();
        writer_holds.store(true, Ordering::Release);

        std::thread::scope(|scope| {
            let reader = scope.spawn(|| {
                lock.lock_shared();
                // The writer must have released by the time we get in.
                let writer_active = writer_holds.load(Ordering::Acquire);
                lock.unlock_shared();
                writer_active
            });

            std::thread::sleep(Duration::from_millis(20));
            writer_holds.store(false, Ordering::Release);
            lock.unlock_exclusive();

            let writer_active = reader.join().unwrap();
            crate::assert_with_log!(
                !writer_active,
                "reader overlapped a write lock",
                false,
                writer_active
            );
        });
        crate::test_complete!("exclusive_lock_excludes_readers");
    }

    #[test]
    fn upgrade_succeeds_as_sole_reader() {
        init_test("upgrade_succeeds_as_sole_reader");
        let lock = RwMutex::new();
        lock.lock_shared();
        let upgraded = lock.try_upgrade().is_ok();
        crate::assert_with_log!(upgraded, "sole reader upgrade", true, upgraded);
        lock.unlock_exclusive();
        crate::test_complete!("upgrade_succeeds_as_sole_reader");
    }

    #[test]
    fn downgrade_keeps_the_lock_readable() {
        init_test("downgrade_keeps_the_lock_readable");
        let lock = RwMutex::new();
        lock.lock_exclusive();
        lock.downgrade();
        // Another reader can now join.
        lock.lock_shared();
        lock.unlock_shared();
        lock.unlock_shared();
        crate::test_complete!("downgrade_keeps_the_lock_readable");
    }

    /// Invariant: two simultaneous upgraders produce exactly one conflict;
    /// the loser recovers through the release/yield/retry protocol.
    #[test]
    fn concurrent_upgrades_conflict_then_recover() {
        init_test("concurrent_upgrades_conflict_then_recover");
        let lock = RwMutex::new();
        let conflicts = AtomicU32::new(0);
        let completions = AtomicU32::new(0);

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| loop {
                    lock.lock_shared();
                    match lock.try_upgrade() {
                        Ok(()) => {
                            completions.fetch_add(1, Ordering::Relaxed);
                            lock.unlock_exclusive();
                            break;
                        }
                        Err(UpgradeConflict) => {
                            conflicts.fetch_add(1, Ordering::Relaxed);
                            lock.unlock_shared();
                            lock.upgrade_yield();
                        }
                    }
                });
            }
        });

        let done = completions.load(Ordering::Relaxed);
        crate::assert_with_log!(done == 2, "both upgraders complete", 2u32, done);
        crate::test_complete!("concurrent_upgrades_conflict_then_recover");
    }

    /// Invariant: a reader arriving after a writer declared itself does not
    /// get read access before that writer runs.
    #[test]
    fn declared_writer_blocks_new_readers() {
        init_test("declared_writer_blocks_new_readers");
        let lock = RwMutex::new();
        let writer_ran = AtomicBool::new(false);

        lock.lock_shared();
        std::thread::scope(|scope| {
            let writer = scope.spawn(|| {
                lock.lock_exclusive();
                writer_ran.store(true, Ordering::Release);
                lock.unlock_exclusive();
            });

            // Wait for the writer to register its intent.
            while lock.state.lock().waiting_writers == 0 {
                std::thread::yield_now();
            }

            let late_reader = scope.spawn(|| {
                lock.lock_shared();
                let ran = writer_ran.load(Ordering::Acquire);
                lock.unlock_shared();
                ran
            });

            std::thread::sleep(Duration::from_millis(20));
            lock.unlock_shared();

            writer.join().unwrap();
            let ran = late_reader.join().unwrap();
            crate::assert_with_log!(ran, "late reader waited for writer", true, ran);
        });
        crate::test_complete!("declared_writer_blocks_new_readers");
    }
}
