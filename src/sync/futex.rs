//! Kernel-wait primitive: block on a 32-bit word, wake by address.
//!
//! On Linux this is the futex syscall. Elsewhere a small sharded table of
//! mutex/condvar pairs provides the same interface; the table is keyed by
//! word address, so unrelated waiters may share a shard and eat a spurious
//! wake, which every caller must tolerate anyway.
//!
//! Callers own the retry loop: `wait` may return spuriously, on signal
//! interruption, or because the word changed before the sleep started.

use std::sync::atomic::AtomicU32;

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Sleeps while `*word == expected`.
        ///
        /// Returns on wake, on a spurious wakeup, on signal delivery, or
        /// immediately if the word no longer holds `expected`.
        pub fn wait(word: &AtomicU32, expected: u32) {
            // SAFETY: the futex word outlives the syscall (we hold a
            // reference) and is 4-byte aligned by AtomicU32's layout.
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    word.as_ptr(),
                    libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                    expected,
                    std::ptr::null::<libc::timespec>(),
                    std::ptr::null::<u32>(),
                    0u32,
                );
            }
        }

        /// Wakes up to `count` threads sleeping on `word`.
        ///
        /// A woken thread always re-checks the word, so waking too many is
        /// harmless.
        pub fn wake(word: &AtomicU32, count: u32) {
            // SAFETY: same contract as `wait`.
            unsafe {
                libc::syscall(
                    libc::SYS_futex,
                    word.as_ptr(),
                    libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                    count.min(i32::MAX as u32) as i32,
                    std::ptr::null::<libc::timespec>(),
                    std::ptr::null::<u32>(),
                    0u32,
                );
            }
        }
    } else {
        use parking_lot::{Condvar, Mutex};
        use std::sync::atomic::Ordering;

        struct Shard {
            mutex: Mutex<()>,
            condvar: Condvar,
        }

        const SHARD_COUNT: usize = 16;

        static SHARDS: [Shard; SHARD_COUNT] = [const {
            Shard {
                mutex: Mutex::new(()),
                condvar: Condvar::new(),
            }
        }; SHARD_COUNT];

        fn shard_for(word: &AtomicU32) -> &'static Shard {
            let addr = word.as_ptr() as usize;
            // Drop the alignment bits before taking the modulus.
            &SHARDS[(addr >> 2) % SHARD_COUNT]
        }

        /// Sleeps while `*word == expected`.
        pub fn wait(word: &AtomicU32, expected: u32) {
            let shard = shard_for(word);
            let mut guard = shard.mutex.lock();
            // The check under the shard mutex pairs with the notify in
            // `wake`: a wake between check and sleep cannot be lost.
            if word.load(Ordering::SeqCst) == expected {
                shard.condvar.wait(&mut guard);
            }
        }

        /// Wakes threads sleeping on `word`.
        ///
        /// The shard is shared between addresses, so everyone on it is
        /// woken; sleepers on other words observe a spurious wake.
        pub fn wake(word: &AtomicU32, _count: u32) {
            let shard = shard_for(word);
            drop(shard.mutex.lock());
            shard.condvar.notify_all();
        }
    }
}
