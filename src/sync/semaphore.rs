//! Futex-backed counting semaphore.
//!
//! The whole semaphore is one 64-bit atomic word:
//!
//! ```text
//! | blocked threads (32) | available tokens (32) |
//! ```
//!
//! Sleeping threads wait on the tokens half through the kernel-wait
//! primitive (the `futex` module), so an uncontended `post`/`wait` pair
//! never enters the kernel. A thread that wakes up cannot know
//! whether the wake was meant for it; it simply tries again to grab a
//! token or goes back to sleep, which also absorbs spurious wakeups and
//! signal interruptions.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::sync::futex;

const WAITERS_SHIFT: u32 = 32;
const ONE_WAITER: u64 = 1 << WAITERS_SHIFT;
const TOKENS_MASK: u64 = ONE_WAITER - 1;

/// A counting semaphore: tokens are added with [`post`](Semaphore::post)
/// and taken with [`wait`](Semaphore::wait).
///
/// The token count is a `u32`; keeping the sum of posted tokens below
/// `u32::MAX` is the caller's responsibility (checked in debug builds).
#[derive(Debug)]
pub struct Semaphore {
    word: AtomicU64,
}

impl Semaphore {
    /// Creates a semaphore holding `tokens` tokens.
    #[must_use]
    pub const fn new(tokens: u32) -> Self {
        Self {
            word: AtomicU64::new(tokens as u64),
        }
    }

    /// The 32-bit half of the word that carries the token count; this is
    /// what sleeping threads futex-wait on.
    fn tokens_word(&self) -> &AtomicU32 {
        let base = std::ptr::from_ref(&self.word).cast::<AtomicU32>();
        if cfg!(target_endian = "little") {
            // SAFETY: an AtomicU64 is 8-byte aligned and the low half of a
            // little-endian word starts at its base address; mixed-size
            // atomic access to it is the futex protocol.
            unsafe { &*base }
        } else {
            // SAFETY: as above, with the low half at offset 4.
            unsafe { &*base.add(1) }
        }
    }

    /// Adds `n` tokens and wakes up to `n` blocked threads.
    ///
    /// The wakeup is a single call to the kernel-wait primitive, issued
    /// only when the word showed blocked threads.
    pub fn post(&self, n: u32) {
        let prev = self.word.fetch_add(u64::from(n), Ordering::Release);
        debug_assert!(
            (prev & TOKENS_MASK) + u64::from(n) <= TOKENS_MASK,
            "semaphore token overflow"
        );
        let waiters = prev >> WAITERS_SHIFT;
        if waiters > 0 {
            futex::wake(self.tokens_word(), n);
        }
    }

    /// Takes one token, blocking until one is available.
    pub fn wait(&self) {
        // Fast path: a token is there, grab it without touching the
        // waiter half.
        let mut word = self.word.load(Ordering::Relaxed);
        while word & TOKENS_MASK != 0 {
            match self
                .word
                .compare_exchange_weak(word, word - 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(current) => word = current,
            }
        }

        // We are (probably) going to block; announce it so posters know to
        // issue wakeups.
        word = self.word.fetch_add(ONE_WAITER, Ordering::Relaxed) + ONE_WAITER;

        loop {
            if word & TOKENS_MASK == 0 {
                // Sleep while the token half reads zero. The wait returns
                // early when a token arrived in the meantime, and may
                // return spuriously; either way we just look again.
                futex::wait(self.tokens_word(), 0);
                word = self.word.load(Ordering::Relaxed);
            } else {
                // Grab a token and retire the waiter mark in one step.
                match self.word.compare_exchange_weak(
                    word,
                    word - ONE_WAITER - 1,
                    Ordering::Acquire,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => return,
                    Err(current) => word = current,
                }
            }
        }
    }

    /// Takes one token if one is available, without blocking.
    ///
    /// Never touches the waiter half of the word.
    pub fn try_wait(&self) -> bool {
        let mut word = self.word.load(Ordering::Relaxed);
        loop {
            if word & TOKENS_MASK == 0 {
                return false;
            }
            match self
                .word
                .compare_exchange_weak(word, word - 1, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(current) => word = current,
            }
        }
    }

    /// Returns the current token count. Inherently racy; for diagnostics.
    #[must_use]
    pub fn tokens(&self) -> u32 {
        (self.word.load(Ordering::Relaxed) & TOKENS_MASK) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_logging::init_test_logging;
    use std::sync::atomic::AtomicU32 as Counter;
    use std::time::Duration;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn try_wait_drains_exactly_the_tokens() {
        init_test("try_wait_drains_exactly_the_tokens");
        let sem = Semaphore::new(2);
        assert!(sem.try_wait());
        assert!(sem.try_wait());
        let empty = !sem.try_wait();
        crate::assert_with_log!(empty, "third try_wait fails", true, empty);
        crate::test_complete!("try_wait_drains_exactly_the_tokens");
    }

    #[test]
    fn post_then_wait_does_not_block() {
        init_test("post_then_wait_does_not_block");
        let sem = Semaphore::new(0);
        sem.post(1);
        sem.wait();
        crate::assert_with_log!(sem.tokens() == 0, "token consumed", 0u32, sem.tokens());
        crate::test_complete!("post_then_wait_does_not_block");
    }

    /// Invariant: one post(n) releases n blocked waiters.
    #[test]
    fn post_releases_blocked_waiters() {
        init_test("post_releases_blocked_waiters");
        let sem = Semaphore::new(0);
        let released = Counter::new(0);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    sem.wait();
                    released.fetch_add(1, Ordering::Relaxed);
                });
            }

            // Give the waiters time to block.
            std::thread::sleep(Duration::from_millis(20));
            assert_eq!(released.load(Ordering::Relaxed), 0);
            sem.post(4);
        });

        let released = released.load(Ordering::Relaxed);
        crate::assert_with_log!(released == 4, "all waiters released", 4u32, released);
        crate::assert_with_log!(sem.tokens() == 0, "no tokens left", 0u32, sem.tokens());
        crate::test_complete!("post_releases_blocked_waiters");
    }

    #[test]
    fn handoff_pairs_posts_with_waits() {
        init_test("handoff_pairs_posts_with_waits");
        let sem = Semaphore::new(0);
        let done = Counter::new(0);

        std::thread::scope(|scope| {
            for _ in 0..2 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        sem.wait();
                        done.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
            for _ in 0..200 {
                sem.post(1);
            }
        });

        let done = done.load(Ordering::Relaxed);
        crate::assert_with_log!(done == 200, "every post matched a wait", 200u32, done);
        crate::test_complete!("handoff_pairs_posts_with_waits");
    }
}
