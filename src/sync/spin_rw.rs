//! Packed-counter reader/writer spin lock.
//!
//! The entire lock state lives in one signed 64-bit atomic word, split into
//! four 16-bit counters (least significant first):
//!
//! ```text
//! |  V  |  C  |  W  |  R  |
//!   63..48 47..32 31..16 15..0
//! ```
//!
//! - `R`: active readers.
//! - `W`: active writers (at most one holds the lock at a time).
//! - `C`: readers converting their read lock into a write lock.
//! - `V`: the *negated* count of writer-presence marks. Every writer,
//!   waiting writer, and upgrader contributes one mark, so `V <= -(C + W)`
//!   always holds, and because `V` occupies the top field, `state < 0` is
//!   the single-branch "a writer exists somewhere" test that bounces new
//!   readers off the fast path.
//!
//! Every state change is a single signed `fetch_add` of a compile-time
//! transition constant; the previous value tells the caller what situation
//! it just moved out of. The fast paths (uncontended read lock and unlock,
//! uncontended write lock, sole-reader upgrade) are exactly one RMW.
//!
//! # Slow paths
//!
//! Contended acquisitions first spin (readers drain quickly) and then
//! sleep on one of two condition-variable channels: `readers` for blocked
//! readers, `writers` for waiting writers, upgraders, and threads in
//! [`upgrade_yield`](SpinRwLock::upgrade_yield). Correctness of the
//! sleeping depends on one rule, enforced centrally by the private
//! `transition` helper: a transition that can flip a predicate some
//! sleeper is watching must be applied while holding that sleeper's
//! channel mutex, and the wakeup must be issued after the mutex is
//! released.
//!
//! # Priority
//!
//! Active writer > upgrader > waiting writer > new reader. An upgrader
//! outranks waiting writers because it cannot give way: it already holds a
//! read lock that the writers are waiting on.
//!
//! # Capacity
//!
//! Each counter is 16 bits; keep the number of threads contending for one
//! lock well under `2^15` so that transient over-claims (a failed write
//! attempt briefly counts an extra `W`) cannot carry into the next field.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI64, Ordering};

use crate::error::UpgradeConflict;
use crate::sync::RawRwLock;

// ── Field layout ──────────────────────────────────────────────────────────

const FIELD_BITS: u32 = 16;

const R_UNIT: i64 = 1;
const W_UNIT: i64 = R_UNIT << FIELD_BITS;
const C_UNIT: i64 = W_UNIT << FIELD_BITS;
const V_UNIT: i64 = C_UNIT << FIELD_BITS;

const R_MASK: i64 = W_UNIT - 1;
const W_MASK: i64 = (C_UNIT - 1) & !R_MASK;
const C_MASK: i64 = (V_UNIT - 1) & !(R_MASK | W_MASK);

// ── Transition constants ──────────────────────────────────────────────────
//
// Each acquisition or release is one fetch_add of one of these. The
// invariant V <= -(C + W) is preserved by every constant: whoever adds a C
// or W also subtracts a V, and vice versa on release.

/// A reader arrives (optimistically; reverted when a writer is present).
const ONE_RDLOCK: i64 = R_UNIT;
/// A reader leaves. Also the revert of a bounced optimistic read claim.
const ONE_RDUNLOCK: i64 = -R_UNIT;
/// A writer claims the lock and plants its presence mark.
const ONE_WRLOCK: i64 = W_UNIT - V_UNIT;
/// The writer releases the lock and withdraws its mark.
const ONE_WRUNLOCK: i64 = V_UNIT - W_UNIT;
/// A failed write claim steps back to "waiting writer": the W is
/// withdrawn, the presence mark stays planted.
const FAILED_WRLOCK: i64 = -W_UNIT;
/// A waiting writer re-claims the W it withdrew.
const FINALIZE_WRLOCK: i64 = -FAILED_WRLOCK;
/// The writer converts itself into a reader without unlocking.
const ONE_WR2RDLOCK: i64 = R_UNIT + V_UNIT - W_UNIT;
/// A reader declares an upgrade: claims a converter slot and plants a
/// presence mark. Its read lock stays counted in R.
const ONE_RD2WRLOCK: i64 = C_UNIT - V_UNIT;
/// The losing upgrader takes its declaration back.
const REVERT_RD2WRLOCK: i64 = -ONE_RD2WRLOCK;
/// The winning upgrader trades its converter slot and its read lock for
/// the W. Its presence mark carries over.
const SUCCESSFUL_RD2WRLOCK: i64 = W_UNIT - C_UNIT - R_UNIT;

// Upgrading must be indistinguishable, on the counter word, from having
// write-locked directly.
const _: () = assert!(ONE_RDLOCK + ONE_RD2WRLOCK + SUCCESSFUL_RD2WRLOCK == ONE_WRLOCK);
const _: () = assert!(ONE_WRLOCK + ONE_WRUNLOCK == 0);
const _: () = assert!(ONE_WRLOCK + ONE_WR2RDLOCK + ONE_RDUNLOCK == 0);
const _: () = assert!(ONE_WRLOCK + FAILED_WRLOCK + FINALIZE_WRLOCK + ONE_WRUNLOCK == 0);

// ── State predicates ──────────────────────────────────────────────────────

/// Some writer exists: active, waiting, or upgrading. The test that turns
/// new readers away.
const fn writer_present(state: i64) -> bool {
    state < 0
}

const fn reader_or_writer_present(state: i64) -> bool {
    state != 0
}

const fn reader_present(state: i64) -> bool {
    state & R_MASK != 0
}

/// More readers than the caller itself.
const fn other_readers_present(state: i64) -> bool {
    state & R_MASK > 1
}

const fn converting_or_actual_writer_present(state: i64) -> bool {
    state & (C_MASK | W_MASK) != 0
}

const fn converting_writer_present(state: i64) -> bool {
    state & C_MASK != 0
}

const fn actual_writer_present(state: i64) -> bool {
    state & W_MASK != 0
}

// ── Increment predicates ──────────────────────────────────────────────────
//
// A transition constant is a sum of signed 16-bit per-field deltas. The
// deltas decide, at compile time, which sleep-channel mutexes a transition
// must hold and which wakeups it may owe.

/// Splits a transition constant into its `[dv, dc, dw, dr]` deltas.
const fn decode(increment: i64) -> [i64; 4] {
    let dr = (increment & 0xffff) as i16 as i64;
    let rest = (increment - dr) >> FIELD_BITS;
    let dw = (rest & 0xffff) as i16 as i64;
    let rest = (rest - dw) >> FIELD_BITS;
    let dc = (rest & 0xffff) as i16 as i64;
    let dv = (rest - dc) >> FIELD_BITS;
    [dv, dc, dw, dr]
}

/// Can this transition wake blocked readers (flip `writer_present` off)?
const fn removes_writer(increment: i64) -> bool {
    let [dv, dc, dw, _] = decode(increment);
    dv > 0 || dc < 0 || dw < 0
}

/// Can this transition wake the writers channel (flip
/// `converting_or_actual_writer_present` off)?
const fn removes_converting_or_actual_writer(increment: i64) -> bool {
    let [_, dc, dw, _] = decode(increment);
    (dc < 0 || dw < 0) && !(dc > 0 || dw > 0)
}

/// Can this transition release `upgrade_yield` observers (flip
/// `converting_writer_present` off)?
const fn removes_converting_writer(increment: i64) -> bool {
    let [_, dc, _, _] = decode(increment);
    dc < 0
}

const fn removes_actual_writer(increment: i64) -> bool {
    let [_, _, dw, _] = decode(increment);
    dw < 0
}

// ── Compile-time verification ─────────────────────────────────────────────
//
// The predicates above are trusted by every sleep site, so they are checked
// exhaustively during constant evaluation: over every feasible state and
// every transition constant, a flip that some sleeper watches must imply
// the corresponding `removes_*` predicate, and the masking predicates must
// agree with the per-field meaning.

const TRANSITIONS: [i64; 10] = [
    ONE_RDLOCK,
    ONE_RDUNLOCK,
    ONE_WRLOCK,
    ONE_WRUNLOCK,
    FAILED_WRLOCK,
    FINALIZE_WRLOCK,
    ONE_WR2RDLOCK,
    ONE_RD2WRLOCK,
    REVERT_RD2WRLOCK,
    SUCCESSFUL_RD2WRLOCK,
];

const fn pack(v: i64, c: i64, w: i64, r: i64) -> i64 {
    v * V_UNIT + c * C_UNIT + w * W_UNIT + r * R_UNIT
}

/// A state is feasible when it is a sum of legal per-thread contributions:
/// readers (+r), waiting writers (-v), writers (w - v), and upgraders
/// (r + c - v). That gives non-negative R/W/C, non-positive V with at
/// least one mark per writer and upgrader, and a read lock behind every
/// upgrade.
const fn feasible(v: i64, c: i64, w: i64, r: i64) -> bool {
    r >= 0 && c >= 0 && w >= 0 && v <= 0 && -v >= c + w && c <= r
}

const GRID: i64 = 2;

const fn verify() {
    let mut v = -(2 * GRID);
    while v <= 0 {
        let mut c = 0;
        while c <= GRID {
            let mut w = 0;
            while w <= GRID {
                let mut r = 0;
                while r <= GRID {
                    if feasible(v, c, w, r) {
                        let state = pack(v, c, w, r);

                        // Mask predicates agree with the field meaning.
                        assert!(writer_present(state) == (v != 0));
                        assert!(reader_or_writer_present(state) == (v != 0 || c != 0 || w != 0 || r != 0));
                        assert!(reader_present(state) == (r != 0));
                        assert!(other_readers_present(state) == (r > 1));
                        assert!(converting_or_actual_writer_present(state) == (c != 0 || w != 0));
                        assert!(converting_writer_present(state) == (c != 0));
                        assert!(actual_writer_present(state) == (w != 0));

                        // Every watched flip is covered by its predicate.
                        let mut t = 0;
                        while t < TRANSITIONS.len() {
                            let increment = TRANSITIONS[t];
                            let [dv, dc, dw, dr] = decode(increment);
                            let (v2, c2, w2, r2) = (v + dv, c + dc, w + dw, r + dr);
                            if feasible(v2, c2, w2, r2) {
                                // The packed word composes like the fields.
                                assert!(state + increment == pack(v2, c2, w2, r2));

                                if v != 0 && v2 == 0 {
                                    assert!(removes_writer(increment));
                                }
                                if (c != 0 || w != 0) && c2 == 0 && w2 == 0 {
                                    assert!(removes_converting_or_actual_writer(increment));
                                }
                                if c != 0 && c2 == 0 {
                                    assert!(removes_converting_writer(increment));
                                }
                                if w != 0 && w2 == 0 {
                                    assert!(removes_actual_writer(increment));
                                }
                            }
                            t += 1;
                        }
                    }
                    r += 1;
                }
                w += 1;
            }
            c += 1;
        }
        v += 1;
    }

    // The decoder inverts the packing for every transition constant.
    let mut t = 0;
    while t < TRANSITIONS.len() {
        let [dv, dc, dw, dr] = decode(TRANSITIONS[t]);
        assert!(pack(dv, dc, dw, dr) == TRANSITIONS[t]);
        t += 1;
    }
}

const _: () = verify();

// ── The lock ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SleepChannel {
    mutex: Mutex<()>,
    condvar: Condvar,
}

impl SleepChannel {
    const fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }
}

/// Reader/writer spin lock with single-RMW fast paths and upgrade support.
///
/// See the [module docs](self) for the state layout and priority rules.
/// The upgrade (`try_upgrade`) fails with [`UpgradeConflict`] when another
/// upgrade is in flight; the caller recovers by releasing its shared lock,
/// calling [`upgrade_yield`](SpinRwLock::upgrade_yield), and retrying.
#[derive(Default)]
pub struct SpinRwLock {
    state: AtomicI64,
    readers: SleepChannel,
    writers: SleepChannel,
}

impl std::fmt::Debug for SpinRwLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.load(Ordering::Relaxed);
        f.debug_struct("SpinRwLock")
            .field("readers", &(state & R_MASK))
            .field("writer_present", &writer_present(state))
            .finish()
    }
}

impl SpinRwLock {
    /// Creates an unlocked `SpinRwLock`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicI64::new(0),
            readers: SleepChannel::new(),
            writers: SleepChannel::new(),
        }
    }

    /// Applies one transition constant to the state word.
    ///
    /// This is the synchronization backbone. If `INC` can flip a predicate
    /// that a sleeper is watching, the fetch_add happens under that
    /// sleeper's channel mutex; the channel is then notified after the
    /// mutex is dropped, and only when the flip actually occurred.
    ///
    /// Returns the state word as it was before the transition.
    fn transition<const INC: i64>(&self) -> i64 {
        if removes_writer(INC) {
            let readers_guard = self.readers.mutex.lock();
            let writers_guard = if removes_converting_or_actual_writer(INC)
                || removes_converting_writer(INC)
            {
                Some(self.writers.mutex.lock())
            } else {
                None
            };
            let prev = self.state.fetch_add(INC, Ordering::AcqRel);
            drop(writers_guard);
            drop(readers_guard);

            let next = prev.wrapping_add(INC);
            if writer_present(prev) && !writer_present(next) {
                self.readers.condvar.notify_all();
            }
            if converting_writer_present(prev) && !converting_writer_present(next) {
                self.writers.condvar.notify_all();
            } else if (converting_or_actual_writer_present(prev)
                && !converting_or_actual_writer_present(next))
                || (actual_writer_present(prev) && !actual_writer_present(next))
            {
                // More than one kind of thread sleeps on this channel, so a
                // single wake could land on one that just goes back to
                // sleep. Wake them all; the channel population is tiny.
                self.writers.condvar.notify_all();
            }
            prev
        } else {
            let ordering = match INC {
                // Lock-establishing transitions must observe the releases
                // they follow in the modification order.
                ONE_RDLOCK | ONE_WRLOCK | FINALIZE_WRLOCK | ONE_RD2WRLOCK => Ordering::Acquire,
                ONE_RDUNLOCK => Ordering::Release,
                _ => Ordering::Relaxed,
            };
            self.state.fetch_add(INC, ordering)
        }
    }

    /// Acquires a shared lock.
    pub fn lock_shared(&self) {
        if writer_present(self.transition::<ONE_RDLOCK>()) {
            self.lock_shared_contended();
        }
    }

    #[cold]
    fn lock_shared_contended(&self) {
        loop {
            // The optimistic claim bounced off a writer; take it back
            // before sleeping, or the writer would wait on us forever.
            self.transition::<ONE_RDUNLOCK>();

            let mut acquired = false;
            {
                let mut guard = self.readers.mutex.lock();
                loop {
                    // Grab the lock outright if it is completely free. On
                    // failure the loaded word decides whether sleeping is
                    // still safe: while a writer is present, every
                    // transition that could free us holds this mutex and
                    // will notify.
                    if self
                        .state
                        .compare_exchange_weak(0, ONE_RDLOCK, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                    {
                        acquired = true;
                        break;
                    }
                    if !writer_present(self.state.load(Ordering::Relaxed)) {
                        break;
                    }
                    self.readers.condvar.wait(&mut guard);
                }
            }
            if acquired {
                return;
            }
            // The writers left while we were queueing; try the fast path
            // again, and re-enter the blocked protocol if a new writer
            // beat us to it.
            if !writer_present(self.transition::<ONE_RDLOCK>()) {
                return;
            }
        }
    }

    /// Releases a shared lock.
    ///
    /// One relaxed-class RMW; nobody needs a wakeup because writers spin
    /// on the reader count rather than sleeping on it.
    pub fn unlock_shared(&self) {
        let prev = self.transition::<ONE_RDUNLOCK>();
        debug_assert!(reader_present(prev), "unlock_shared without a shared lock");
    }

    /// Acquires the exclusive lock.
    pub fn lock_exclusive(&self) {
        // With the lock completely free this is the whole story: W is
        // claimed and the presence mark planted in one RMW.
        if self.transition::<ONE_WRLOCK>() != 0 {
            self.lock_exclusive_contended();
        }
    }

    #[cold]
    fn lock_exclusive_contended(&self) {
        loop {
            // Step back to "waiting writer": give up the W claim but keep
            // the presence mark, which stops new readers from arriving.
            self.transition::<FAILED_WRLOCK>();

            // Readers cannot be replenished while our mark is planted, so
            // this loop terminates. It only reads, keeping the cache line
            // shared until the last reader leaves.
            while reader_present(self.state.load(Ordering::Relaxed)) {
                std::hint::spin_loop();
            }

            let mut acquired = false;
            {
                let mut guard = self.writers.mutex.lock();
                loop {
                    let snapshot = self.state.load(Ordering::Relaxed);
                    if snapshot & (C_MASK | W_MASK | R_MASK) == 0 {
                        // Only presence marks left; claim the W back.
                        match self.state.compare_exchange_weak(
                            snapshot,
                            snapshot + FINALIZE_WRLOCK,
                            Ordering::Acquire,
                            Ordering::Relaxed,
                        ) {
                            Ok(_) => {
                                acquired = true;
                                break;
                            }
                            Err(_) => continue,
                        }
                    }
                    if !converting_or_actual_writer_present(snapshot) {
                        // We lost only to readers; they drain by spinning,
                        // not by notification, so leave the condvar.
                        break;
                    }
                    // An upgrader or another writer owns the lock; its
                    // release will notify this channel.
                    self.writers.condvar.wait(&mut guard);
                }
            }
            if acquired {
                return;
            }
            // Re-claim the W and look at what we collided with; readers or
            // another writer send us around again.
            let prev = self.transition::<FINALIZE_WRLOCK>();
            if prev & (C_MASK | W_MASK | R_MASK) == 0 {
                return;
            }
        }
    }

    /// Releases the exclusive lock.
    pub fn unlock_exclusive(&self) {
        let prev = self.transition::<ONE_WRUNLOCK>();
        debug_assert!(
            actual_writer_present(prev),
            "unlock_exclusive without the exclusive lock"
        );
    }

    /// Converts the caller's exclusive lock into a shared lock.
    pub fn downgrade(&self) {
        let prev = self.transition::<ONE_WR2RDLOCK>();
        debug_assert!(
            actual_writer_present(prev),
            "downgrade without the exclusive lock"
        );
    }

    /// Converts the caller's shared lock into the exclusive lock.
    ///
    /// # Errors
    ///
    /// Fails with [`UpgradeConflict`] iff another upgrade was in flight at
    /// the moment of the attempt. The caller keeps its shared lock and
    /// must release it, call [`upgrade_yield`](SpinRwLock::upgrade_yield),
    /// and retry its read section.
    pub fn try_upgrade(&self) -> Result<(), UpgradeConflict> {
        let prev = self.transition::<ONE_RD2WRLOCK>();
        debug_assert!(reader_present(prev), "try_upgrade without a shared lock");

        if converting_writer_present(prev) {
            // Two upgrades cannot both finish: each waits for the other's
            // read lock to disappear. First declared wins.
            self.transition::<REVERT_RD2WRLOCK>();
            return Err(UpgradeConflict);
        }

        if prev & (C_MASK | W_MASK | R_MASK) == ONE_RDLOCK {
            // We were the only reader and no writer was active: trade the
            // read lock and converter slot for the W on the spot.
            self.transition::<SUCCESSFUL_RD2WRLOCK>();
            return Ok(());
        }

        self.upgrade_contended();
        Ok(())
    }

    #[cold]
    fn upgrade_contended(&self) {
        // Our presence mark keeps new readers out; the ones already inside
        // drain. Transient spikes (optimistic claims that will revert)
        // may still flicker through R.
        while other_readers_present(self.state.load(Ordering::Relaxed)) {
            std::hint::spin_loop();
        }

        let mut converter_drained = false;
        {
            let mut guard = self.writers.mutex.lock();
            loop {
                let snapshot = self.state.load(Ordering::Relaxed);
                if !actual_writer_present(snapshot) {
                    match self.state.compare_exchange_weak(
                        snapshot,
                        snapshot + SUCCESSFUL_RD2WRLOCK,
                        Ordering::Acquire,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            converter_drained =
                                !converting_writer_present(snapshot + SUCCESSFUL_RD2WRLOCK);
                            break;
                        }
                        // Only reader or mark churn; retry immediately.
                        Err(_) => continue,
                    }
                }
                // A writer holds the lock (or a claim is in flight); its
                // release or revert notifies this channel.
                self.writers.condvar.wait(&mut guard);
            }
        }
        if converter_drained {
            // Conversion finished under the channel mutex; release any
            // losers parked in upgrade_yield.
            self.writers.condvar.notify_all();
        }
    }

    /// Blocks until the winning upgrader has finished.
    pub fn upgrade_yield(&self) {
        // Give the winner a scheduling slot before queueing on its mutex.
        std::thread::yield_now();
        let mut guard = self.writers.mutex.lock();
        while converting_writer_present(self.state.load(Ordering::Relaxed)) {
            self.writers.condvar.wait(&mut guard);
        }
    }

    #[cfg(test)]
    fn raw_state(&self) -> i64 {
        self.state.load(Ordering::SeqCst)
    }
}

impl RawRwLock for SpinRwLock {
    fn lock_shared(&self) {
        SpinRwLock::lock_shared(self);
    }

    fn unlock_shared(&self) {
        SpinRwLock::unlock_shared(self);
    }

    fn lock_exclusive(&self) {
        SpinRwLock::lock_exclusive(self);
    }

    fn unlock_exclusive(&self) {
        SpinRwLock::unlock_exclusive(self);
    }

    fn downgrade(&self) {
        SpinRwLock::downgrade(self);
    }

    fn try_upgrade(&self) -> Result<(), UpgradeConflict> {
        SpinRwLock::try_upgrade(self)
    }

    fn upgrade_yield(&self) {
        SpinRwLock::upgrade_yield(self);
    }
}
