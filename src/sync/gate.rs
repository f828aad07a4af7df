//! One-shot gate.

use parking_lot::{Condvar, Mutex};

/// Blocks any number of threads until [`open`](Gate::open) is called.
///
/// Once open, the gate stays open: a `wait` after `open` returns
/// immediately.
#[derive(Debug, Default)]
pub struct Gate {
    open: Mutex<bool>,
    condvar: Condvar,
}

impl Gate {
    /// Creates a closed gate.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            open: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until the gate is opened.
    pub fn wait(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.condvar.wait(&mut open);
        }
    }

    /// Opens the gate, releasing all current and future waiters.
    pub fn open(&self) {
        {
            let mut open = self.open.lock();
            *open = true;
        }
        self.condvar.notify_all();
    }

    /// Returns true if the gate has been opened.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.open.lock()
    }
}
