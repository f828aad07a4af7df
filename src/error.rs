//! Error types.
//!
//! The only recoverable failure in this crate is [`UpgradeConflict`]. Every
//! other failure mode (recursive locking of a [`CheckedMutex`], destroying
//! a wrapper with live guards, semaphore token overflow) is a programming
//! error and panics instead of returning.
//!
//! [`CheckedMutex`]: crate::sync::CheckedMutex

/// A read-to-write upgrade lost to a concurrent upgrader.
///
/// Two threads that both hold a read lock and both request an upgrade would
/// deadlock: each waits for the other to release its read lock. The lock
/// detects this and fails the second request with this error.
///
/// This is an expected control-flow event, not a bug. The recovery protocol
/// is fixed: release the read lock, call `upgrade_yield` to let the winning
/// upgrader finish, and retry the read section from the top. See the crate
/// docs for a worked example.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpgradeConflict;

impl std::fmt::Display for UpgradeConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "read lock upgrade lost to a concurrent upgrader")
    }
}

impl std::error::Error for UpgradeConflict {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_conflict_debug_clone_copy_eq_display() {
        let conflict = UpgradeConflict;

        let dbg = format!("{conflict:?}");
        assert!(dbg.contains("UpgradeConflict"));

        let copied = conflict;
        assert_eq!(copied, UpgradeConflict);

        assert!(conflict.to_string().contains("concurrent upgrader"));
    }
}
