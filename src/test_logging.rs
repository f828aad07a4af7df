//! Structured logging for tests.
//!
//! Concurrency failures are miserable to debug from a bare assertion
//! message. This module gives tests a process-wide [`TestLogger`] that
//! records typed, timestamped events; on a failed assertion the macros
//! below dump the recent history so the interleaving that led to the
//! failure is visible.
//!
//! # Usage
//!
//! ```ignore
//! use warden::test_logging::init_test_logging;
//!
//! #[test]
//! fn my_test() {
//!     init_test_logging();
//!     warden::test_phase!("my_test");
//!     // ...
//!     warden::assert_with_log!(count == 2, "both writers ran", 2, count);
//!     warden::test_complete!("my_test");
//! }
//! ```
//!
//! Verbosity is controlled by the `WARDEN_TEST_LOG` environment variable
//! (`error`, `warn`, `info`, `debug`, `trace`); the default is `info`.
//! At `info` and below, passing assertions are recorded but not printed.

use std::fmt::Write as _;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

/// Logging verbosity, ordered from least to most verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum TestLogLevel {
    /// Only failures.
    Error,
    /// Suspicious but non-fatal events.
    Warn,
    /// Test phases and completions.
    #[default]
    Info,
    /// Individual assertions as they pass.
    Debug,
    /// Everything.
    Trace,
}

impl TestLogLevel {
    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warn => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
            Self::Trace => "TRACE",
        }
    }

    fn from_env() -> Self {
        match std::env::var("WARDEN_TEST_LOG").as_deref() {
            Ok("error") => Self::Error,
            Ok("warn") => Self::Warn,
            Ok("debug") => Self::Debug,
            Ok("trace") => Self::Trace,
            _ => Self::Info,
        }
    }
}

/// A recorded test event.
#[derive(Debug, Clone)]
pub enum TestEvent {
    /// A named test (or test section) started.
    Phase {
        /// Test or section name.
        name: String,
    },
    /// A named test finished without failing.
    Complete {
        /// Test or section name.
        name: String,
    },
    /// An assertion passed.
    AssertPass {
        /// What was checked.
        what: String,
    },
    /// An assertion failed; the logger dumps its history when recording
    /// this.
    AssertFail {
        /// What was checked.
        what: String,
        /// Expected and actual, pre-rendered.
        detail: String,
    },
    /// Free-form commentary from a test.
    Note {
        /// The message.
        message: String,
    },
}

impl TestEvent {
    fn level(&self) -> TestLogLevel {
        match self {
            Self::AssertFail { .. } => TestLogLevel::Error,
            Self::Phase { .. } | Self::Complete { .. } => TestLogLevel::Info,
            Self::AssertPass { .. } => TestLogLevel::Debug,
            Self::Note { .. } => TestLogLevel::Trace,
        }
    }

    fn render(&self) -> String {
        match self {
            Self::Phase { name } => format!("phase {name}"),
            Self::Complete { name } => format!("complete {name}"),
            Self::AssertPass { what } => format!("ok: {what}"),
            Self::AssertFail { what, detail } => format!("FAILED: {what} ({detail})"),
            Self::Note { message } => message.clone(),
        }
    }
}

/// Captures events with timestamps and renders a report on demand.
#[derive(Debug)]
pub struct TestLogger {
    level: TestLogLevel,
    started: Instant,
    events: Mutex<Vec<(std::time::Duration, TestEvent)>>,
}

impl TestLogger {
    /// Creates a logger that prints events at or below `level`.
    #[must_use]
    pub fn new(level: TestLogLevel) -> Self {
        Self {
            level,
            started: Instant::now(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Records an event; failures echo the recent history to stderr.
    pub fn log(&self, event: TestEvent) {
        let at = self.started.elapsed();
        let event_level = event.level();
        if event_level <= self.level {
            eprintln!(
                "[{:>10.3?}] {:5} {}",
                at,
                event_level.name(),
                event.render()
            );
        }
        let mut events = self.events.lock().expect("test logger poisoned");
        events.push((at, event));

        if matches!(events.last(), Some((_, TestEvent::AssertFail { .. }))) {
            let tail = events.len().saturating_sub(32);
            eprintln!("--- last events before failure ---");
            for (at, event) in &events[tail..] {
                eprintln!("[{:>10.3?}] {}", at, event.render());
            }
        }
    }

    /// Renders the full captured history.
    #[must_use]
    pub fn report(&self) -> String {
        let events = self.events.lock().expect("test logger poisoned");
        let mut out = String::new();
        for (at, event) in events.iter() {
            let _ = writeln!(out, "[{:>10.3?}] {}", at, event.render());
        }
        out
    }
}

static GLOBAL: OnceLock<TestLogger> = OnceLock::new();

/// Installs the process-wide logger (idempotent) and returns it.
pub fn init_test_logging() -> &'static TestLogger {
    GLOBAL.get_or_init(|| TestLogger::new(TestLogLevel::from_env()))
}

/// The process-wide logger; installs a default one on first use.
pub fn global() -> &'static TestLogger {
    init_test_logging()
}

/// Marks the start of a named test.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::test_logging::global().log($crate::test_logging::TestEvent::Phase {
            name: ($name).to_string(),
        });
    };
}

/// Marks the successful end of a named test.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::test_logging::global().log($crate::test_logging::TestEvent::Complete {
            name: ($name).to_string(),
        });
    };
}

/// Asserts `$cond`, logging the check either way.
///
/// On failure the logger dumps its recent history before the panic, so
/// the thread interleaving leading up to the failure is on screen.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        if $cond {
            $crate::test_logging::global().log($crate::test_logging::TestEvent::AssertPass {
                what: ($what).to_string(),
            });
        } else {
            let detail = format!("expected {:?}, got {:?}", $expected, $actual);
            $crate::test_logging::global().log($crate::test_logging::TestEvent::AssertFail {
                what: ($what).to_string(),
                detail: detail.clone(),
            });
            panic!("assertion failed: {}: {}", $what, detail);
        }
    };
}
