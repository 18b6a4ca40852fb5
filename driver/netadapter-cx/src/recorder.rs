//! In-memory recorder log
//!
//! Keeps the most recent log lines around so that they can be inspected from
//! a crash dump or a debugger, without ever allocating while logging.

use core::fmt::Write;

use heapless::{Deque, String};
use log::{Level, Metadata, Record};

use crate::sync::SpinMutex;

// Reexport for the init macro
#[doc(hidden)]
pub use log::{set_logger, set_max_level};

/// Maximum length of a single recorded line, in bytes
pub const LINE_CAPACITY: usize = 256;

pub type Line = String<LINE_CAPACITY>;

const OVERFLOW_LINE: &str = "ERROR [netadapter_cx] overflow while formatting recorder line";

/// A [`log::Log`] that keeps the last `N` formatted lines
pub struct RecorderLog<const N: usize> {
    lines: SpinMutex<Deque<Line, N>>,
    min_level: Level,
}

impl<const N: usize> RecorderLog<N> {
    pub const fn new() -> Self {
        Self::with_level(Level::Trace)
    }

    /// Only records lines at `min_level` or more severe
    pub const fn with_level(min_level: Level) -> Self {
        Self {
            lines: SpinMutex::new(Deque::new()),
            min_level,
        }
    }

    /// Number of lines currently held
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Visits each held line, oldest first
    ///
    /// The recorder is locked while visiting, so `f` must not log.
    pub fn for_each_line(&self, mut f: impl FnMut(&str)) {
        let lines = self.lines.lock();
        for line in lines.iter() {
            f(line.as_str());
        }
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    fn push(&self, line: Line) {
        let mut lines = self.lines.lock();

        if lines.is_full() {
            let _ = lines.pop_front();
        }

        // Space was made above
        let _ = lines.push_back(line);
    }
}

impl<const N: usize> Default for RecorderLog<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the recorder log as the global logger
///
/// Evaluates to `Some(&'static RecorderLog)` if this was the first logger to be
/// installed, or `None` if some other logger got there first.
#[macro_export(local_inner_macros)]
macro_rules! init_recorder_log {
    ($lines:expr, $level:expr) => {{
        static RECORDER: $crate::recorder::RecorderLog<{ $lines }> =
            $crate::recorder::RecorderLog::new();

        match $crate::recorder::set_logger(&RECORDER) {
            Ok(()) => {
                $crate::recorder::set_max_level($level);
                Some(&RECORDER)
            }
            Err(_) => None,
        }
    }};
}

impl<const N: usize> log::Log for RecorderLog<N> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.min_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = Line::new();

        let status = write!(
            &mut line,
            "{:<5} [{}] {}",
            record.level(),
            record.target(),
            record.args()
        );

        if status.is_err() {
            line.clear();
            // Always fits
            let _ = line.push_str(OVERFLOW_LINE);
        }

        self.push(line);
    }

    fn flush(&self) {}
}
