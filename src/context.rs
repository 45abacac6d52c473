//! Per-run diagnostic context threaded through every component call.
//!
//! There is deliberately no process-wide logger. Each run owns a
//! [`RunContext`] carrying a correlation id, an optional overall deadline,
//! and an accumulating diagnostic log. Entries are echoed to stderr for the
//! operator and retained in memory so failures can report everything that
//! was tried (locations, instance name, teardown notes).

use std::io::{self, Write};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Diagnostic context for a single orchestrated run.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    deadline: Option<Instant>,
    entries: Mutex<Vec<String>>,
    echo: bool,
}

impl RunContext {
    /// Creates a context with a fresh correlation id and no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            deadline: None,
            entries: Mutex::new(Vec::new()),
            echo: true,
        }
    }

    /// Creates a context whose run must finish within `timeout`.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut ctx = Self::new();
        ctx.deadline = Some(Instant::now() + timeout);
        ctx
    }

    /// Creates a silent context for tests; entries accumulate but nothing is
    /// written to stderr.
    #[must_use]
    pub fn silent() -> Self {
        let mut ctx = Self::new();
        ctx.echo = false;
        ctx
    }

    /// Returns the correlation id for this run.
    #[must_use]
    pub const fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Records a diagnostic entry and echoes it to stderr.
    pub fn note(&self, message: impl Into<String>) {
        let message = message.into();
        if self.echo {
            let mut stderr = io::stderr();
            writeln!(stderr, "[{}] {message}", self.run_id.simple()).ok();
        }
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(message);
        }
    }

    /// Returns a snapshot of the accumulated diagnostic log.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Returns the time remaining before the run deadline, when one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns `true` when a deadline is set and has already passed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}
