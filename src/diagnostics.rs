//! Diagnostic accumulation: the crate's logging surface.
//!
//! There is no tracing/log-facade dependency here — diagnostics are a
//! first-class part of the data model (every warning/error is attributed to
//! a `(file, line, column)` triple recorded on the `Value` that triggered
//! it) so they are collected into a plain in-memory sink rather than routed
//! through an external logger.

use std::fmt;

use crate::value::Loc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub level: Level,
    pub loc: Loc,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.level {
            Level::Warning => "warning",
            Level::Error => "error",
        };
        write!(f, "{}:{}:{}: {}: {}", self.loc.file, self.loc.line, self.loc.column, kind, self.message)
    }
}

/// Accumulates diagnostics and the process-global warning/error counters.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Vec<Diagnostic>,
    warnings: u32,
    errors: u32,
    werror: bool,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `-Werror`: promote every subsequently recorded warning to an error.
    pub fn set_werror(&mut self, werror: bool) {
        self.werror = werror;
    }

    pub fn warn(&mut self, loc: Loc, message: impl Into<String>) {
        let level = if self.werror { Level::Error } else { Level::Warning };
        self.record(level, loc, message);
    }

    pub fn error(&mut self, loc: Loc, message: impl Into<String>) {
        self.record(Level::Error, loc, message);
    }

    fn record(&mut self, level: Level, loc: Loc, message: impl Into<String>) {
        match level {
            Level::Warning => self.warnings += 1,
            Level::Error => self.errors += 1,
        }
        self.entries.push(Diagnostic { level, loc, message: message.into() });
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }
}
