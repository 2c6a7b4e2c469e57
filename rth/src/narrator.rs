//! Console narration.
//!
//! The user-facing run transcript, distinct from the `tracing` logs:
//! `[<elapsed> info|warning|error|test] <message>` lines, colored by
//! severity.

use colored::Colorize;
use std::time::Instant;

/// Narration severity. `Test` marks test-scoped lines (framework status
/// and failure narration) apart from harness-level info/warning/error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Test,
}

pub struct Narrator {
    started: Instant,
}

impl Narrator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn narrate(&self, severity: Severity, message: &str) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let tag = match severity {
            Severity::Info => "info".green(),
            Severity::Warning => "warning".yellow(),
            Severity::Error => "error".red(),
            Severity::Test => "test".cyan(),
        };
        println!("[{elapsed:8.2} {tag}] {message}");
    }

    pub fn info(&self, message: &str) {
        self.narrate(Severity::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.narrate(Severity::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.narrate(Severity::Error, message);
    }

    pub fn test(&self, message: &str) {
        self.narrate(Severity::Test, message);
    }

    /// Visual separator between test file runs.
    pub fn blank_line(&self) {
        println!();
    }
}

impl Default for Narrator {
    fn default() -> Self {
        Self::new()
    }
}
