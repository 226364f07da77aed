//! Execution result types.

use std::time::Duration;

/// Outcome of a command that completed normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    /// Exit code, verbatim from the process.
    pub exit_code: i32,
    /// Combined stdout/stderr, in the order the process wrote it.
    pub output: String,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
}

impl ExecutionResult {
    /// Create a new execution result.
    pub fn new(exit_code: i32, output: String, duration: Duration) -> Self {
        Self {
            exit_code,
            output,
            duration,
        }
    }
}
