//! Error types for lb-adapter.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// How an external command ended when it did not complete normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Exited with a code outside the accepted set.
    Exited(i32),
    /// Killed by a signal it did not expect.
    Signaled(i32),
    /// Exceeded its timeout and was killed by the watchdog.
    TimedOut(Duration),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(sig) => write!(f, "terminated by signal {}", sig),
            Self::TimedOut(after) => write!(f, "timed out after {}ms", after.as_millis()),
        }
    }
}

/// Main error type for lb-adapter operations.
#[derive(Error, Debug)]
pub enum LbAdapterError {
    /// The external command ran but did not complete normally.
    #[error("command '{command}' {termination}")]
    Execution {
        /// Combined stdout/stderr captured up to termination.
        output: String,
        termination: Termination,
        command: String,
    },

    /// The command could not be spawned, waited on, or decoded.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration under test was rejected by the check command.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No reload permit was granted within the allowed wait.
    #[error("{message} (command '{command}')")]
    RateLimited { message: String, command: String },
}

impl LbAdapterError {
    /// Captured output carried by an execution failure, if any.
    pub fn output(&self) -> Option<&str> {
        match self {
            Self::Execution { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Whether the failure was a watchdog timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Execution {
                termination: Termination::TimedOut(_),
                ..
            }
        )
    }
}

/// Convenience Result type for lb-adapter operations.
pub type Result<T> = std::result::Result<T, LbAdapterError>;
