//! External command execution.
//!
//! This module provides the bounded, one-shot process runner used for
//! every check and reload:
//! - Shell-style command line parsing (no shell involved)
//! - Combined stdout/stderr capture
//! - Timeout watchdog that kills the whole process group
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use lb_adapter::execution::{CommandRunner, CommandSpec};
//!
//! let spec = CommandSpec::parse("nginx -t", Duration::from_secs(10)).unwrap();
//! let result = CommandRunner::new().run(&spec).unwrap();
//! println!("exit {}: {}", result.exit_code, result.output);
//! ```

mod command;
mod result;
mod runner;

pub use command::{split_command_line, CommandLineError, CommandSpec, ExitCodes};
pub use result::ExecutionResult;
pub use runner::{CommandRunner, DEFAULT_POLL_INTERVAL};
