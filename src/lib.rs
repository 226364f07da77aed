//! # lb-adapter
//!
//! Check and reload load-balancer configuration through external commands.
//!
//! This crate sits between a load-balancer control process and the tools
//! that validate and apply configuration on a host (`nginx -t`,
//! `haproxy -c`, `nginx -s reload`, ...). It never interprets the
//! configuration itself; exit status and captured output are the only
//! signals.
//!
//! ## Features
//!
//! - **Bounded execution**: every command runs under a wall-clock timeout;
//!   on expiry its whole process group is killed and reaped
//! - **Combined output**: stdout and stderr captured in write order
//! - **Reload rate limiting**: a shared token bucket keeps bursts of reload
//!   requests from overwhelming the load balancer
//! - **Typed failures**: invalid configuration, command failure and rate
//!   limiting are distinct errors
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use lb_adapter::{CommandSpec, ConfigAdapter, ReloadLimit};
//!
//! fn main() -> lb_adapter::Result<()> {
//!     lb_adapter::logging::try_init().ok();
//!
//!     let timeout = Duration::from_secs(10);
//!     let adapter = ConfigAdapter::new(
//!         CommandSpec::parse("nginx -t", timeout).unwrap(),
//!         CommandSpec::parse("nginx -s reload", timeout).unwrap(),
//!         Duration::from_secs(2),
//!         ReloadLimit::per_second(0.5).unwrap(),
//!     );
//!
//!     adapter.check_configs()?;
//!     adapter.reload_configs_rate_limited()?;
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod cli;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod rate_limit;

// Re-export commonly used types
pub use adapter::{ConfigAdapter, RATE_LIMITED_MESSAGE};
pub use config::{ConfigError, LbConfig};
pub use error::{LbAdapterError, Result, Termination};
pub use execution::{CommandRunner, CommandSpec, ExecutionResult};
pub use rate_limit::{RateLimiter, ReloadLimit};
