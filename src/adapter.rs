//! Check and reload of load-balancer configuration.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::LbAdapterError;
use crate::execution::{CommandRunner, CommandSpec};
use crate::rate_limit::ReloadLimit;
use crate::Result;

/// Message carried by [`LbAdapterError::RateLimited`].
pub const RATE_LIMITED_MESSAGE: &str = "Config reload rate limit exceeded";

/// Runs the configured check and reload commands.
///
/// Check failures mean "the configuration is bad" and come back as
/// [`LbAdapterError::InvalidConfig`]. Reload failures mean "the tool broke"
/// and come back untouched from the runner.
#[derive(Debug, Clone)]
pub struct ConfigAdapter {
    check: CommandSpec,
    reload: CommandSpec,
    max_reload_wait: Duration,
    limit: ReloadLimit,
    runner: CommandRunner,
}

impl ConfigAdapter {
    /// Create an adapter.
    ///
    /// `max_reload_wait` bounds how long a reload may queue for a permit;
    /// the commands' own timeouts bound how long they may run.
    pub fn new(
        check: CommandSpec,
        reload: CommandSpec,
        max_reload_wait: Duration,
        limit: ReloadLimit,
    ) -> Self {
        Self {
            check,
            reload,
            max_reload_wait,
            limit,
            runner: CommandRunner::new(),
        }
    }

    /// Use a specific runner.
    pub fn with_runner(mut self, runner: CommandRunner) -> Self {
        self.runner = runner;
        self
    }

    pub fn check_command(&self) -> &CommandSpec {
        &self.check
    }

    pub fn reload_command(&self) -> &CommandSpec {
        &self.reload
    }

    pub fn max_reload_wait(&self) -> Duration {
        self.max_reload_wait
    }

    pub fn reload_limit(&self) -> &ReloadLimit {
        &self.limit
    }

    /// Validate the configuration on disk with the check command.
    pub fn check_configs(&self) -> Result<()> {
        let start = Instant::now();
        match self.runner.run(&self.check) {
            Ok(result) => {
                info!(
                    command = %self.check,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    exit_code = result.exit_code,
                    "Checked configs"
                );
                Ok(())
            }
            Err(LbAdapterError::Execution {
                output,
                termination,
                ..
            }) => {
                warn!(command = %self.check, %termination, "Config check failed");
                Err(LbAdapterError::InvalidConfig(output))
            }
            Err(LbAdapterError::Io(e)) => {
                warn!(command = %self.check, error = %e, "Config check could not run");
                Err(LbAdapterError::InvalidConfig(e.to_string()))
            }
            Err(other) => Err(other),
        }
    }

    /// Reload once a permit is available, or fail with
    /// [`LbAdapterError::RateLimited`] after `max_reload_wait`.
    ///
    /// A refused reload never spawns a process.
    pub fn reload_configs_rate_limited(&self) -> Result<()> {
        match &self.limit {
            ReloadLimit::Unlimited => self.reload_configs(),
            ReloadLimit::Limited(limiter) => {
                if limiter.try_acquire(self.max_reload_wait) {
                    self.reload_configs()
                } else {
                    warn!(
                        command = %self.reload,
                        max_wait_ms = self.max_reload_wait.as_millis() as u64,
                        "Config reload refused by rate limiter"
                    );
                    Err(LbAdapterError::RateLimited {
                        message: RATE_LIMITED_MESSAGE.to_string(),
                        command: self.reload.command_line().to_string(),
                    })
                }
            }
        }
    }

    /// Reload unconditionally, bypassing the rate limiter.
    pub fn reload_configs(&self) -> Result<()> {
        let start = Instant::now();
        let result = self.runner.run(&self.reload)?;
        info!(
            command = %self.reload,
            elapsed_ms = start.elapsed().as_millis() as u64,
            exit_code = result.exit_code,
            "Reloaded configs"
        );
        Ok(())
    }
}
