//! Adapter integration tests.
//!
//! These run real commands through `/bin/sh`. Reload commands append a line
//! to a scratch file so tests can count how many processes actually ran.
#![cfg(unix)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use lb_adapter::{
    CommandRunner, CommandSpec, ConfigAdapter, LbAdapterError, LbConfig, RateLimiter,
    ReloadLimit, Termination, RATE_LIMITED_MESSAGE,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn sh(script: &str) -> CommandSpec {
    CommandSpec::new("sh", ["-c", script], TIMEOUT).unwrap()
}

/// A reload command that records each run in `log`.
fn counting_reload(log: &Path) -> CommandSpec {
    sh(&format!("echo reloaded >> '{}'", log.display()))
}

fn reload_count(log: &Path) -> usize {
    std::fs::read_to_string(log)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

fn adapter_with(log: &Path, wait: Duration, limit: ReloadLimit) -> ConfigAdapter {
    ConfigAdapter::new(sh("exit 0"), counting_reload(log), wait, limit)
}

// ============================================================================
// Command Runner
// ============================================================================

#[test]
fn test_runner_reports_true_exit_code_and_output() {
    for code in [0, 1, 2, 42] {
        let spec = sh(&format!("printf 'code %s' {code}; exit {code}")).accept_any_exit_code();
        let result = CommandRunner::new().run(&spec).unwrap();
        assert_eq!(result.exit_code, code);
        assert_eq!(result.output, format!("code {code}"));
    }
}

#[test]
fn test_runner_timeout_output_is_prefix() {
    let spec = CommandSpec::new(
        "sh",
        ["-c", "echo one; echo two; sleep 10; echo three"],
        Duration::from_millis(400),
    )
    .unwrap();

    let start = Instant::now();
    let err = CommandRunner::new().run(&spec).unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));

    match err {
        LbAdapterError::Execution {
            output,
            termination,
            ..
        } => {
            assert_eq!(termination, Termination::TimedOut(Duration::from_millis(400)));
            assert!("one\ntwo\nthree\n".starts_with(&output));
            assert_eq!(output, "one\ntwo\n");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_runner_timeout_kills_process() {
    let marker = NamedTempFile::new().unwrap();
    let script = format!("sleep 1; echo survived > '{}'", marker.path().display());
    let spec = CommandSpec::new("sh", ["-c", script.as_str()], Duration::from_millis(200)).unwrap();

    assert!(CommandRunner::new().run(&spec).unwrap_err().is_timeout());

    // Had the shell survived the kill it would write the marker by now.
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(std::fs::read_to_string(marker.path()).unwrap(), "");
}

// ============================================================================
// Check
// ============================================================================

#[test]
fn test_check_zero_exit_is_ok() {
    let adapter = ConfigAdapter::new(
        sh("echo 'configuration file test is successful'"),
        sh("exit 0"),
        Duration::ZERO,
        ReloadLimit::Unlimited,
    );
    adapter.check_configs().unwrap();
}

#[test]
fn test_check_nonzero_exit_is_invalid_config() {
    let adapter = ConfigAdapter::new(
        sh("echo '[emerg] unknown directive' 1>&2; exit 1"),
        sh("exit 0"),
        Duration::ZERO,
        ReloadLimit::Unlimited,
    );
    match adapter.check_configs() {
        Err(LbAdapterError::InvalidConfig(output)) => {
            assert_eq!(output, "[emerg] unknown directive\n");
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_check_timeout_is_invalid_config() {
    let check = CommandSpec::new("sh", ["-c", "echo hanging; sleep 10"], Duration::from_millis(200))
        .unwrap();
    let adapter = ConfigAdapter::new(check, sh("exit 0"), Duration::ZERO, ReloadLimit::Unlimited);
    match adapter.check_configs() {
        Err(LbAdapterError::InvalidConfig(output)) => assert_eq!(output, "hanging\n"),
        other => panic!("unexpected result: {other:?}"),
    }
}

// ============================================================================
// Reload
// ============================================================================

#[test]
fn test_unlimited_reload_always_runs() {
    let log = NamedTempFile::new().unwrap();
    let adapter = adapter_with(log.path(), Duration::ZERO, ReloadLimit::Unlimited);

    for _ in 0..5 {
        adapter.reload_configs_rate_limited().unwrap();
    }
    assert_eq!(reload_count(log.path()), 5);
}

#[test]
fn test_exhausted_limiter_refuses_without_spawning() {
    let log = NamedTempFile::new().unwrap();
    let limiter = RateLimiter::shared(0.5).unwrap();
    assert!(limiter.try_acquire(Duration::ZERO));

    let adapter = adapter_with(log.path(), Duration::ZERO, ReloadLimit::Limited(limiter));
    let start = Instant::now();
    match adapter.reload_configs_rate_limited() {
        Err(LbAdapterError::RateLimited { message, command }) => {
            assert_eq!(message, RATE_LIMITED_MESSAGE);
            assert_eq!(command, adapter.reload_command().command_line());
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(reload_count(log.path()), 0);
}

#[test]
fn test_limiter_wait_long_enough_runs_once() {
    let log = NamedTempFile::new().unwrap();
    let limiter = RateLimiter::shared(5.0).unwrap();
    assert!(limiter.try_acquire(Duration::ZERO));

    let adapter = adapter_with(
        log.path(),
        Duration::from_millis(1000),
        ReloadLimit::Limited(limiter),
    );
    adapter.reload_configs_rate_limited().unwrap();
    assert_eq!(reload_count(log.path()), 1);
}

#[test]
fn test_reload_failure_propagates_unchanged() {
    let adapter = ConfigAdapter::new(
        sh("exit 0"),
        sh("echo 'pid file missing'; exit 1"),
        Duration::ZERO,
        ReloadLimit::Unlimited,
    );
    match adapter.reload_configs_rate_limited() {
        Err(LbAdapterError::Execution {
            output,
            termination,
            command,
        }) => {
            assert_eq!(output, "pid file missing\n");
            assert_eq!(termination, Termination::Exited(1));
            assert_eq!(command, adapter.reload_command().command_line());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn test_reload_spawn_failure_is_io_error() {
    let reload = CommandSpec::parse("/nonexistent/reload-tool", TIMEOUT).unwrap();
    let adapter = ConfigAdapter::new(sh("exit 0"), reload, Duration::ZERO, ReloadLimit::Unlimited);
    assert!(matches!(
        adapter.reload_configs(),
        Err(LbAdapterError::Io(_))
    ));
}

#[test]
fn test_adapters_share_one_limiter() {
    let log = NamedTempFile::new().unwrap();
    let config = LbConfig::default();
    let limit = ReloadLimit::per_second(0.5).unwrap();

    let first = adapter_with(log.path(), Duration::ZERO, limit.clone());
    let second = ConfigAdapter::new(
        config.check_spec().unwrap(),
        counting_reload(log.path()),
        Duration::ZERO,
        limit,
    );

    first.reload_configs_rate_limited().unwrap();
    assert!(matches!(
        second.reload_configs_rate_limited(),
        Err(LbAdapterError::RateLimited { .. })
    ));
    assert_eq!(reload_count(log.path()), 1);
}

#[test]
fn test_independent_limiters_do_not_interfere() {
    let log = NamedTempFile::new().unwrap();
    let first = adapter_with(log.path(), Duration::ZERO, ReloadLimit::per_second(0.5).unwrap());
    let second = adapter_with(log.path(), Duration::ZERO, ReloadLimit::per_second(0.5).unwrap());

    first.reload_configs_rate_limited().unwrap();
    second.reload_configs_rate_limited().unwrap();
    assert_eq!(reload_count(log.path()), 2);
}

#[test]
fn test_concurrent_reloads_respect_rate() {
    let log = NamedTempFile::new().unwrap();
    let adapter = Arc::new(adapter_with(
        log.path(),
        Duration::ZERO,
        ReloadLimit::per_second(1.0).unwrap(),
    ));
    let granted = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let adapter = Arc::clone(&adapter);
            let granted = Arc::clone(&granted);
            let refused = Arc::clone(&refused);
            thread::spawn(move || match adapter.reload_configs_rate_limited() {
                Ok(()) => {
                    granted.fetch_add(1, Ordering::SeqCst);
                }
                Err(LbAdapterError::RateLimited { .. }) => {
                    refused.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => panic!("unexpected error: {e}"),
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(granted.load(Ordering::SeqCst), 1);
    assert_eq!(refused.load(Ordering::SeqCst), 5);
    assert_eq!(reload_count(log.path()), granted.load(Ordering::SeqCst));
}

#[test]
fn test_concurrent_waiters_are_spaced_by_rate() {
    let log = NamedTempFile::new().unwrap();
    let adapter = Arc::new(adapter_with(
        log.path(),
        Duration::from_secs(2),
        ReloadLimit::per_second(10.0).unwrap(),
    ));

    let start = Instant::now();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let adapter = Arc::clone(&adapter);
            thread::spawn(move || adapter.reload_configs_rate_limited())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    // Four permits at ten per second: the last waits about 300ms.
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(reload_count(log.path()), 4);
}
