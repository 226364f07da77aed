//! Command-line interface for lb-adapter.
//!
//! Uses lexopt for minimal binary size overhead.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::error::LbAdapterError;
use crate::rate_limit::check_rate;

/// The check command rejected the configuration.
pub const EXIT_INVALID_CONFIG: u8 = 1;
/// A command failed, timed out, or could not be spawned.
pub const EXIT_EXECUTION: u8 = 2;
/// The reload was refused by the rate limiter.
pub const EXIT_RATE_LIMITED: u8 = 3;
/// Bad arguments or configuration.
pub const EXIT_USAGE: u8 = 64;

/// Map an adapter error to the process exit code.
pub fn exit_code_for(err: &LbAdapterError) -> u8 {
    match err {
        LbAdapterError::InvalidConfig(_) => EXIT_INVALID_CONFIG,
        LbAdapterError::Execution { .. } | LbAdapterError::Io(_) => EXIT_EXECUTION,
        LbAdapterError::RateLimited { .. } => EXIT_RATE_LIMITED,
    }
}

/// What the binary should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Run the check command.
    Check,
    /// Run the reload command through the rate limiter.
    Reload,
}

impl std::str::FromStr for Action {
    type Err = ArgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check" => Ok(Self::Check),
            "reload" => Ok(Self::Reload),
            other => Err(ArgsError::UnexpectedArgument(other.to_string())),
        }
    }
}

/// Command-line arguments.
#[derive(Debug, Clone, Default)]
pub struct Args {
    /// Action to perform.
    pub action: Option<Action>,
    /// Path to configuration file.
    pub config: Option<PathBuf>,
    /// Check command override.
    pub check_command: Option<String>,
    /// Reload command override.
    pub reload_command: Option<String>,
    /// Command timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Reload permit wait override, in milliseconds.
    pub max_wait_ms: Option<u64>,
    /// Reload rate override, in permits per second.
    pub rate: Option<f64>,
    /// Disable rate limiting.
    pub no_rate_limit: bool,
    /// Log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
    /// Show version and exit.
    pub version: bool,
    /// Show help and exit.
    pub help: bool,
}

/// Parse command-line arguments.
pub fn parse_args() -> Result<Args, ArgsError> {
    parse_args_from(std::env::args_os())
}

/// Parse arguments from an iterator (for testing).
pub fn parse_args_from<I>(args: I) -> Result<Args, ArgsError>
where
    I: IntoIterator<Item = OsString>,
{
    use lexopt::prelude::*;

    let mut result = Args::default();
    let mut parser = lexopt::Parser::from_iter(args);

    while let Some(arg) = parser.next()? {
        match arg {
            Short('h') | Long("help") => {
                result.help = true;
            }
            Short('V') | Long("version") => {
                result.version = true;
            }
            Short('c') | Long("config") => {
                result.config = Some(parser.value()?.parse()?);
            }
            Long("check-command") => {
                result.check_command = Some(parser.value()?.parse()?);
            }
            Long("reload-command") => {
                result.reload_command = Some(parser.value()?.parse()?);
            }
            Short('t') | Long("timeout-ms") => {
                let value: String = parser.value()?.parse()?;
                let timeout: u64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("timeout-ms", value.clone()))?;
                if timeout == 0 {
                    return Err(ArgsError::InvalidValue("timeout-ms", value));
                }
                result.timeout_ms = Some(timeout);
            }
            Short('w') | Long("max-wait-ms") => {
                let value: String = parser.value()?.parse()?;
                result.max_wait_ms = Some(
                    value
                        .parse()
                        .map_err(|_| ArgsError::InvalidValue("max-wait-ms", value))?,
                );
            }
            Short('r') | Long("rate") => {
                let value: String = parser.value()?.parse()?;
                let rate: f64 = value
                    .parse()
                    .map_err(|_| ArgsError::InvalidValue("rate", value.clone()))?;
                if check_rate(rate).is_err() {
                    return Err(ArgsError::InvalidValue("rate", value));
                }
                result.rate = Some(rate);
            }
            Long("no-rate-limit") => {
                result.no_rate_limit = true;
            }
            Short('l') | Long("log-level") => {
                result.log_level = Some(parser.value()?.parse()?);
            }
            Value(val) if result.action.is_none() => {
                result.action = Some(val.to_string_lossy().parse()?);
            }
            Value(val) => {
                return Err(ArgsError::UnexpectedArgument(val.to_string_lossy().into()));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }

    Ok(result)
}

/// Print help message.
pub fn print_help() {
    let version = env!("CARGO_PKG_VERSION");
    println!(
        r#"lb-adapter {version}
Check and reload load-balancer configuration via external commands

USAGE:
    lb-adapter [OPTIONS] <check|reload>

ACTIONS:
    check                       Run the check command; exit 1 if the config is invalid
    reload                      Run the reload command once a rate-limit permit is granted

OPTIONS:
    -c, --config <FILE>         Path to configuration file (JSON)
        --check-command <CMD>   Command that validates the configuration
        --reload-command <CMD>  Command that reloads the load balancer
    -t, --timeout-ms <MS>       Command timeout in milliseconds [default: 10000]
    -w, --max-wait-ms <MS>      Longest wait for a reload permit [default: 0]
    -r, --rate <N>              Reload permits per second
        --no-rate-limit         Disable reload rate limiting
    -l, --log-level <LVL>       Log level (error, warn, info, debug, trace)
    -h, --help                  Print help
    -V, --version               Print version

ENVIRONMENT VARIABLES:
    LB_ADAPTER_CHECK_COMMAND        Check command (overrides config)
    LB_ADAPTER_RELOAD_COMMAND       Reload command (overrides config)
    LB_ADAPTER_COMMAND_TIMEOUT_MS   Command timeout (overrides config)
    LB_ADAPTER_MAX_RELOAD_WAIT_MS   Reload permit wait (overrides config)
    LB_ADAPTER_RELOAD_RATE_LIMIT    Reload rate; empty disables (overrides config)
    LB_ADAPTER_LOG_LEVEL            Log level (overrides config)
    RUST_LOG                        Alternative log level setting

EXIT CODES:
    0   success
    1   configuration is invalid
    2   command failed, timed out, or could not run
    3   reload refused by the rate limiter
    64  usage or configuration error

EXAMPLES:
    # Validate nginx configuration
    lb-adapter check

    # Reload haproxy at most once every two seconds, queueing up to 5s
    lb-adapter --reload-command "systemctl reload haproxy" -r 0.5 -w 5000 reload
"#
    );
}

/// Print version.
pub fn print_version() {
    println!("lb-adapter {}", env!("CARGO_PKG_VERSION"));
}

/// Argument parsing errors.
#[derive(Debug)]
pub enum ArgsError {
    /// Lexopt parsing error.
    Lexopt(lexopt::Error),
    /// Invalid argument value.
    InvalidValue(&'static str, String),
    /// Unexpected positional argument.
    UnexpectedArgument(String),
}

impl std::fmt::Display for ArgsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lexopt(e) => write!(f, "{}", e),
            Self::InvalidValue(name, value) => {
                write!(f, "invalid value for --{}: '{}'", name, value)
            }
            Self::UnexpectedArgument(arg) => {
                write!(f, "unexpected argument: '{}'", arg)
            }
        }
    }
}

impl std::error::Error for ArgsError {}

impl From<lexopt::Error> for ArgsError {
    fn from(e: lexopt::Error) -> Self {
        Self::Lexopt(e)
    }
}
