//! lb-adapter binary entry point.

use std::process::ExitCode;

use lb_adapter::cli::{self, exit_code_for, Action, EXIT_USAGE};
use lb_adapter::{logging, LbConfig};
use tracing::{debug, error};

fn main() -> ExitCode {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("error: {}", e);
            eprintln!("Try 'lb-adapter --help' for more information.");
            return ExitCode::from(EXIT_USAGE);
        }
    };

    if args.help {
        cli::print_help();
        return ExitCode::SUCCESS;
    }
    if args.version {
        cli::print_version();
        return ExitCode::SUCCESS;
    }

    let Some(action) = args.action else {
        eprintln!("error: missing action (check or reload)");
        eprintln!("Try 'lb-adapter --help' for more information.");
        return ExitCode::from(EXIT_USAGE);
    };

    let config = match LbConfig::load(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    logging::try_init_with_level(config.log_filter()).ok();
    debug!(?config, "Loaded configuration");

    let adapter = match config.to_adapter() {
        Ok(adapter) => adapter,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let outcome = match action {
        Action::Check => adapter.check_configs(),
        Action::Reload => adapter.reload_configs_rate_limited(),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "{:?} failed", action);
            if let Some(output) = e.output() {
                eprint!("{}", output);
            }
            eprintln!("error: {}", e);
            ExitCode::from(exit_code_for(&e))
        }
    }
}
