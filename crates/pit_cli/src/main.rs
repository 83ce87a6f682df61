//! pit-state CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or configuration
//! - 3: State not found
//! - 4: State not ready in time

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pit_state::StateError;

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_CONFIG: u8 = 2;
    pub const NOT_FOUND: u8 = 3;
    pub const NOT_READY: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(cli.verbose)));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Build(args) => commands::build::execute(args, &cli.daemon).await,
        Commands::Start(args) => commands::start::execute(args, &cli.daemon).await,
        Commands::Stop(args) => commands::stop::execute(args, &cli.daemon).await,
        Commands::Name(args) => commands::name::execute(args, &cli.daemon).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Log directives used when `RUST_LOG` is not set.
fn default_filter(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("pit_state={level},pit_cli={level},warn")
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<StateError>() {
        Some(StateError::InvalidConfig(_)) => ExitCodes::INVALID_CONFIG,
        Some(StateError::ConfigNotFound { .. } | StateError::ContainerNotFound { .. }) => {
            ExitCodes::NOT_FOUND
        }
        Some(StateError::ReadinessTimeout { .. }) => ExitCodes::NOT_READY,
        _ => ExitCodes::GENERAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_filter() {
        assert_eq!(default_filter(false), "pit_state=info,pit_cli=info,warn");
        assert_eq!(default_filter(true), "pit_state=debug,pit_cli=debug,warn");
        assert!(EnvFilter::try_new(default_filter(true)).is_ok());
    }

    #[test]
    fn test_categorize_state_errors() {
        let timeout = anyhow::Error::new(StateError::ReadinessTimeout {
            container: "pitstate_mongo_1".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert_eq!(categorize_error(&timeout), ExitCodes::NOT_READY);

        let missing = anyhow::Error::new(StateError::ContainerNotFound {
            name: "pitstate_mongo_1".to_string(),
        })
        .context("stop failed");
        assert_eq!(categorize_error(&missing), ExitCodes::NOT_FOUND);

        let other = anyhow::anyhow!("something else");
        assert_eq!(categorize_error(&other), ExitCodes::GENERAL_ERROR);
    }
}
