mod archive;
mod backup;
mod cli;
mod config;
mod error;
mod hash;
mod migration_log;
mod orchestrator;
mod renamer;
mod restore;
mod schema;
mod specs;
mod utils;

#[cfg(test)]
mod test_support;

use std::process::ExitCode;

use clap::Parser;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming};
use log::{debug, error};

use crate::cli::Cli;
use crate::config::LoggingConfig;
use crate::error::VaultError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Configuration decides where logging goes, so it is loaded before the logger exists
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let _logger = match setup_logging(&config.logging) {
        Ok(handle) => handle,
        Err(err) => {
            eprintln!("{}", err);
            return ExitCode::FAILURE;
        }
    };
    debug!("Command-line args: {:?}", std::env::args_os().collect::<Vec<_>>());

    match cli.execute(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:?}", err);
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn setup_logging(logging: &LoggingConfig) -> Result<LoggerHandle, VaultError> {
    let logger = Logger::try_with_str(&logging.level)
        .map_err(|e| VaultError::Error(format!("Invalid log level '{}': {}", logging.level, e)))?;

    let logger = match &logging.dir {
        Some(dir) => logger
            .log_to_file(FileSpec::default().directory(dir).basename("clinic-vault"))
            .duplicate_to_stderr(Duplicate::Warn)
            .rotate(
                Criterion::Size(10 * 1024 * 1024),
                Naming::Timestamps,
                Cleanup::KeepLogFiles(7),
            ),
        None => logger.log_to_stderr(),
    };

    logger
        .start()
        .map_err(|e| VaultError::Error(format!("Failed to start logging: {}", e)))
}
