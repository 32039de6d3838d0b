use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod emulator;
mod input;
mod library;
mod preview;
mod rom_import;

use cli::Cli;
use config::Config;

/// `RUST_LOG` wins over the config file's `log` key.
fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dotmatrix: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config);

    match cli::run(cli, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            eprintln!("dotmatrix: {e}");
            ExitCode::FAILURE
        }
    }
}
