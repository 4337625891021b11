//! polybak - Main entry point

use clap::Parser;
use polybak::cli::Cli;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = polybak::logger::init(&cli.log_level) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::debug!("Starting polybak v{}", env!("CARGO_PKG_VERSION"));

    match cli.execute().await {
        // Partial failure: every outcome was reported, the exit code still
        // signals that at least one resource failed.
        Ok(clean) => {
            if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
