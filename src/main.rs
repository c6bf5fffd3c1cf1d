//! strata CLI.
//!
//! - `strata check` - Load a configuration and build the layers it enables

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// strata protocol layers.
#[derive(Parser)]
#[command(
    name = "strata",
    version,
    about = "Relay and secure protocol layers",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration and construct the configured layers.
    #[command(name = "check")]
    Check(strata::cli::CheckArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check(args) => strata::cli::run_check(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
