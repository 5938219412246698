//! vendsync CLI
//!
//! Migrates the vending catalog from an Airtable base into a NocoDB project,
//! and bootstraps the destination schema.
//!
//! # Commands
//!
//! - `migrate` - Copy products and machines, skipping rows already present
//! - `bootstrap` - Create missing tables, primary keys and links
//!
//! Every setting can come from the environment; the final JSON report goes
//! to stdout and logs go to stderr.

mod commands;
mod transport;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Airtable to NocoDB catalog migration tools.
#[derive(Parser, Debug)]
#[command(name = "vendsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Migrate products and machines into the destination project
    Migrate(commands::migrate::MigrateArgs),

    /// Create the destination schema where it is missing
    Bootstrap(commands::bootstrap::BootstrapArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Migrate(args) => commands::migrate::run(args),
        Commands::Bootstrap(args) => commands::bootstrap::run(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
