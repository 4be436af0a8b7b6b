//! Command-line entry point for identify and liveness calls.
//!
//! # Responsibility
//! - Parse arguments and forward them to the boundary API unchanged.
//! - Print the JSON body to stdout and map status to the exit code.

use clap::{Parser, Subcommand};
use identity_api::{configure_db_path, health, identify, init_logging, ApiResponse};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "identity", version, about = "Contact identity reconciliation")]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, value_name = "PATH", env = "IDENTITY_DB_PATH")]
    db: Option<PathBuf>,
    /// Absolute directory for rolling log files; logging stays off when unset
    #[arg(long, global = true, value_name = "DIR", env = "IDENTITY_LOG_DIR")]
    log_dir: Option<String>,
    /// trace|debug|info|warn|error
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve an email and/or phone number to its consolidated identity
    Identify {
        #[arg(long)]
        email: Option<String>,
        #[arg(long = "phone", alias = "phone-number")]
        phone_number: Option<String>,
    },
    /// Print liveness status
    Health,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(log_dir) = cli.log_dir.as_deref() {
        if let Err(err) = init_logging(&cli.log_level, log_dir) {
            eprintln!("logging disabled: {err}");
        }
    }
    if let Some(db) = cli.db.as_ref() {
        if let Err(err) = configure_db_path(db) {
            eprintln!("{err}");
            return ExitCode::from(2);
        }
    }

    let response = match cli.command {
        Command::Identify {
            email,
            phone_number,
        } => identify(email, phone_number),
        Command::Health => health(),
    };
    report(&response)
}

fn report(response: &ApiResponse) -> ExitCode {
    if response.is_success() {
        println!("{}", response.body);
        ExitCode::SUCCESS
    } else {
        eprintln!("{} {}", response.status, response.body);
        ExitCode::FAILURE
    }
}
